pub mod manager;

pub use manager::{check_close_exit, check_tick_exit, size_position, update_trailing_stop};
