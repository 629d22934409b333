pub mod adx;
pub mod macd;
pub mod supertrend;

pub use adx::Adx;
pub use macd::{Macd, MacdSignal};
pub use supertrend::{SuperTrend, SuperTrendOutput};
