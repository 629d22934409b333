pub mod config;
pub mod error;
pub mod indices;
pub mod session;
pub mod types;
pub mod venue;

pub use config::{Config, EffectiveParams, EngineConfig, InstanceOverrides};
pub use error::{Error, Result};
pub use types::*;
pub use venue::{ExecutionVenue, OrderConfirmation};
