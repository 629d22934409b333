use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or out-of-range parameter. Clamped or rejected with a warning,
    /// never fatal to the decision loop.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The feed returned no price, or a non-positive one. The current tick is
    /// skipped; candle extremes are left untouched.
    #[error("Market data unavailable: {0}")]
    MarketData(String),

    /// Order placement failed or timed out. The intended state transition is
    /// aborted and retried on the next eligible cycle.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Best-effort write failed. Logged and discarded; never blocks trading.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
