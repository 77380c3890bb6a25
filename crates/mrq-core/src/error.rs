use thiserror::Error;

/// The error taxonomy shared by every crate in the workspace. Kinds, not
/// free-form strings, so callers can match on propagation policy rather
/// than parse messages.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed parameters, non-finite numeric values, inverted time
    /// ranges. Surfaced immediately; never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Too few ratings or candles for a window or moving-average length.
    /// The affected task is marked failed; siblings continue.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// External endpoint signaled throttling. Handled inside `mrq-ingest`
    /// with backoff; should not escape that crate.
    #[error("rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Connection reset, 5xx. Retried with exponential backoff up to a
    /// configured retry ceiling.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// A task exceeded its configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Upsert conflicts other than duplicate-key, or I/O failures. Retried
    /// once by the caller, then surfaced as fatal for the affected task.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// A shutdown signal was received during dispatch; new submissions are
    /// rejected while in-flight work is allowed to complete.
    #[error("shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::PersistenceError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::PersistenceError(err.to_string())
    }
}
