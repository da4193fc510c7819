use thiserror::Error;

/// Error type for hot-tier operations.
#[derive(Error, Debug)]
pub enum TierError {
    #[error("chunk starting at {t0} is finished and no longer writable")]
    ChunkFinished { t0: u32 },

    #[error("non-monotonic push: ts {ts} does not advance past last ts {last_ts}")]
    NonMonotonic { ts: u32, last_ts: u32 },

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Background task error: {0}")]
    BackgroundTask(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for TierError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        TierError::Lock(format!("Mutex/RwLock poisoned: {}", err))
    }
}
