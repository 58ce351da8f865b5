use thiserror::Error;

/// Main error type for the graph engine.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Combine failed: {0}")]
    Combine(String),

    #[error("Pruned edge {caller}->{callee} has an endpoint outside the relevant set")]
    InvariantViolation { caller: String, callee: String },

    #[error("{failed_batches} log_propagation batch(es) failed to commit")]
    Persistence { failed_batches: usize },

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, GraphError>;
