//! Error types for the seeding and query workflows.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Catalog fetch failed (connection, timeout or non-2xx status).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Catalog payload was not a JSON array of records.
    #[error("Format error: {0}")]
    Format(String),

    /// A pipelined batch of writes was rejected by the store.
    #[error("Store write error: {0}")]
    StoreWrite(String),

    /// Any other store command failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The named search index does not exist.
    #[error("Index not found: {0}")]
    IndexAbsent(String),

    /// An embedding vector does not have the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Model loading or inference failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is the expected "index does not exist" result.
    pub fn is_index_absent(&self) -> bool {
        matches!(self, Error::IndexAbsent(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
