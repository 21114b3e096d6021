//! Error types for the state store.

use thiserror::Error;

/// Errors raised by the fingerprint store.
///
/// Unlike every other failure in the pipeline, a store error aborts the
/// run: without a trustworthy fingerprint baseline, applying a plan
/// could repeat or skip registry writes.
#[derive(Debug, Error)]
pub enum StateError {
    /// Failed to open or access the database.
    #[error("state database error: {0}")]
    Database(#[from] sled::Error),

    /// Failed to serialize or deserialize a stored record.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored key or value is not in the expected shape.
    #[error("corrupt state entry: {0}")]
    Corrupt(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StateError>;
