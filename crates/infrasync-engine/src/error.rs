//! Error types for the reconciliation engine.

use thiserror::Error;

/// Failures that abort an entire run.
///
/// Everything else — a source down, a malformed record, a rejected
/// registry call — is contained at its own scope and surfaced through
/// the run summary instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another reconciliation run holds the run lock. Fast-fail: the
    /// caller retries on its own schedule, requests are never queued.
    #[error("another reconciliation run is already in flight")]
    RunInFlight,

    /// The fingerprint store failed; without a trustworthy baseline the
    /// plan cannot be applied safely.
    #[error("state store failure: {0}")]
    State(#[from] infrasync_state::StateError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
