//! # infrasync State
//!
//! Everything the engine remembers between runs: per-entity content
//! fingerprints with their grace-period lifecycle, the append-only audit
//! trail, and run history. Backed by an embedded sled database so the
//! engine needs no external state service.
//!
//! The store is plain storage — classification and lifecycle decisions
//! live in the engine's diff planner; confirmed outcomes are written
//! back here by the apply engine and nothing else.

pub mod error;
pub mod record;
pub mod store;

pub use error::{Result, StateError};
pub use record::{
    AuditRecord, AuditResult, FingerprintRecord, LifecycleState, Operation, RunRecord, RunStatus,
};
pub use store::{FingerprintStore, StoreStatus};
