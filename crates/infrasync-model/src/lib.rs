//! # infrasync Model
//!
//! Canonical entity model for the reconciliation engine: the typed
//! entities every pipeline stage operates on, the canonical
//! serialization their content fingerprints are computed over, the
//! per-source normalizers, and the source-worker boundary trait.
//!
//! ## Pipeline position
//!
//! ```text
//! raw source payloads ──▶ Normalizer ──▶ per-source CanonicalEntity
//!                                              │
//!                                              ▼
//!                                     Identity Resolver
//!                                     (infrasync-resolver)
//! ```
//!
//! Everything here is pure data and pure functions — no I/O except the
//! [`SourceWorker`] implementations, which exist so the engine and tests
//! can stand in for the real API clients.

pub mod canonical;
pub mod entity;
pub mod normalize;
pub mod source;

pub use canonical::{content_hash, to_hex, Hash, HASH_SIZE};
pub use entity::{
    attrs, AttrValue, CanonicalEntity, EntityKind, LogicalEntity, NaturalKey, Provenance,
    SOURCE_ENDPOINT, SOURCE_FIREWALL, SOURCE_MDM,
};
pub use source::{FileSource, SourceFetchError, SourceWorker, StaticSource};
