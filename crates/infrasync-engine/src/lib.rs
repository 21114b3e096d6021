//! # infrasync Engine
//!
//! The reconciliation core: diff planning against stored fingerprints,
//! the grace-period deletion lifecycle, and idempotent apply with audit
//! logging.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         SyncEngine                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  sources ──▶ normalize ──▶ resolve ──▶ plan ──▶ apply        │
//! │  (parallel)  (model)      (resolver)    │         │          │
//! │                                         ▼         ▼          │
//! │                                   FingerprintStore ──▶ audit │
//! │                                         ▲                    │
//! │                                    registry API              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | Idempotence | Content fingerprints; unchanged entities plan nothing |
//! | Safe convergence | Grace-period state machine; two-phase retire → delete |
//! | Determinism | Tier + natural-key ordered plans |
//! | Failure isolation | Per-operation containment; fingerprints only on success |
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = SyncEngine::new(config, store, registry, sources);
//! let summary = engine.run_once().await?;
//! println!("{}", summary);
//! ```

pub mod apply;
pub mod config;
pub mod error;
pub mod plan;
pub mod policy;
pub mod registry;
pub mod runner;

pub use apply::{AbortHandle, ApplyEngine, ApplyReport};
pub use config::{ApiConfig, EngineConfig, StateConfig, SyncConfig};
pub use error::{EngineError, Result};
pub use plan::{DiffPlanner, Plan, PlannedOp};
pub use policy::ApiPolicy;
pub use registry::{MemoryRegistry, RegistryApi, RegistryError};
pub use runner::{RunSummary, SyncEngine};
