//! # Persistent State Layer
//!
//! Sled-backed storage for everything a run needs to remember between
//! runs. The database uses three trees (namespaces):
//!
//! | Tree | Key | Value | Purpose |
//! |------|-----|-------|---------|
//! | `fingerprints` | natural key string | [`FingerprintRecord`] JSON | Change detection + lifecycle |
//! | `audit` | monotonic id (big-endian u64) | [`AuditRecord`] JSON | Append-only compliance trail |
//! | `runs` | run id (uuid bytes) | [`RunRecord`] JSON | Run history |
//!
//! ## Ownership
//!
//! The store is owned and mutated exclusively by the apply engine during
//! a run; the diff planner and the status queries only read it. It is
//! passed explicitly wherever it is needed — no ambient globals — so
//! runs are reproducible and testable against [`FingerprintStore::temporary`].
//!
//! ## Durability
//!
//! Sled batches writes; [`FingerprintStore::flush`] is called at the end
//! of every run so a crash between runs never loses confirmed applies.

use chrono::{DateTime, Utc};
use infrasync_model::NaturalKey;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::error::Result;
use crate::record::{AuditRecord, FingerprintRecord, LifecycleState, RunRecord, RunStatus};

/// Tree name for fingerprint records.
const FINGERPRINT_TREE: &str = "fingerprints";

/// Tree name for the append-only audit log.
const AUDIT_TREE: &str = "audit";

/// Tree name for run history.
const RUN_TREE: &str = "runs";

/// Read-only snapshot of the store for status/metrics consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatus {
    /// Fingerprint counts per lifecycle state.
    pub active: u64,
    pub missing: u64,
    pub deleted: u64,

    /// The most recent run that completed successfully.
    pub last_completed_run: Option<RunRecord>,

    /// Per-source latest `last_seen_at` across all fingerprints.
    pub source_last_seen: BTreeMap<String, DateTime<Utc>>,
}

/// Wrapper around a sled database holding fingerprints, audit records,
/// and run history.
///
/// Cloning is cheap (sled handles are `Arc`s internally); the apply
/// engine and status readers can hold clones of the same store.
#[derive(Clone)]
pub struct FingerprintStore {
    db: sled::Db,
    fingerprints: sled::Tree,
    audit: sled::Tree,
    runs: sled::Tree,
}

impl FingerprintStore {
    /// Opens or creates a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Database`] if the path is invalid, locked
    /// by another process, or corrupted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Creates an in-memory store that is discarded on drop. Testing
    /// and dry runs only.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let fingerprints = db.open_tree(FINGERPRINT_TREE)?;
        let audit = db.open_tree(AUDIT_TREE)?;
        let runs = db.open_tree(RUN_TREE)?;
        Ok(Self {
            db,
            fingerprints,
            audit,
            runs,
        })
    }

    // ---- fingerprints -----------------------------------------------------

    /// Loads the fingerprint record for a natural key.
    pub fn get(&self, key: &NaturalKey) -> Result<Option<FingerprintRecord>> {
        match self.fingerprints.get(key.to_string().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes (or overwrites) a fingerprint record.
    pub fn put(&self, record: &FingerprintRecord) -> Result<()> {
        let key = record.natural_key.to_string();
        let bytes = serde_json::to_vec(record)?;
        self.fingerprints.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Removes a fingerprint record. Returns whether it existed.
    ///
    /// Only called once a hard delete has been confirmed by the
    /// registry.
    pub fn remove(&self, key: &NaturalKey) -> Result<bool> {
        Ok(self.fingerprints.remove(key.to_string().as_bytes())?.is_some())
    }

    /// Returns every fingerprint record, in natural-key order.
    pub fn all(&self) -> Result<Vec<FingerprintRecord>> {
        let mut records = Vec::new();
        for entry in self.fingerprints.iter() {
            let (_, bytes) = entry?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }

    /// Number of fingerprint records.
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    /// Whether the store has no fingerprints.
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    // ---- audit ------------------------------------------------------------

    /// Appends an audit record. The key is a database-monotonic id, so
    /// iteration order is append order.
    pub fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        let id = self.db.generate_id()?;
        let bytes = serde_json::to_vec(record)?;
        self.audit.insert(id.to_be_bytes(), bytes)?;
        Ok(())
    }

    /// Returns the audit trail of one run, in append order.
    pub fn audit_for_run(&self, run_id: Uuid) -> Result<Vec<AuditRecord>> {
        let mut records = Vec::new();
        for entry in self.audit.iter() {
            let (_, bytes) = entry?;
            let record: AuditRecord = serde_json::from_slice(&bytes)?;
            if record.run_id == run_id {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Total number of audit records.
    pub fn audit_len(&self) -> usize {
        self.audit.len()
    }

    // ---- runs -------------------------------------------------------------

    /// Records a run's state, keyed by its run id (upsert: the same
    /// record is written at start and again at completion).
    pub fn record_run(&self, record: &RunRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.runs.insert(record.run_id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Returns all recorded runs.
    pub fn all_runs(&self) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        for entry in self.runs.iter() {
            let (_, bytes) = entry?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }

    /// The most recently started run that completed successfully.
    pub fn last_completed_run(&self) -> Result<Option<RunRecord>> {
        let mut latest: Option<RunRecord> = None;
        for run in self.all_runs()? {
            if run.status != RunStatus::Completed {
                continue;
            }
            let newer = match &latest {
                Some(existing) => run.started_at > existing.started_at,
                None => true,
            };
            if newer {
                latest = Some(run);
            }
        }
        Ok(latest)
    }

    // ---- status queries ---------------------------------------------------

    /// Builds the read-only status snapshot served to health/metrics
    /// consumers.
    pub fn status(&self) -> Result<StoreStatus> {
        let mut status = StoreStatus {
            active: 0,
            missing: 0,
            deleted: 0,
            last_completed_run: self.last_completed_run()?,
            source_last_seen: BTreeMap::new(),
        };

        for record in self.all()? {
            match record.state {
                LifecycleState::Active => status.active += 1,
                LifecycleState::Missing => status.missing += 1,
                LifecycleState::Deleted => status.deleted += 1,
            }
            for source in &record.sources {
                let entry = status
                    .source_last_seen
                    .entry(source.clone())
                    .or_insert(record.last_seen_at);
                if record.last_seen_at > *entry {
                    *entry = record.last_seen_at;
                }
            }
        }

        Ok(status)
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for FingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintStore")
            .field("fingerprints", &self.len())
            .field("audit_records", &self.audit_len())
            .finish()
    }
}
