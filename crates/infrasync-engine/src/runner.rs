//! # Run Orchestration
//!
//! The [`SyncEngine`] facade wires the whole pipeline together and
//! exposes the single entry point collaborators call: one blocking
//! reconciliation run, fetch through apply.
//!
//! ## Run phases
//!
//! 1. **Fetch** — one task per source, concurrently; a failing source
//!    contributes nothing and a warning, never an abort.
//! 2. **Resolve** — single-threaded over the complete union snapshot;
//!    no partial view across sources is ever resolved.
//! 3. **Plan** — classification plus grace-period lifecycle, ordered.
//! 4. **Apply** — tiered execution with confirmed-write bookkeeping.
//!
//! Exactly one run may be in flight at a time: the run lock fast-fails
//! overlapping requests ([`crate::EngineError::RunInFlight`]) rather
//! than queueing them — the fingerprint store is not built for
//! interleaved runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use infrasync_model::normalize::normalize;
use infrasync_model::{CanonicalEntity, SourceWorker};
use infrasync_resolver::Resolver;
use infrasync_state::{FingerprintStore, RunRecord, RunStatus};

use crate::apply::{AbortHandle, ApplyEngine};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::plan::DiffPlanner;
use crate::policy::ApiPolicy;
use crate::registry::RegistryApi;

/// Counts and warnings from one reconciliation run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub created: u64,
    pub updated: u64,
    pub retired: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub warnings: Vec<String>,
}

impl RunSummary {
    /// Whether the run changed nothing and failed nothing.
    pub fn is_converged(&self) -> bool {
        self.created == 0
            && self.updated == 0
            && self.retired == 0
            && self.deleted == 0
            && self.failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} retired={} deleted={} unchanged={} failed={} warnings={}",
            self.created,
            self.updated,
            self.retired,
            self.deleted,
            self.unchanged,
            self.failed,
            self.warnings.len()
        )
    }
}

/// The reconciliation engine facade.
///
/// Owns the pipeline components and the run lock. Construct once,
/// invoke [`SyncEngine::run_once`] on whatever cadence the external
/// scheduler dictates.
pub struct SyncEngine {
    config: EngineConfig,
    store: FingerprintStore,
    sources: Vec<Arc<dyn SourceWorker>>,
    resolver: Resolver,
    apply: ApplyEngine,
    abort: AbortHandle,
    run_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    /// Builds an engine from its injected collaborators.
    pub fn new(
        config: EngineConfig,
        store: FingerprintStore,
        registry: Arc<dyn RegistryApi>,
        sources: Vec<Arc<dyn SourceWorker>>,
    ) -> Self {
        let policy = Arc::new(ApiPolicy::new(
            config.api.rate_limit_per_sec,
            config.api.retry_attempts,
            config.api.backoff_factor,
        ));
        let resolver = Resolver::new(config.precedence.clone());
        let apply = ApplyEngine::new(registry, policy, store.clone());

        Self {
            config,
            store,
            sources,
            resolver,
            apply,
            abort: AbortHandle::new(),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The store, for read-only status queries.
    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Handle for aborting the in-flight run between operations.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Executes one reconciliation run at the current wall-clock time.
    pub async fn run_once(&self) -> Result<RunSummary> {
        self.run_once_at(Utc::now()).await
    }

    /// Executes one reconciliation run with an explicit clock.
    ///
    /// The clock drives `missing_since` stamps and grace-period checks,
    /// which is what makes deletion behavior testable without real
    /// multi-day waits.
    ///
    /// # Errors
    ///
    /// - [`EngineError::RunInFlight`] when another run holds the lock
    ///   (fast-fail, not queued).
    /// - [`EngineError::State`] when the fingerprint store fails; the
    ///   run is recorded as failed.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| EngineError::RunInFlight)?;

        let run_id = Uuid::new_v4();
        info!(%run_id, "reconciliation run started");
        let mut run_record = RunRecord::started(run_id, now);
        self.store.record_run(&run_record)?;

        match self.execute(run_id, now).await {
            Ok(summary) => {
                run_record.status = RunStatus::Completed;
                run_record.completed_at = Some(now);
                run_record.created = summary.created;
                run_record.updated = summary.updated;
                run_record.retired = summary.retired;
                run_record.deleted = summary.deleted;
                run_record.unchanged = summary.unchanged;
                run_record.failed = summary.failed;
                run_record.warnings = summary.warnings.clone();
                self.store.record_run(&run_record)?;
                self.store.flush()?;
                info!(%run_id, %summary, "reconciliation run completed");
                Ok(summary)
            }
            Err(error) => {
                run_record.status = RunStatus::Failed;
                run_record.completed_at = Some(now);
                run_record.warnings = vec![error.to_string()];
                // Best effort: the store that just failed may refuse
                // the failure record too.
                let _ = self.store.record_run(&run_record);
                let _ = self.store.flush();
                Err(error)
            }
        }
    }

    async fn execute(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<RunSummary> {
        let mut warnings = Vec::new();

        // Fetch phase: all sources concurrently, none blocking another.
        let mut tasks: JoinSet<(String, std::result::Result<serde_json::Value, String>)> =
            JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            tasks.spawn(async move {
                let id = source.id().to_string();
                let result = source.fetch().await.map_err(|e| e.to_string());
                (id, result)
            });
        }
        let mut payloads: HashMap<String, std::result::Result<serde_json::Value, String>> =
            HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    payloads.insert(id, result);
                }
                Err(join_error) => warn!(%join_error, "source fetch task panicked"),
            }
        }

        // Normalize in declared source order so warnings and the entity
        // union are reproducible.
        let mut entities: Vec<CanonicalEntity> = Vec::new();
        for source in &self.sources {
            match payloads.remove(source.id()) {
                Some(Ok(payload)) => {
                    let (mut source_entities, mut source_warnings) =
                        normalize(source.id(), &payload, &self.config.sync.site, now);
                    info!(
                        source = source.id(),
                        entities = source_entities.len(),
                        skipped = source_warnings.len(),
                        "source normalized"
                    );
                    entities.append(&mut source_entities);
                    warnings.append(&mut source_warnings);
                }
                Some(Err(error)) => {
                    warn!(source = source.id(), %error, "source fetch failed, contributing nothing this run");
                    warnings.push(format!("source {} fetch failed: {}", source.id(), error));
                }
                None => {
                    warnings.push(format!("source {} fetch task vanished", source.id()));
                }
            }
        }

        // Resolve and plan over the complete snapshot, single-threaded.
        let (logical, mut resolve_warnings) = self.resolver.resolve(entities);
        warnings.append(&mut resolve_warnings);

        let planner = DiffPlanner::new(&self.store, self.config.sync.delete_grace_days);
        let plan = planner.plan(&logical, now)?;

        let report = self.apply.apply(&plan, run_id, now, &self.abort).await?;
        if report.aborted {
            warnings.push("run aborted; remaining operations deferred to next run".to_string());
        }

        Ok(RunSummary {
            created: report.created,
            updated: report.updated,
            retired: report.retired,
            deleted: report.deleted,
            unchanged: report.unchanged,
            failed: report.failed,
            warnings,
        })
    }
}
