//! # Apply Engine
//!
//! Executes a plan against the registry and is the only writer of the
//! fingerprint store and audit log. The loop per operation is strict:
//! call the registry through the rate-limit/retry policy, and only on a
//! confirmed success touch the fingerprint record and append a success
//! audit line. A failed operation leaves its fingerprint exactly as it
//! was — the next run re-plans and retries it — and never stops the
//! rest of the run.
//!
//! ## Concurrency
//!
//! Operations execute stage by stage: upserts ascend the dependency
//! tiers, removals descend them, and a stage only starts once the
//! previous stage is fully confirmed. Within a stage every operation
//! touches a distinct entity, so they fan out on a task set, bounded by
//! the call policy's rate limiter. Outcomes are recorded in natural-key
//! order to keep the audit trail deterministic.
//!
//! ## Cancellation
//!
//! An [`AbortHandle`] is honored between operations, never mid-call: an
//! in-flight registry call completes and its outcome is recorded before
//! the abort takes effect.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use infrasync_state::{
    AuditRecord, AuditResult, FingerprintRecord, FingerprintStore, LifecycleState, Operation,
};

use crate::plan::{Plan, PlannedOp};
use crate::policy::ApiPolicy;
use crate::registry::{RegistryApi, RegistryResult};

/// Cooperative cancellation flag for a run.
///
/// Aborting stops the apply between operations; work already in flight
/// completes and is recorded.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the run stop at the next operation boundary.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome counts of one apply pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: u64,
    pub updated: u64,
    pub retired: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub failed: u64,

    /// True when an abort cut the pass short; unattempted operations
    /// are not counted as failures.
    pub aborted: bool,
}

/// Executes plans; sole owner of fingerprint and audit mutations.
pub struct ApplyEngine {
    registry: Arc<dyn RegistryApi>,
    policy: Arc<ApiPolicy>,
    store: FingerprintStore,
}

impl ApplyEngine {
    pub fn new(registry: Arc<dyn RegistryApi>, policy: Arc<ApiPolicy>, store: FingerprintStore) -> Self {
        Self {
            registry,
            policy,
            store,
        }
    }

    /// Applies one plan.
    ///
    /// # Errors
    ///
    /// Fails only on fingerprint-store I/O; registry failures are
    /// contained per operation and reported in the [`ApplyReport`].
    pub async fn apply(
        &self,
        plan: &Plan,
        run_id: Uuid,
        now: DateTime<Utc>,
        abort: &AbortHandle,
    ) -> infrasync_state::Result<ApplyReport> {
        let mut report = ApplyReport::default();

        // Store-only bookkeeping first: it carries no registry risk and
        // must happen even on runs that plan zero mutations.
        for key in &plan.refresh_seen {
            if let Some(mut record) = self.store.get(key)? {
                record.state = LifecycleState::Active;
                record.missing_since = None;
                record.retired_at = None;
                record.last_seen_at = now;
                self.store.put(&record)?;
                report.unchanged += 1;
            }
        }
        for key in &plan.mark_missing {
            if let Some(mut record) = self.store.get(key)? {
                record.state = LifecycleState::Missing;
                record.missing_since = Some(now);
                self.store.put(&record)?;
                debug!(key = %record.natural_key, "entity missing, grace period started");
            }
        }

        for stage in stages(&plan.operations) {
            if abort.is_aborted() {
                report.aborted = true;
                break;
            }

            let mut tasks: JoinSet<(usize, RegistryResult)> = JoinSet::new();
            let mut spawned = 0;
            for (index, op) in stage.iter().enumerate() {
                if abort.is_aborted() {
                    report.aborted = true;
                    break;
                }
                let registry = Arc::clone(&self.registry);
                let policy = Arc::clone(&self.policy);
                let op = (*op).clone();
                tasks.spawn(async move {
                    let result = policy
                        .execute(|| {
                            let registry = Arc::clone(&registry);
                            let op = op.clone();
                            async move { call_registry(registry.as_ref(), &op).await }
                        })
                        .await;
                    (index, result)
                });
                spawned += 1;
            }

            let mut outcomes: Vec<(usize, RegistryResult)> = Vec::with_capacity(spawned);
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(join_error) => warn!(%join_error, "apply task panicked"),
                }
            }
            // Stage input is natural-key ordered; recording in index
            // order keeps the audit trail deterministic.
            outcomes.sort_by_key(|(index, _)| *index);

            for (index, result) in outcomes {
                self.record_outcome(stage[index], result, run_id, now, &mut report)?;
            }
        }

        Ok(report)
    }

    /// Writes the fingerprint and audit consequences of one outcome.
    fn record_outcome(
        &self,
        op: &PlannedOp,
        result: RegistryResult,
        run_id: Uuid,
        now: DateTime<Utc>,
        report: &mut ApplyReport,
    ) -> infrasync_state::Result<()> {
        match result {
            Ok(()) => {
                match op.operation {
                    Operation::Create | Operation::Update => {
                        let record = FingerprintRecord::active(
                            op.natural_key.clone(),
                            op.new_hash.clone().unwrap_or_default(),
                            op.sources.clone(),
                            now,
                        );
                        self.store.put(&record)?;
                        if op.operation == Operation::Create {
                            report.created += 1;
                        } else {
                            report.updated += 1;
                        }
                    }
                    Operation::Retire => {
                        if let Some(mut record) = self.store.get(&op.natural_key)? {
                            record.state = LifecycleState::Deleted;
                            record.retired_at = Some(now);
                            self.store.put(&record)?;
                        }
                        report.retired += 1;
                    }
                    Operation::HardDelete => {
                        self.store.remove(&op.natural_key)?;
                        report.deleted += 1;
                    }
                }
                debug!(op = op.operation.as_str(), key = %op.natural_key, "applied");
                self.append_audit(op, run_id, now, AuditResult::Success, None)?;
            }
            Err(error) => {
                // Fingerprint untouched: the identical operation is
                // re-planned and retried on the next run.
                warn!(op = op.operation.as_str(), key = %op.natural_key, %error, "apply failed");
                report.failed += 1;
                self.append_audit(op, run_id, now, AuditResult::Failure, Some(error.to_string()))?;
            }
        }
        Ok(())
    }

    fn append_audit(
        &self,
        op: &PlannedOp,
        run_id: Uuid,
        now: DateTime<Utc>,
        result: AuditResult,
        error_detail: Option<String>,
    ) -> infrasync_state::Result<()> {
        self.store.append_audit(&AuditRecord {
            run_id,
            timestamp: now,
            kind: op.natural_key.kind(),
            natural_key: op.natural_key.clone(),
            operation: op.operation,
            previous_hash: op.previous_hash.clone(),
            new_hash: op.new_hash.clone(),
            result,
            error_detail,
        })
    }
}

async fn call_registry(registry: &dyn RegistryApi, op: &PlannedOp) -> RegistryResult {
    static EMPTY: std::sync::OnceLock<std::collections::BTreeMap<String, serde_json::Value>> =
        std::sync::OnceLock::new();
    let attributes = op
        .attributes
        .as_ref()
        .unwrap_or_else(|| EMPTY.get_or_init(Default::default));
    match op.operation {
        Operation::Create => registry.create(&op.natural_key, attributes).await,
        Operation::Update => registry.update(&op.natural_key, attributes).await,
        Operation::Retire => registry.tag_retire(&op.natural_key).await,
        Operation::HardDelete => registry.delete(&op.natural_key).await,
    }
}

/// Splits the ordered operation list into execution stages: one stage
/// per (direction, tier) run, preserving plan order.
fn stages(operations: &[PlannedOp]) -> Vec<Vec<&PlannedOp>> {
    let mut result: Vec<Vec<&PlannedOp>> = Vec::new();
    let mut current_key: Option<(bool, u8)> = None;

    for op in operations {
        let removal = matches!(op.operation, Operation::Retire | Operation::HardDelete);
        let key = (removal, op.natural_key.kind().tier());
        if current_key != Some(key) {
            result.push(Vec::new());
            current_key = Some(key);
        }
        if let Some(stage) = result.last_mut() {
            stage.push(op);
        }
    }
    result
}
