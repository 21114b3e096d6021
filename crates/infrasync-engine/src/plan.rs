//! # Diff Planner
//!
//! Compares the run's freshly resolved entities against the fingerprint
//! store and produces the ordered operation plan the apply engine
//! executes. The planner never writes anything — every store mutation it
//! wants (including pure bookkeeping like last-seen refreshes) is
//! expressed in the plan and carried out by the apply engine, so state
//! only ever changes on that one path.
//!
//! ## Classification
//!
//! | Store record | Fresh hash | Outcome |
//! |--------------|-----------|---------|
//! | none | — | `Create` |
//! | any state | differs | `Update` (also reactivates) |
//! | active | equal | last-seen refresh, no registry write |
//! | missing | equal | reactivate, no registry write |
//! | deleted | equal | `Update` (clears the retired marker) |
//!
//! ## Grace-period lifecycle
//!
//! Absence drives an explicit state machine, never an immediate delete:
//! first absence marks the record missing; sustained absence past the
//! grace threshold plans a `Retire`; only after the retire is confirmed
//! does a later run plan the `HardDelete`. A transiently dark source can
//! therefore never cause destructive writes.
//!
//! ## Ordering
//!
//! Creates and updates ascend the dependency tiers (device before its
//! interfaces before addresses); retires and hard-deletes descend them.
//! Within a tier, operations sort by natural key. Identical inputs
//! always produce the identical plan.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use infrasync_model::{canonical, content_hash, LogicalEntity, NaturalKey};
use infrasync_state::{FingerprintStore, LifecycleState, Operation};

/// One planned registry operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOp {
    /// What to do.
    pub operation: Operation,

    /// The entity to do it to.
    pub natural_key: NaturalKey,

    /// Provenance-free attributes for creates and updates.
    pub attributes: Option<BTreeMap<String, Value>>,

    /// Contributing sources, persisted on success.
    pub sources: BTreeSet<String>,

    /// Stored fingerprint before the operation.
    pub previous_hash: Option<String>,

    /// Fingerprint after a successful create/update.
    pub new_hash: Option<String>,
}

/// The full output of one planning pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Plan {
    /// Registry operations in execution order.
    pub operations: Vec<PlannedOp>,

    /// Entities seen unchanged: refresh `last_seen_at`, reactivate if
    /// the record was missing. No registry write.
    pub refresh_seen: Vec<NaturalKey>,

    /// Active records absent from this run: transition to missing.
    pub mark_missing: Vec<NaturalKey>,
}

impl Plan {
    /// Whether the plan performs zero registry mutations.
    pub fn is_converged(&self) -> bool {
        self.operations.is_empty()
    }

    fn count(&self, operation: Operation) -> usize {
        self.operations
            .iter()
            .filter(|op| op.operation == operation)
            .count()
    }

    pub fn creates(&self) -> usize {
        self.count(Operation::Create)
    }

    pub fn updates(&self) -> usize {
        self.count(Operation::Update)
    }

    pub fn retires(&self) -> usize {
        self.count(Operation::Retire)
    }

    pub fn hard_deletes(&self) -> usize {
        self.count(Operation::HardDelete)
    }
}

/// Builds plans from resolved entities plus stored fingerprints.
///
/// Holds only borrowed dependencies; one planner is built per run.
pub struct DiffPlanner<'a> {
    store: &'a FingerprintStore,
    grace: Duration,
}

impl<'a> DiffPlanner<'a> {
    /// Creates a planner with the configured deletion grace period.
    pub fn new(store: &'a FingerprintStore, grace_days: i64) -> Self {
        Self {
            store,
            grace: Duration::days(grace_days),
        }
    }

    /// Produces the ordered plan for this run.
    ///
    /// # Errors
    ///
    /// Fails only on fingerprint-store I/O errors, which abort the run.
    pub fn plan(
        &self,
        entities: &[LogicalEntity],
        now: DateTime<Utc>,
    ) -> infrasync_state::Result<Plan> {
        let mut plan = Plan::default();
        let mut upserts = Vec::new();
        let mut removals = Vec::new();

        let mut present: BTreeSet<NaturalKey> = BTreeSet::new();
        for entity in entities {
            present.insert(entity.natural_key.clone());
            let fresh_hash = canonical::to_hex(&content_hash(entity));
            let record = self.store.get(&entity.natural_key)?;

            match record {
                None => upserts.push(PlannedOp {
                    operation: Operation::Create,
                    natural_key: entity.natural_key.clone(),
                    attributes: Some(plain_attributes(entity)),
                    sources: entity.sources.clone(),
                    previous_hash: None,
                    new_hash: Some(fresh_hash),
                }),
                Some(record) if record.content_hash != fresh_hash => upserts.push(PlannedOp {
                    operation: Operation::Update,
                    natural_key: entity.natural_key.clone(),
                    attributes: Some(plain_attributes(entity)),
                    sources: entity.sources.clone(),
                    previous_hash: Some(record.content_hash),
                    new_hash: Some(fresh_hash),
                }),
                Some(record) => match record.state {
                    // Unchanged content. If the registry object was
                    // already retired, an update is still needed to put
                    // it back in service.
                    LifecycleState::Deleted => upserts.push(PlannedOp {
                        operation: Operation::Update,
                        natural_key: entity.natural_key.clone(),
                        attributes: Some(plain_attributes(entity)),
                        sources: entity.sources.clone(),
                        previous_hash: Some(record.content_hash),
                        new_hash: Some(fresh_hash),
                    }),
                    LifecycleState::Active | LifecycleState::Missing => {
                        plan.refresh_seen.push(entity.natural_key.clone());
                    }
                },
            }
        }

        // Everything the store remembers but this run did not resolve.
        for record in self.store.all()? {
            if present.contains(&record.natural_key) {
                continue;
            }
            match record.state {
                LifecycleState::Active => plan.mark_missing.push(record.natural_key),
                LifecycleState::Missing => {
                    let Some(missing_since) = record.missing_since else {
                        // A missing record without its timestamp restarts
                        // the grace clock; it must never delete early.
                        plan.mark_missing.push(record.natural_key);
                        continue;
                    };
                    if now - missing_since >= self.grace {
                        removals.push(PlannedOp {
                            operation: Operation::Retire,
                            natural_key: record.natural_key,
                            attributes: None,
                            sources: record.sources,
                            previous_hash: Some(record.content_hash),
                            new_hash: None,
                        });
                    }
                }
                LifecycleState::Deleted => removals.push(PlannedOp {
                    operation: Operation::HardDelete,
                    natural_key: record.natural_key,
                    attributes: None,
                    sources: record.sources,
                    previous_hash: Some(record.content_hash),
                    new_hash: None,
                }),
            }
        }

        upserts.sort_by(|a, b| {
            (a.natural_key.kind().tier(), &a.natural_key)
                .cmp(&(b.natural_key.kind().tier(), &b.natural_key))
        });
        // Removals run children-first so referrers are gone before
        // their referents.
        removals.sort_by(|a, b| {
            (std::cmp::Reverse(a.natural_key.kind().tier()), &a.natural_key)
                .cmp(&(std::cmp::Reverse(b.natural_key.kind().tier()), &b.natural_key))
        });

        plan.operations = upserts;
        plan.operations.extend(removals);
        plan.refresh_seen.sort();
        plan.mark_missing.sort();

        debug!(
            creates = plan.creates(),
            updates = plan.updates(),
            retires = plan.retires(),
            hard_deletes = plan.hard_deletes(),
            unchanged = plan.refresh_seen.len(),
            newly_missing = plan.mark_missing.len(),
            "plan built"
        );
        Ok(plan)
    }
}

/// Strips provenance: the attribute map as the registry should store it.
pub fn plain_attributes(entity: &LogicalEntity) -> BTreeMap<String, Value> {
    entity
        .attributes
        .iter()
        .map(|(name, attr)| (name.clone(), attr.value.clone()))
        .collect()
}
