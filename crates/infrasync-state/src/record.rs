//! Persistent record types: fingerprints, audit entries, run history.
//!
//! A [`FingerprintRecord`] is the engine's memory of the last state it
//! successfully applied for one logical entity; the grace-period
//! lifecycle lives here as an explicit state plus timestamps rather than
//! being inferred from absence. [`AuditRecord`]s are the append-only
//! compliance trail. [`RunRecord`]s keep per-run outcomes queryable.

use chrono::{DateTime, Utc};
use infrasync_model::{EntityKind, NaturalKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Grace-period lifecycle of a registered entity.
///
/// ```text
/// active ──(absent this run)──▶ missing ──(grace elapsed, retire
///    ▲                            │         confirmed)──▶ deleted
///    └──(reappears before grace)──┘
/// ```
///
/// `deleted` means "retire confirmed, hard-delete pending". The record
/// itself is removed only once the hard-delete apply is confirmed, so a
/// failed hard-delete is retried on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Seen in the most recent run.
    Active,

    /// Absent from the resolved set; counting down the grace period.
    Missing,

    /// Retire confirmed in the registry; awaiting hard delete.
    Deleted,
}

/// The last applied state of one logical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Entity type.
    pub kind: EntityKind,

    /// Stable identity of the entity.
    pub natural_key: NaturalKey,

    /// SHA-256 of the entity's merged attributes (hex) as of the last
    /// successful apply.
    pub content_hash: String,

    /// Sources contributing at the last time the entity was seen.
    pub sources: BTreeSet<String>,

    /// When any source last reported the entity.
    pub last_seen_at: DateTime<Utc>,

    /// Grace-period lifecycle state.
    pub state: LifecycleState,

    /// When the entity was first found absent; cleared on reappearance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_since: Option<DateTime<Utc>>,

    /// When the retire operation was confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<DateTime<Utc>>,
}

impl FingerprintRecord {
    /// A freshly applied, active record.
    pub fn active(
        natural_key: NaturalKey,
        content_hash: String,
        sources: BTreeSet<String>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: natural_key.kind(),
            natural_key,
            content_hash,
            sources,
            last_seen_at: seen_at,
            state: LifecycleState::Active,
            missing_since: None,
            retired_at: None,
        }
    }
}

/// Registry-mutating operation kinds, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// First sighting; entity does not exist in the registry yet.
    Create,

    /// Merged attributes changed since the last applied hash.
    Update,

    /// Grace period elapsed; mark the registry object retired.
    Retire,

    /// Retire previously confirmed; remove the registry object.
    HardDelete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Retire => "retire",
            Operation::HardDelete => "hard_delete",
        }
    }
}

/// Outcome recorded for one applied operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

/// One line of the append-only audit trail.
///
/// Immutable once written; the engine never updates or deletes audit
/// entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// The run that performed the operation.
    pub run_id: Uuid,

    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,

    /// Entity type operated on.
    pub kind: EntityKind,

    /// Entity identity operated on.
    pub natural_key: NaturalKey,

    /// What was attempted.
    pub operation: Operation,

    /// Fingerprint before the operation, if one existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,

    /// Fingerprint after the operation, for creates and updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<String>,

    /// Whether the registry confirmed the operation.
    pub result: AuditResult,

    /// Error detail for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// Completion status of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// One reconciliation run's recorded outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub created: u64,
    pub updated: u64,
    pub retired: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub warnings: Vec<String>,
}

impl RunRecord {
    /// A run that has just started.
    pub fn started(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            completed_at: None,
            status: RunStatus::Running,
            created: 0,
            updated: 0,
            retired: 0,
            deleted: 0,
            unchanged: 0,
            failed: 0,
            warnings: Vec::new(),
        }
    }
}
