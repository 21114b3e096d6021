//! # Reconciliation Engine Integration Tests
//!
//! End-to-end runs over in-memory collaborators, covering the engine's
//! convergence guarantees.
//!
//! | Property | Test |
//! |----------|------|
//! | Cross-source merge → one create | `test_scenario_two_sources_one_device` |
//! | Idempotence (second run writes nothing) | `test_second_run_is_idempotent` |
//! | Single update on change | `test_changed_attribute_plans_single_update` |
//! | Fetch failure tolerated | `test_fetch_failure_is_warning_not_abort` |
//! | Absence starts grace, not delete | `test_missing_entity_starts_grace_not_delete` |
//! | Reappearance cancels deletion | `test_reappearance_before_grace_never_deletes` |
//! | Two-phase retire → hard delete | `test_sustained_absence_two_phase_delete` |
//! | Partial-failure isolation | `test_partial_failure_isolation` |
//! | Run lock fast-fails | `test_run_lock_rejects_overlap` |
//! | Dependency-ordered applies | `test_parent_applied_before_child` |
//! | Fingerprints survive restart | `test_convergence_survives_store_reopen` |

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use infrasync_engine::{EngineConfig, EngineError, MemoryRegistry, SyncEngine};
use infrasync_model::{NaturalKey, SourceFetchError, SourceWorker, StaticSource};
use infrasync_state::{AuditResult, FingerprintStore, LifecycleState, Operation};

/// Fixed epoch so grace-period arithmetic is exact.
fn day(n: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
        + Duration::days(n)
}

/// Engine config tuned for tests: no backoff sleeps, no rate pressure.
fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.api.rate_limit_per_sec = 10_000;
    config.api.retry_attempts = 3;
    config.api.backoff_factor = 0.0;
    config.sync.delete_grace_days = 7;
    config
}

fn engine(
    store: &FingerprintStore,
    registry: &Arc<MemoryRegistry>,
    sources: Vec<Arc<dyn SourceWorker>>,
) -> SyncEngine {
    SyncEngine::new(
        test_config(),
        store.clone(),
        Arc::clone(registry) as Arc<dyn infrasync_engine::RegistryApi>,
        sources,
    )
}

fn firewall_device_payload() -> Value {
    json!({"devices": [{"hostname": "fw01", "serial": "X1"}]})
}

fn mdm_device_payload(owner: &str) -> Value {
    json!({"devices": [{"deviceName": "fw01", "userPrincipalName": owner}]})
}

fn empty_payload() -> Value {
    json!({"devices": []})
}

fn sources(entries: Vec<(&str, Value)>) -> Vec<Arc<dyn SourceWorker>> {
    entries
        .into_iter()
        .map(|(id, payload)| Arc::new(StaticSource::new(id, payload)) as Arc<dyn SourceWorker>)
        .collect()
}

/// A source whose transport is down.
struct FailingSource;

#[async_trait]
impl SourceWorker for FailingSource {
    fn id(&self) -> &str {
        "mdm"
    }

    async fn fetch(&self) -> Result<Value, SourceFetchError> {
        Err(SourceFetchError::Unavailable("connection refused".into()))
    }
}

/// A source slow enough to hold the run lock while a second run knocks.
struct SlowSource;

#[async_trait]
impl SourceWorker for SlowSource {
    fn id(&self) -> &str {
        "firewall"
    }

    async fn fetch(&self) -> Result<Value, SourceFetchError> {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        Ok(json!({}))
    }
}

// =============================================================================
// MERGE AND IDEMPOTENCE
// =============================================================================

#[tokio::test]
async fn test_scenario_two_sources_one_device() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let engine = engine(
        &store,
        &registry,
        sources(vec![
            ("firewall", firewall_device_payload()),
            ("mdm", mdm_device_payload("alice@example.com")),
        ]),
    );

    let summary = engine.run_once_at(day(0)).await.unwrap();

    // Two sightings, one real device, one create.
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(registry.len(), 1);

    let object = registry.object(&NaturalKey::device("fw01")).unwrap();
    assert_eq!(object.attributes["owner"], json!("alice@example.com"));
    assert_eq!(object.attributes["serial_number"], json!("X1"));

    let record = store.get(&NaturalKey::device("fw01")).unwrap().unwrap();
    assert_eq!(record.state, LifecycleState::Active);
    assert_eq!(record.sources.len(), 2);

    let run = store.last_completed_run().unwrap().unwrap();
    let audit = store.audit_for_run(run.run_id).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].operation, Operation::Create);
    assert_eq!(audit[0].result, AuditResult::Success);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let engine = engine(
        &store,
        &registry,
        sources(vec![
            ("firewall", firewall_device_payload()),
            ("mdm", mdm_device_payload("alice@example.com")),
        ]),
    );

    engine.run_once_at(day(0)).await.unwrap();
    let calls_after_first = registry.call_count();

    let second = engine.run_once_at(day(1)).await.unwrap();

    assert!(second.is_converged(), "second run must plan nothing: {}", second);
    assert_eq!(second.unchanged, 1);
    // Zero registry-mutating calls on the second run.
    assert_eq!(registry.call_count(), calls_after_first);
}

#[tokio::test]
async fn test_changed_attribute_plans_single_update() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());

    let first = engine(
        &store,
        &registry,
        sources(vec![("mdm", mdm_device_payload("alice@example.com"))]),
    );
    first.run_once_at(day(0)).await.unwrap();

    let second = engine(
        &store,
        &registry,
        sources(vec![("mdm", mdm_device_payload("bob@example.com"))]),
    );
    let summary = second.run_once_at(day(1)).await.unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.created, 0);
    let object = registry.object(&NaturalKey::device("fw01")).unwrap();
    assert_eq!(object.attributes["owner"], json!("bob@example.com"));
}

// =============================================================================
// FAILURE CONTAINMENT
// =============================================================================

#[tokio::test]
async fn test_fetch_failure_is_warning_not_abort() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());

    let mut workers = sources(vec![("firewall", firewall_device_payload())]);
    workers.push(Arc::new(FailingSource));
    let engine = engine(&store, &registry, workers);

    let summary = engine.run_once_at(day(0)).await.unwrap();

    // The healthy source still lands.
    assert_eq!(summary.created, 1);
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.contains("mdm") && w.contains("fetch failed")));
}

#[tokio::test]
async fn test_partial_failure_isolation() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let payload = json!({"devices": [
        {"hostname": "alpha", "serial": "A1"},
        {"hostname": "beta", "serial": "B1"}
    ]});
    registry.fail_on(&NaturalKey::device("beta"));

    let first = engine(&store, &registry, sources(vec![("firewall", payload.clone())]));
    let summary = first.run_once_at(day(0)).await.unwrap();

    // alpha applies despite beta failing.
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 1);
    assert!(store.get(&NaturalKey::device("alpha")).unwrap().is_some());
    assert!(store.get(&NaturalKey::device("beta")).unwrap().is_none());

    let run = store.last_completed_run().unwrap().unwrap();
    let audit = store.audit_for_run(run.run_id).unwrap();
    assert!(audit.iter().any(|a| a.result == AuditResult::Failure));

    // Next run resumes exactly the failed operation.
    registry.clear_failures();
    let second = engine(&store, &registry, sources(vec![("firewall", payload)]));
    let summary = second.run_once_at(day(1)).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_run_lock_rejects_overlap() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let engine = Arc::new(engine(&store, &registry, vec![Arc::new(SlowSource)]));

    let background = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run_once_at(day(0)).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Second request while the first is still fetching: immediate
    // rejection, not queueing.
    let overlap = engine.run_once_at(day(0)).await;
    assert!(matches!(overlap, Err(EngineError::RunInFlight)));

    background.await.unwrap().unwrap();
    // After the first run finishes, the lock is free again.
    engine.run_once_at(day(1)).await.unwrap();
}

// =============================================================================
// GRACE-PERIOD LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_missing_entity_starts_grace_not_delete() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());

    engine(&store, &registry, sources(vec![("mdm", mdm_device_payload("alice@x"))]))
        .run_once_at(day(0))
        .await
        .unwrap();

    let summary = engine(&store, &registry, sources(vec![("mdm", empty_payload())]))
        .run_once_at(day(1))
        .await
        .unwrap();

    assert!(summary.is_converged());
    let record = store.get(&NaturalKey::device("fw01")).unwrap().unwrap();
    assert_eq!(record.state, LifecycleState::Missing);
    assert_eq!(record.missing_since, Some(day(1)));
    // The registry object is untouched.
    assert!(registry.object(&NaturalKey::device("fw01")).is_some());
}

#[tokio::test]
async fn test_reappearance_before_grace_never_deletes() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let key = NaturalKey::device("fw01");

    engine(&store, &registry, sources(vec![("mdm", mdm_device_payload("alice@x"))]))
        .run_once_at(day(0))
        .await
        .unwrap();

    // Absent for six days of a seven-day grace window.
    for n in 1..=6 {
        engine(&store, &registry, sources(vec![("mdm", empty_payload())]))
            .run_once_at(day(n))
            .await
            .unwrap();
    }
    assert_eq!(store.get(&key).unwrap().unwrap().state, LifecycleState::Missing);

    // Reappears on day seven: straight back to active.
    let summary = engine(&store, &registry, sources(vec![("mdm", mdm_device_payload("alice@x"))]))
        .run_once_at(day(7))
        .await
        .unwrap();
    assert!(summary.is_converged());
    assert_eq!(summary.unchanged, 1);

    let record = store.get(&key).unwrap().unwrap();
    assert_eq!(record.state, LifecycleState::Active);
    assert!(record.missing_since.is_none());

    // No destructive call was ever issued.
    let journal = registry.journal();
    assert!(journal.iter().all(|call| !call.starts_with("tag_retire") && !call.starts_with("delete")));
}

#[tokio::test]
async fn test_sustained_absence_two_phase_delete() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let key = NaturalKey::device("fw01");

    engine(&store, &registry, sources(vec![("mdm", mdm_device_payload("alice@x"))]))
        .run_once_at(day(0))
        .await
        .unwrap();

    // Day 1: first absence, grace clock starts.
    engine(&store, &registry, sources(vec![("mdm", empty_payload())]))
        .run_once_at(day(1))
        .await
        .unwrap();

    // Day 5: still inside grace, nothing happens.
    let summary = engine(&store, &registry, sources(vec![("mdm", empty_payload())]))
        .run_once_at(day(5))
        .await
        .unwrap();
    assert!(summary.is_converged());

    // Day 9: grace (7d from day 1) elapsed — retire, not delete.
    let summary = engine(&store, &registry, sources(vec![("mdm", empty_payload())]))
        .run_once_at(day(9))
        .await
        .unwrap();
    assert_eq!(summary.retired, 1);
    assert_eq!(summary.deleted, 0);
    let record = store.get(&key).unwrap().unwrap();
    assert_eq!(record.state, LifecycleState::Deleted);
    assert!(registry.object(&key).unwrap().retired);

    // Day 10: the confirmed retire unlocks the hard delete.
    let summary = engine(&store, &registry, sources(vec![("mdm", empty_payload())]))
        .run_once_at(day(10))
        .await
        .unwrap();
    assert_eq!(summary.deleted, 1);
    assert!(store.get(&key).unwrap().is_none());
    assert!(registry.object(&key).is_none());

    // Day 11: fully converged, nothing left to do.
    let summary = engine(&store, &registry, sources(vec![("mdm", empty_payload())]))
        .run_once_at(day(11))
        .await
        .unwrap();
    assert!(summary.is_converged());

    // Exactly one retire and one hard delete across the whole sequence.
    let journal = registry.journal();
    assert_eq!(journal.iter().filter(|c| c.starts_with("tag_retire")).count(), 1);
    assert_eq!(journal.iter().filter(|c| c.starts_with("delete")).count(), 1);
}

// =============================================================================
// ORDERING
// =============================================================================

#[tokio::test]
async fn test_parent_applied_before_child() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let payload = json!({
        "hostname": "fw01",
        "interfaces": [
            {"name": "port1", "status": "up", "addresses": ["192.168.1.1/24"]}
        ],
        "vlans": [{"vlan_id": 100, "name": "users"}],
        "prefixes": [{"subnet": "192.168.1.0/24"}]
    });

    let summary = engine(&store, &registry, sources(vec![("firewall", payload)]))
        .run_once_at(day(0))
        .await
        .unwrap();
    // appliance device, interface, vlan, prefix, interface address
    assert_eq!(summary.created, 5);

    let journal = registry.journal();
    let position = |needle: &str| {
        journal
            .iter()
            .position(|call| call.contains(needle))
            .unwrap_or_else(|| panic!("{} not in journal {:?}", needle, journal))
    };

    assert!(position("device/fw01") < position("interface/fw01|port1"));
    assert!(position("interface/fw01|port1") < position("vlan/100|default"));
    assert!(position("vlan/100|default") < position("ip_address/192.168.1.1/24"));
}

#[tokio::test]
async fn test_convergence_survives_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let registry = Arc::new(MemoryRegistry::new());

    {
        let store = FingerprintStore::open(&path).unwrap();
        let summary = engine(
            &store,
            &registry,
            sources(vec![("firewall", firewall_device_payload())]),
        )
        .run_once_at(day(0))
        .await
        .unwrap();
        assert_eq!(summary.created, 1);
    }
    let calls_after_first = registry.call_count();

    // A fresh process reopening the same database sees the applied
    // fingerprints and plans nothing.
    let store = FingerprintStore::open(&path).unwrap();
    let summary = engine(
        &store,
        &registry,
        sources(vec![("firewall", firewall_device_payload())]),
    )
    .run_once_at(day(1))
    .await
    .unwrap();

    assert!(summary.is_converged());
    assert_eq!(summary.unchanged, 1);
    assert_eq!(registry.call_count(), calls_after_first);
}

#[tokio::test]
async fn test_run_history_recorded() {
    let store = FingerprintStore::temporary().unwrap();
    let registry = Arc::new(MemoryRegistry::new());

    engine(&store, &registry, sources(vec![("mdm", mdm_device_payload("alice@x"))]))
        .run_once_at(day(0))
        .await
        .unwrap();

    let status = store.status().unwrap();
    assert_eq!(status.active, 1);
    assert_eq!(status.missing, 0);
    let run = status.last_completed_run.unwrap();
    assert_eq!(run.created, 1);
    assert_eq!(run.started_at, day(0));
}
