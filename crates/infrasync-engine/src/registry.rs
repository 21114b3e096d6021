//! Registry API boundary.
//!
//! The registry client proper (HTTP transport, auth, pagination) lives
//! outside this codebase. The engine sees only this trait: four
//! idempotent, PUT-style mutations keyed by natural key. At-least-once
//! delivery is the engine's retry layer's business; exactly-once
//! application is the registry's.

use async_trait::async_trait;
use infrasync_model::NaturalKey;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use thiserror::Error;

/// Errors surfaced by a registry client.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry could not be reached; worth retrying.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// The call timed out; worth retrying.
    #[error("registry timeout: {0}")]
    Timeout(String),

    /// The registry understood and refused the request; retrying the
    /// same payload will not help.
    #[error("registry rejected request: {0}")]
    Rejected(String),
}

impl RegistryError {
    /// Whether the retry policy should attempt the call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RegistryError::Rejected(_))
    }
}

/// Result type for registry calls.
pub type RegistryResult = std::result::Result<(), RegistryError>;

/// The registry's mutation surface.
///
/// All four calls are expected to be idempotent: re-sending a confirmed
/// mutation must be a no-op on the registry side.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Creates an object for the given key with the given attributes.
    async fn create(&self, key: &NaturalKey, attributes: &BTreeMap<String, Value>) -> RegistryResult;

    /// Replaces an existing object's attributes. Also clears any retired
    /// marker, which is how an entity that reappears after a confirmed
    /// retire returns to service.
    async fn update(&self, key: &NaturalKey, attributes: &BTreeMap<String, Value>) -> RegistryResult;

    /// Marks an object retired (soft delete) without removing it.
    async fn tag_retire(&self, key: &NaturalKey) -> RegistryResult;

    /// Removes an object permanently.
    async fn delete(&self, key: &NaturalKey) -> RegistryResult;
}

/// One object as held by the in-memory registry.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub attributes: BTreeMap<String, Value>,
    pub retired: bool,
}

/// In-memory registry double.
///
/// Used by the integration tests and by CLI dry runs. Keeps a journal of
/// every call in arrival order and can be told to fail specific keys,
/// which is how partial-failure isolation is exercised.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing: Mutex<BTreeSet<String>>,
    journal: Mutex<Vec<String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call touching `key` fail with `Unavailable` until
    /// [`MemoryRegistry::clear_failures`] is called.
    pub fn fail_on(&self, key: &NaturalKey) {
        self.failing.lock().expect("lock").insert(key.to_string());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.failing.lock().expect("lock").clear();
    }

    /// The call journal, e.g. `["create device/fw01", "delete vlan/100|hq"]`.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().expect("lock").clone()
    }

    /// Total number of mutation calls received (including failed ones).
    pub fn call_count(&self) -> usize {
        self.journal.lock().expect("lock").len()
    }

    /// Snapshot of one object.
    pub fn object(&self, key: &NaturalKey) -> Option<StoredObject> {
        self.objects.lock().expect("lock").get(&key.to_string()).cloned()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("lock").len()
    }

    /// Whether the registry holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, operation: &str, key: &NaturalKey) -> RegistryResult {
        let key = key.to_string();
        self.journal.lock().expect("lock").push(format!("{} {}", operation, key));
        if self.failing.lock().expect("lock").contains(&key) {
            return Err(RegistryError::Unavailable(format!(
                "injected failure for {}",
                key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryApi for MemoryRegistry {
    async fn create(&self, key: &NaturalKey, attributes: &BTreeMap<String, Value>) -> RegistryResult {
        self.record("create", key)?;
        self.objects.lock().expect("lock").insert(
            key.to_string(),
            StoredObject {
                attributes: attributes.clone(),
                retired: false,
            },
        );
        Ok(())
    }

    async fn update(&self, key: &NaturalKey, attributes: &BTreeMap<String, Value>) -> RegistryResult {
        self.record("update", key)?;
        // PUT semantics: an update for an unknown key materializes it.
        self.objects.lock().expect("lock").insert(
            key.to_string(),
            StoredObject {
                attributes: attributes.clone(),
                retired: false,
            },
        );
        Ok(())
    }

    async fn tag_retire(&self, key: &NaturalKey) -> RegistryResult {
        self.record("tag_retire", key)?;
        if let Some(object) = self.objects.lock().expect("lock").get_mut(&key.to_string()) {
            object.retired = true;
        }
        Ok(())
    }

    async fn delete(&self, key: &NaturalKey) -> RegistryResult {
        self.record("delete", key)?;
        self.objects.lock().expect("lock").remove(&key.to_string());
        Ok(())
    }
}
