//! Configuration types for the reconciliation engine.

use infrasync_resolver::PrecedenceTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// State store configuration.
    pub state: StateConfig,

    /// Convergence behavior.
    pub sync: SyncConfig,

    /// Registry API call policy.
    pub api: ApiConfig,

    /// Attribute-level source precedence used by the identity resolver.
    pub precedence: PrecedenceTable,
}

/// State store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path to the fingerprint/audit database.
    pub db_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./infrasync_state.db"),
        }
    }
}

/// Convergence behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Days an entity must be continuously absent before it is retired.
    pub delete_grace_days: i64,

    /// Site scope applied to VLANs and prefixes.
    pub site: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delete_grace_days: 7,
            site: "default".to_string(),
        }
    }
}

/// Rate limiting and retry policy applied to every registry call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Maximum registry calls per second.
    pub rate_limit_per_sec: u32,

    /// Attempts per operation (first try included).
    pub retry_attempts: u32,

    /// Exponential backoff base in seconds (`factor * 2^attempt`).
    pub backoff_factor: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 10,
            retry_attempts: 3,
            backoff_factor: 1.0,
        }
    }
}

impl EngineConfig {
    /// Builds a configuration from environment variables, falling back
    /// to defaults for anything unset or unparseable.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STATE_DB_PATH` | `./infrasync_state.db` |
    /// | `DELETE_GRACE_DAYS` | `7` |
    /// | `SITE` | `default` |
    /// | `API_RATE_LIMIT` | `10` |
    /// | `API_RETRY_ATTEMPTS` | `3` |
    /// | `API_BACKOFF_FACTOR` | `1.0` |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("STATE_DB_PATH") {
            config.state.db_path = PathBuf::from(path);
        }
        if let Some(days) = env_parse("DELETE_GRACE_DAYS") {
            config.sync.delete_grace_days = days;
        }
        if let Ok(site) = std::env::var("SITE") {
            if !site.trim().is_empty() {
                config.sync.site = site;
            }
        }
        if let Some(rate) = env_parse("API_RATE_LIMIT") {
            config.api.rate_limit_per_sec = rate;
        }
        if let Some(attempts) = env_parse("API_RETRY_ATTEMPTS") {
            config.api.retry_attempts = attempts;
        }
        if let Some(factor) = env_parse("API_BACKOFF_FACTOR") {
            config.api.backoff_factor = factor;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
