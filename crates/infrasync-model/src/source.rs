//! Source worker boundary.
//!
//! Real source workers (HTTP clients with their own auth, pagination and
//! rate limits) live outside this codebase; the engine only needs a way
//! to ask "give me this source's raw payload for this run". A worker may
//! fail or return garbage — the engine tolerates a missing source and
//! carries on with the rest.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Errors a source worker can surface to the engine.
///
/// A fetch error never aborts a run; the source simply contributes zero
/// entities and the error is carried as a run warning.
#[derive(Debug, Error)]
pub enum SourceFetchError {
    /// The source could not be reached or refused the request.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// The source responded with something that is not a payload.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Local I/O failure (file-backed workers).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One data source's fetch contract.
///
/// Implementations must be cheap to share (`Send + Sync`); the engine
/// fetches all sources concurrently, one task per worker.
#[async_trait]
pub trait SourceWorker: Send + Sync {
    /// Stable source identifier (`firewall`, `mdm`, `endpoint`).
    fn id(&self) -> &str;

    /// Fetches the source's raw payload for the current run.
    async fn fetch(&self) -> Result<Value, SourceFetchError>;
}

/// A worker that always returns a fixed payload. Test double.
pub struct StaticSource {
    id: String,
    payload: Value,
}

impl StaticSource {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

#[async_trait]
impl SourceWorker for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Value, SourceFetchError> {
        Ok(self.payload.clone())
    }
}

/// A worker that reads its payload from a JSON file on each fetch.
///
/// Used by the CLI to run the engine against exported payloads without
/// any live source connectivity.
pub struct FileSource {
    id: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl SourceWorker for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Value, SourceFetchError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticSource::new("mdm", json!({"devices": []}));
        assert_eq!(source.id(), "mdm");
        assert_eq!(source.fetch().await.unwrap(), json!({"devices": []}));
    }

    #[tokio::test]
    async fn test_file_source_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firewall.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"hostname": "fw01"}}"#).unwrap();

        let source = FileSource::new("firewall", &path);
        assert_eq!(source.fetch().await.unwrap(), json!({"hostname": "fw01"}));
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileSource::new("firewall", "/nonexistent/firewall.json");
        assert!(matches!(
            source.fetch().await,
            Err(SourceFetchError::Io(_))
        ));
    }
}
