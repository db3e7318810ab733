use async_trait::async_trait;
use em_api_types::WorkflowError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::warn;

/// The persisted "cached provider" marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedSession {
    pub backend_id: String,
    #[serde(default)]
    pub id_token: Option<String>,
    pub cached_at_epoch_ms: u128,
}

impl CachedSession {
    pub fn new(backend_id: &str, id_token: Option<String>) -> Self {
        Self {
            backend_id: backend_id.to_owned(),
            id_token,
            cached_at_epoch_ms: epoch_ms(),
        }
    }
}

#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn load(&self) -> Result<Option<CachedSession>, WorkflowError>;
    async fn save(&self, session: &CachedSession) -> Result<(), WorkflowError>;
    /// Idempotent.
    async fn clear(&self) -> Result<(), WorkflowError>;
}

#[derive(Default)]
pub struct InMemorySessionCache {
    slot: RwLock<Option<CachedSession>>,
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn load(&self) -> Result<Option<CachedSession>, WorkflowError> {
        Ok(self.slot.read().await.clone())
    }

    async fn save(&self, session: &CachedSession) -> Result<(), WorkflowError> {
        *self.slot.write().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), WorkflowError> {
        self.slot.write().await.take();
        Ok(())
    }
}

/// Marker stored as a small JSON file; a missing file means no cached session.
pub struct FileSessionCache {
    path: PathBuf,
}

impl FileSessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SessionCache for FileSessionCache {
    async fn load(&self) -> Result<Option<CachedSession>, WorkflowError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(cache_error(&self.path, err)),
        };
        match serde_json::from_slice::<CachedSession>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                warn!(path = %self.path.display(), "ignoring unreadable session cache: {err}");
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &CachedSession) -> Result<(), WorkflowError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| cache_error(parent, err))?;
        }
        let value = serde_json::to_vec_pretty(session)
            .map_err(|err| WorkflowError::Cache(err.to_string()))?;
        tokio::fs::write(&self.path, value)
            .await
            .map_err(|err| cache_error(&self.path, err))
    }

    async fn clear(&self) -> Result<(), WorkflowError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(cache_error(&self.path, err)),
        }
    }
}

fn cache_error(path: &std::path::Path, err: std::io::Error) -> WorkflowError {
    WorkflowError::Cache(format!("{}: {err}", path.display()))
}

pub(crate) fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_cache_round_trips_and_clears() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = FileSessionCache::new(dir.path().join("nested").join("session.json"));
        assert_eq!(cache.load().await?, None);

        let marker = CachedSession::new("injected", None);
        cache.save(&marker).await?;
        assert_eq!(cache.load().await?, Some(marker));

        cache.clear().await?;
        cache.clear().await?;
        assert_eq!(cache.load().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_no_session() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, b"not json").await?;

        let cache = FileSessionCache::new(&path);
        assert_eq!(cache.load().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn memory_cache_clear_is_idempotent() -> anyhow::Result<()> {
        let cache = InMemorySessionCache::default();
        cache.clear().await?;
        cache.save(&CachedSession::new("uauth", Some("token".into()))).await?;
        cache.clear().await?;
        cache.clear().await?;
        assert!(cache.load().await?.is_none());
        Ok(())
    }
}
