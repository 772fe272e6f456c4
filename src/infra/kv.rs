//! Durable key-value stores holding the persisted map snapshot.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::application::ports::{KeyValueStore, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    /// Unix seconds after which the value reads as absent.
    expires_at: i64,
    value: Value,
}

impl Envelope {
    fn new(value: Value, ttl: Duration, now: OffsetDateTime) -> Self {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            expires_at: now.unix_timestamp().saturating_add(ttl_secs),
            value,
        }
    }

    fn is_live(&self, now: OffsetDateTime) -> bool {
        now.unix_timestamp() < self.expires_at
    }
}

/// One JSON envelope file per key, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    directory: PathBuf,
}

impl FileKvStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory.join(format!("{file}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        if !envelope.is_live(OffsetDateTime::now_utc()) {
            debug!(
                target = "canopy::infra::kv",
                key,
                path = %path.display(),
                "stored value expired"
            );
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let envelope = Envelope::new(value, ttl, OffsetDateTime::now_utc());
        let bytes = serde_json::to_vec(&envelope)?;

        let target = self.path_for(key);
        let staging = self
            .directory
            .join(format!(".{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&staging, &bytes).await?;
        if let Err(err) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }
}

/// Process-local store with the same expiry semantics as [`FileKvStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Envelope>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.entries.read().await;
        Ok(guard
            .get(key)
            .filter(|envelope| envelope.is_live(OffsetDateTime::now_utc()))
            .map(|envelope| envelope.value.clone()))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let envelope = Envelope::new(value, ttl, OffsetDateTime::now_utc());
        self.entries.write().await.insert(key.to_string(), envelope);
        Ok(())
    }
}
