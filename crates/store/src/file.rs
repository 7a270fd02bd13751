//! File-based store: one JSON document per key.
//!
//! Storage location: `~/.steward/data/<key>.json` by default.
//!
//! Writes go to a temporary sibling file first and are renamed into place,
//! so a crash mid-write leaves either the old document or the new one.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use steward_core::{KeyValueStore, StoreError};
use tracing::debug;
use uuid::Uuid;

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: PathBuf) -> Self {
        debug!(dir = %dir.display(), "File store opened");
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document holding `key`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are escaped as `~XX` so every key
    /// maps to a distinct, portable file name.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 5);
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
                name.push(byte as char);
            } else {
                name.push_str(&format!("~{byte:02X}"));
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Backend(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StoreError::Backend(format!("Failed to create store directory: {e}"))
        })?;

        let content = serde_json::to_vec(&value)
            .map_err(|e| StoreError::Backend(format!("Failed to serialize '{key}': {e}")))?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to write '{key}': {e}")))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Backend(format!("Failed to replace '{key}': {e}")));
        }

        debug!(key, bytes = content.len(), "Stored document");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Backend(format!("Failed to delete '{key}': {e}"))),
        }
    }
}
