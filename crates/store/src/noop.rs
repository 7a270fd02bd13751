//! No-op store: disables persistence entirely.

use async_trait::async_trait;
use serde_json::Value;
use steward_core::{KeyValueStore, StoreError};

/// A store that keeps nothing. Every load starts empty.
pub struct NoopStore;

#[async_trait]
impl KeyValueStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}
