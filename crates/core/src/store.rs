//! Key-value persistence seam.
//!
//! The context store and the decision engine persist bounded slices of their
//! state through this trait. The persistence engine itself lives outside the
//! core; `steward-store` ships in-memory, file and no-op implementations.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::StoreError;

/// The core KeyValueStore trait.
///
/// Implementations: in-memory (for testing), file (one JSON document per
/// key), none (no-op).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "none").
    fn name(&self) -> &str;

    /// Fetch the JSON stored under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key`. Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Outcome of writing a component's state to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PersistReport {
    /// Keys written.
    pub keys_written: usize,
    /// Entries serialized across all keys.
    pub entries_written: usize,
}

/// Outcome of restoring a component's state from the store.
///
/// `restored == 0 && dropped == 0` means there was no prior state;
/// a non-zero `dropped` means corrupt entries were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LoadReport {
    /// Entries restored.
    pub restored: usize,
    /// Entries (or whole keys) dropped because they were corrupt.
    pub dropped: usize,
    /// Keys that were not present in the store.
    pub missing_keys: usize,
}

impl LoadReport {
    pub fn merge(&mut self, other: LoadReport) {
        self.restored += other.restored;
        self.dropped += other.dropped;
        self.missing_keys += other.missing_keys;
    }
}

/// `store.get(key)` bounded by `timeout`.
pub async fn get_with_timeout(
    store: &dyn KeyValueStore,
    key: &str,
    timeout: Duration,
) -> Result<Option<Value>, StoreError> {
    tokio::time::timeout(timeout, store.get(key))
        .await
        .map_err(|_| StoreError::Timeout {
            key: key.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
}

/// `store.set(key, value)` bounded by `timeout`.
pub async fn set_with_timeout(
    store: &dyn KeyValueStore,
    key: &str,
    value: Value,
    timeout: Duration,
) -> Result<(), StoreError> {
    tokio::time::timeout(timeout, store.set(key, value))
        .await
        .map_err(|_| StoreError::Timeout {
            key: key.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })?
}

/// Fetch and decode one persisted array, folding read failures into the
/// report as a dropped key.
pub async fn load_entries<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
    timeout: Duration,
) -> (Vec<T>, LoadReport) {
    match get_with_timeout(store, key, timeout).await {
        Ok(stored) => decode_entries(key, stored),
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read persisted state, starting empty");
            (
                Vec::new(),
                LoadReport {
                    dropped: 1,
                    ..LoadReport::default()
                },
            )
        }
    }
}

/// Decode a stored JSON array into typed entries, dropping the ones that do
/// not deserialize.
///
/// A stored JSON string is parsed first, so string-serialized stores (the
/// common shape of browser-era data) load the same way. A value that is not
/// an array, or a string that is not valid JSON, yields no entries and
/// counts as one dropped key.
pub fn decode_entries<T: serde::de::DeserializeOwned>(
    key: &str,
    stored: Option<Value>,
) -> (Vec<T>, LoadReport) {
    let mut report = LoadReport::default();

    let Some(value) = stored else {
        report.missing_keys = 1;
        return (Vec::new(), report);
    };

    let value = match value {
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(key, error = %e, "Stored value is not valid JSON, starting empty");
                report.dropped = 1;
                return (Vec::new(), report);
            }
        },
        other => other,
    };

    let Value::Array(items) = value else {
        tracing::warn!(key, "Stored value is not an array, starting empty");
        report.dropped = 1;
        return (Vec::new(), report);
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<T>(item) {
            Ok(entry) => {
                report.restored += 1;
                entries.push(entry);
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Skipping corrupted persisted entry");
                report.dropped += 1;
            }
        }
    }

    (entries, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    #[test]
    fn decode_missing_key() {
        let (items, report) = decode_entries::<Item>("k", None);
        assert!(items.is_empty());
        assert_eq!(report.missing_keys, 1);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn decode_drops_only_corrupt_entries() {
        let stored = serde_json::json!([{"id": 1}, {"id": "nope"}, {"id": 3}]);
        let (items, report) = decode_entries::<Item>("k", Some(stored));
        assert_eq!(items, vec![Item { id: 1 }, Item { id: 3 }]);
        assert_eq!(report.restored, 2);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn decode_string_serialized_array() {
        let stored = Value::String(r#"[{"id": 7}]"#.into());
        let (items, _) = decode_entries::<Item>("k", Some(stored));
        assert_eq!(items, vec![Item { id: 7 }]);
    }

    #[test]
    fn decode_malformed_string_is_empty() {
        let stored = Value::String("{not json".into());
        let (items, report) = decode_entries::<Item>("k", Some(stored));
        assert!(items.is_empty());
        assert_eq!(report.dropped, 1);
    }

    struct Stalled;

    #[async_trait]
    impl KeyValueStore for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_calls_time_out() {
        let err = set_with_timeout(&Stalled, "k", Value::Null, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout { timeout_ms: 50, .. }));

        let (items, report) = load_entries::<Item>(&Stalled, "k", Duration::from_millis(50)).await;
        assert!(items.is_empty());
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn decode_non_array_is_empty() {
        let (items, report) = decode_entries::<Item>("k", Some(serde_json::json!({"id": 1})));
        assert!(items.is_empty());
        assert_eq!(report.dropped, 1);
    }
}
