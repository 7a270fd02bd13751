//! Key-value store implementations for Steward.
//!
//! The persistence engine proper is an external collaborator; these are the
//! reference backends the runtime can be configured with.

pub mod file;
pub mod in_memory;
pub mod noop;

pub use file::FileStore;
pub use in_memory::InMemoryStore;
pub use noop::NoopStore;

use std::path::PathBuf;
use std::sync::Arc;
use steward_core::KeyValueStore;

/// Build a store from its configured backend name.
///
/// Unknown names fall back to the in-memory store with a warning; config
/// validation rejects them before this point in normal operation.
pub fn from_backend(backend: &str, data_dir: PathBuf) -> Arc<dyn KeyValueStore> {
    match backend {
        "file" => Arc::new(FileStore::new(data_dir)),
        "none" => Arc::new(NoopStore),
        "memory" => Arc::new(InMemoryStore::new()),
        other => {
            tracing::warn!(backend = other, "Unknown store backend, using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names() {
        let dir = std::env::temp_dir();
        assert_eq!(from_backend("file", dir.clone()).name(), "file");
        assert_eq!(from_backend("none", dir.clone()).name(), "none");
        assert_eq!(from_backend("memory", dir.clone()).name(), "memory");
        assert_eq!(from_backend("redis", dir).name(), "memory");
    }
}
