//! Remote execution seam.
//!
//! The executor calls this only for queued tasks that no local processor can
//! handle. The actual remote assistant lives outside the core.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;
use crate::task::Task;

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// The executor name, for logs.
    fn name(&self) -> &str;

    /// Execute the task remotely and return its result.
    async fn execute(&self, task: &Task) -> Result<Value, RemoteError>;
}

/// A remote executor that refuses every task.
///
/// Used when no remote collaborator is wired up: queued tasks then fail with
/// a recorded message instead of waiting forever.
pub struct UnavailableRemote;

#[async_trait]
impl RemoteExecutor for UnavailableRemote {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn execute(&self, _task: &Task) -> Result<Value, RemoteError> {
        Err(RemoteError::NotConfigured)
    }
}
