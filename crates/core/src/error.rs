//! Error types for the Steward domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Steward operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Remote execution errors ---
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    // --- Task errors ---
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    // --- Decision errors ---
    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    // --- Batching errors ---
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage backend failure: {0}")]
    Backend(String),

    #[error("Stored value for '{key}' is not valid JSON: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Store operation on '{key}' timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },
}

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("No remote executor configured")]
    NotConfigured,

    #[error("Remote execution failed: {0}")]
    Failed(String),

    #[error("Remote execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("No processor registered for task type '{0}'")]
    NoProcessor(String),

    #[error("Task processing failed: {task_type}: {reason}")]
    ProcessingFailed { task_type: String, reason: String },

    #[error("Invalid task parameters: {0}")]
    InvalidParameters(String),

    #[error("Task timed out: {task_type} after {timeout_ms}ms")]
    Timeout { task_type: String, timeout_ms: u64 },

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {id} cannot be cancelled in state {status}")]
    NotCancellable { id: String, status: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    #[error("Unknown decision: {category}.{action}")]
    UnknownDecision { category: String, action: String },

    #[error("Rule {category}.{action} failed: {reason}")]
    RuleFailed {
        category: String,
        action: String,
        reason: String,
    },

    #[error("Context enrichment failed: {0}")]
    Enrichment(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("No batch or item handler for operation type '{0}'")]
    NoHandler(String),

    #[error("Batch handler for '{op_type}' failed: {reason}")]
    HandlerFailed { op_type: String, reason: String },

    #[error("Batch handler for '{op_type}' returned {got} results for {expected} items")]
    ResultCountMismatch {
        op_type: String,
        expected: usize,
        got: usize,
    },

    #[error("Batch handler for '{op_type}' timed out after {timeout_ms}ms")]
    Timeout { op_type: String, timeout_ms: u64 },

    #[error("Batcher shut down before the operation was flushed")]
    Dropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_error_displays_correctly() {
        let err = Error::Decision(DecisionError::UnknownDecision {
            category: "file_operation".into(),
            action: "canFly".into(),
        });
        assert!(err.to_string().contains("file_operation.canFly"));
    }

    #[test]
    fn task_error_displays_correctly() {
        let err = Error::Task(TaskError::ProcessingFailed {
            task_type: "word_count".into(),
            reason: "missing text".into(),
        });
        assert!(err.to_string().contains("word_count"));
        assert!(err.to_string().contains("missing text"));
    }

    #[test]
    fn batch_mismatch_mentions_counts() {
        let err = BatchError::ResultCountMismatch {
            op_type: "analysis".into(),
            expected: 3,
            got: 1,
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains('1'));
    }
}
