//! Request batcher.
//!
//! Delay-tolerant operations (analysis, documentation, reviews) are parked
//! per type and dispatched together on the next flush tick, cutting the
//! number of outbound calls. A type is batched only while it has room and
//! either a structurally similar request is already waiting or overall call
//! volume is high.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use steward_config::BatcherConfig;
use steward_core::clock::elapsed_at_least;
use steward_core::{BatchError, Clock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Handles a whole group of same-type payloads in one call.
///
/// Must return exactly one result per payload, in order.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, op_type: &str, payloads: Vec<Value>)
    -> Result<Vec<Value>, String>;
}

/// Per-item fallback for types with no grouped handler.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle_item(&self, op_type: &str, payload: Value) -> Result<Value, String>;
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Operation types dispatched.
    pub groups: usize,
    /// Operations dispatched across all groups.
    pub items: usize,
    /// Operations that resolved to an error.
    pub failed: usize,
    /// Items per type, for event publishing.
    pub per_type: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatcherStats {
    pub pending: usize,
    pub pending_types: usize,
    pub flushes: u64,
    pub items_flushed: u64,
    pub calls_in_window: usize,
    pub load_ratio: f64,
}

struct PendingOp {
    payload: Value,
    enqueued_at: DateTime<Utc>,
    reply: oneshot::Sender<Result<Value, BatchError>>,
}

#[derive(Default)]
struct BatchState {
    pending: HashMap<String, Vec<PendingOp>>,
    calls: VecDeque<DateTime<Utc>>,
    flushes: u64,
    items_flushed: u64,
}

#[derive(Default)]
struct Handlers {
    batch: HashMap<String, Arc<dyn BatchHandler>>,
    item: HashMap<String, Arc<dyn ItemHandler>>,
    fallback: Option<Arc<dyn ItemHandler>>,
}

pub struct RequestBatcher {
    config: BatcherConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BatchState>,
    handlers: RwLock<Handlers>,
    flushing: AtomicBool,
}

/// Resets the flushing flag even if a handler panics mid-flush.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RequestBatcher {
    pub fn new(config: BatcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(BatchState::default()),
            handlers: RwLock::new(Handlers::default()),
            flushing: AtomicBool::new(false),
        }
    }

    pub fn register_batch_handler(&self, op_type: &str, handler: Arc<dyn BatchHandler>) {
        self.write_handlers().batch.insert(op_type.to_string(), handler);
    }

    pub fn register_item_handler(&self, op_type: &str, handler: Arc<dyn ItemHandler>) {
        self.write_handlers().item.insert(op_type.to_string(), handler);
    }

    /// Item handler for every type without a more specific handler.
    pub fn set_fallback_handler(&self, handler: Arc<dyn ItemHandler>) {
        self.write_handlers().fallback = Some(handler);
    }

    /// Whether an operation of `op_type` carrying `payload` should wait for
    /// the next flush instead of being sent now.
    pub fn should_batch(&self, op_type: &str, payload: &Value) -> bool {
        if !self.config.batchable_types.iter().any(|t| t == op_type) {
            return false;
        }

        let now = self.clock.now();
        let mut state = self.lock();
        let pending = state.pending.get(op_type).map(Vec::as_slice).unwrap_or(&[]);
        if pending.len() >= self.config.max_pending_per_type {
            return false;
        }

        if pending
            .iter()
            .any(|op| structurally_similar(&op.payload, payload))
        {
            return true;
        }

        self.load_ratio_locked(&mut state, now) > self.config.load_threshold
    }

    /// Park an operation until the next flush. The receiver resolves with the
    /// operation's own result.
    pub fn enqueue(
        &self,
        op_type: &str,
        payload: Value,
    ) -> oneshot::Receiver<Result<Value, BatchError>> {
        let (tx, rx) = oneshot::channel();
        let op = PendingOp {
            payload,
            enqueued_at: self.clock.now(),
            reply: tx,
        };
        let depth = {
            let mut state = self.lock();
            let queue = state.pending.entry(op_type.to_string()).or_default();
            queue.push(op);
            queue.len()
        };
        debug!(op_type, depth, "Operation batched");
        rx
    }

    /// Register one outbound call for load measurement.
    pub fn record_call(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.calls.push_back(now);
        self.prune_calls(&mut state, now);
    }

    /// Calls in the current window divided by the configured cap.
    pub fn load_ratio(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.lock();
        self.load_ratio_locked(&mut state, now)
    }

    pub fn pending_count(&self, op_type: &str) -> usize {
        self.lock().pending.get(op_type).map_or(0, Vec::len)
    }

    pub fn pending_total(&self) -> usize {
        self.lock().pending.values().map(Vec::len).sum()
    }

    /// Dispatch everything pending, grouped by type.
    ///
    /// Returns `None` when a previous flush is still running.
    pub async fn flush(&self) -> Option<FlushReport> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already running, skipping");
            return None;
        }
        let _guard = FlushGuard(&self.flushing);

        let groups = std::mem::take(&mut self.lock().pending);
        let mut report = FlushReport::default();
        if groups.is_empty() {
            return Some(report);
        }

        let now = self.clock.now();
        for (op_type, ops) in groups {
            let oldest_ms = ops
                .iter()
                .map(|op| (now - op.enqueued_at).num_milliseconds())
                .max()
                .unwrap_or(0);
            let count = ops.len();
            let failed = self.dispatch_group(&op_type, ops).await;

            debug!(op_type = %op_type, count, failed, oldest_ms, "Batch dispatched");
            report.groups += 1;
            report.items += count;
            report.failed += failed;
            report.per_type.push((op_type, count));
        }

        {
            let mut state = self.lock();
            state.flushes += 1;
            state.items_flushed += report.items as u64;
        }
        info!(
            groups = report.groups,
            items = report.items,
            failed = report.failed,
            "Batches flushed"
        );
        Some(report)
    }

    pub fn stats(&self) -> BatcherStats {
        let now = self.clock.now();
        let mut state = self.lock();
        let load_ratio = self.load_ratio_locked(&mut state, now);
        BatcherStats {
            pending: state.pending.values().map(Vec::len).sum(),
            pending_types: state.pending.values().filter(|v| !v.is_empty()).count(),
            flushes: state.flushes,
            items_flushed: state.items_flushed,
            calls_in_window: state.calls.len(),
            load_ratio,
        }
    }

    // ── Internal ───────────────────────────────────────────────────

    /// Dispatch one group and resolve every receiver. Returns the number of
    /// items that failed.
    async fn dispatch_group(&self, op_type: &str, ops: Vec<PendingOp>) -> usize {
        let (batch, item) = {
            let handlers = self.read_handlers();
            (
                handlers.batch.get(op_type).cloned(),
                handlers
                    .item
                    .get(op_type)
                    .or(handlers.fallback.as_ref())
                    .cloned(),
            )
        };
        let timeout = self.config.handler_timeout();

        if let Some(handler) = batch {
            self.record_call();
            let (payloads, replies): (Vec<_>, Vec<_>) =
                ops.into_iter().map(|op| (op.payload, op.reply)).unzip();
            let expected = payloads.len();

            let outcome =
                tokio::time::timeout(timeout, handler.handle_batch(op_type, payloads)).await;
            let results: Vec<Result<Value, BatchError>> = match outcome {
                Ok(Ok(values)) if values.len() == expected => values.into_iter().map(Ok).collect(),
                Ok(Ok(values)) => {
                    let err = BatchError::ResultCountMismatch {
                        op_type: op_type.to_string(),
                        expected,
                        got: values.len(),
                    };
                    warn!(op_type, error = %err, "Batch handler result mismatch");
                    vec![Err(err); expected]
                }
                Ok(Err(reason)) => {
                    warn!(op_type, reason = %reason, "Batch handler failed");
                    vec![
                        Err(BatchError::HandlerFailed {
                            op_type: op_type.to_string(),
                            reason,
                        });
                        expected
                    ]
                }
                Err(_) => {
                    warn!(
                        op_type,
                        timeout_ms = timeout.as_millis() as u64,
                        "Batch handler timed out"
                    );
                    vec![
                        Err(BatchError::Timeout {
                            op_type: op_type.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                        expected
                    ]
                }
            };

            let failed = results.iter().filter(|r| r.is_err()).count();
            for (reply, result) in replies.into_iter().zip(results) {
                let _ = reply.send(result);
            }
            return failed;
        }

        if let Some(handler) = item {
            let mut failed = 0;
            for op in ops {
                self.record_call();
                let result =
                    match tokio::time::timeout(timeout, handler.handle_item(op_type, op.payload))
                        .await
                    {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(reason)) => Err(BatchError::HandlerFailed {
                            op_type: op_type.to_string(),
                            reason,
                        }),
                        Err(_) => Err(BatchError::Timeout {
                            op_type: op_type.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        }),
                    };
                if let Err(e) = &result {
                    warn!(op_type, error = %e, "Batched item failed");
                    failed += 1;
                }
                let _ = op.reply.send(result);
            }
            return failed;
        }

        warn!(op_type, count = ops.len(), "No handler for batched operations");
        let count = ops.len();
        for op in ops {
            let _ = op.reply.send(Err(BatchError::NoHandler(op_type.to_string())));
        }
        count
    }

    fn prune_calls(&self, state: &mut BatchState, now: DateTime<Utc>) {
        let window = self.config.volume_window();
        while let Some(front) = state.calls.front() {
            if elapsed_at_least(now, *front, window) {
                state.calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn load_ratio_locked(&self, state: &mut BatchState, now: DateTime<Utc>) -> f64 {
        self.prune_calls(state, now);
        state.calls.len() as f64 / self.config.max_calls_per_window.max(1) as f64
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_handlers(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_handlers(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Two payloads are similar when both are objects with the same top-level
/// keys, or both are the same non-object JSON kind.
pub fn structurally_similar(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.keys().collect::<BTreeSet<_>>() == y.keys().collect::<BTreeSet<_>>()
        }
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}
