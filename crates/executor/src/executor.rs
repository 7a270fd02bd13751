//! The task executor.
//!
//! Task records and the queue share one lock. Processors and the remote
//! executor always run with that lock released; drained tasks each run on
//! their own tokio task so a panic only fails that task.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use steward_cache::TieredCache;
use steward_config::ExecutorConfig;
use steward_context::ContextStore;
use steward_core::clock::elapsed_at_least;
use steward_core::{
    Clock, DomainEvent, EventBus, ExecutionRoute, QueueProbe, RemoteExecutor, Task, TaskError,
    TaskProcessor, TaskSpec, TaskStatus,
};
use tracing::{debug, info, warn};

use crate::simple::builtin_processors;

/// Outcome of one drain tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub cache_hits: u64,
    pub local_runs: u64,
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub queue_depth: usize,
    pub running: usize,
    pub tracked_tasks: usize,
}

struct QueueSlot {
    id: String,
    priority: steward_core::TaskPriority,
    seq: u64,
}

#[derive(Default)]
struct ExecutorState {
    tasks: HashMap<String, Task>,
    queue: Vec<QueueSlot>,
    next_seq: u64,
    stats: ExecutorStats,
}

pub struct TaskExecutor {
    config: ExecutorConfig,
    cache: Arc<TieredCache>,
    context: Arc<ContextStore>,
    remote: Arc<dyn RemoteExecutor>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
    processors: RwLock<HashMap<String, Arc<dyn TaskProcessor>>>,
    builtins: HashMap<String, Arc<dyn TaskProcessor>>,
    state: Mutex<ExecutorState>,
    draining: AtomicBool,
}

/// Resets the draining flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        cache: Arc<TieredCache>,
        context: Arc<ContextStore>,
        remote: Arc<dyn RemoteExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let builtins = builtin_processors()
            .into_iter()
            .map(|p| (p.task_type().to_string(), p))
            .collect();
        Self {
            config,
            cache,
            context,
            remote,
            clock,
            events: None,
            processors: RwLock::new(HashMap::new()),
            builtins,
            state: Mutex::new(ExecutorState::default()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Register a processor under its task type, replacing any previous one.
    pub fn register_local_processor(&self, processor: Arc<dyn TaskProcessor>) {
        let task_type = processor.task_type().to_string();
        info!(task_type = %task_type, "Registered local processor");
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_type, processor);
    }

    pub fn has_processor(&self, task_type: &str) -> bool {
        self.registered(task_type).is_some()
    }

    /// Whether `spec` is a pure, small-input transform.
    pub fn is_simple(&self, spec: &TaskSpec) -> bool {
        self.config
            .simple_task_types
            .iter()
            .any(|t| t == &spec.task_type)
            && serde_json::to_vec(&spec.parameters)
                .map(|b| b.len() <= self.config.simple_max_input_bytes)
                .unwrap_or(false)
    }

    /// Submit a task. Returns it already completed (cache hit or local run,
    /// possibly failed) or queued.
    pub async fn execute_task(&self, spec: TaskSpec) -> Task {
        let now = self.clock.now();
        let key = task_cache_key(&spec.task_type, &spec.parameters);

        if let Some(cached) = self.cache.get(&key, &self.config.cache_category) {
            let mut task = Task::from_spec(spec, ExecutionRoute::Cache, now);
            task.mark_running(now);
            task.complete(cached, now);
            debug!(task_id = %task.id, task_type = %task.task_type, "Task answered from cache");
            {
                let mut state = self.lock();
                state.stats.submitted += 1;
                state.stats.cache_hits += 1;
                state.stats.completed += 1;
                state.tasks.insert(task.id.clone(), task.clone());
            }
            self.publish_completed(&task);
            return task;
        }

        if self.registered(&spec.task_type).is_some() || self.is_simple(&spec) {
            let task = Task::from_spec(spec, ExecutionRoute::Local, now);
            {
                let mut state = self.lock();
                state.stats.submitted += 1;
                state.stats.local_runs += 1;
            }
            return self.process_task_locally(task).await;
        }

        let task = Task::from_spec(spec, ExecutionRoute::Queued, now);
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueueSlot {
                id: task.id.clone(),
                priority: task.priority,
                seq,
            });
            state.tasks.insert(task.id.clone(), task.clone());
            state.stats.submitted += 1;
            state.stats.queued += 1;
        }
        self.context
            .update_task_context(&task.describe(), task.status.as_str());
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = %task.priority,
            "Task queued"
        );
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::TaskQueued {
                task_id: task.id.clone(),
                task_type: task.task_type.clone(),
                timestamp: now,
            });
        }
        task
    }

    /// Run `task` inline through its processor and record the outcome.
    /// Failures, timeouts and panics all end as a `failed` task.
    pub async fn process_task_locally(&self, mut task: Task) -> Task {
        task.mark_running(self.clock.now());
        self.track(&task);

        let outcome = match self.local_processor(&task.task_type) {
            Some(processor) => {
                run_processor(processor, task.parameters.clone(), self.config.local_timeout())
                    .await
            }
            None => Err(TaskError::NoProcessor(task.task_type.clone()).to_string()),
        };
        self.finish(task, outcome)
    }

    /// Pop up to `max_concurrent` queued tasks, highest priority first, and
    /// run them side by side. Returns `None` when a drain is already running.
    pub async fn drain_queue(&self) -> Option<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Queue drain already running, skipping");
            return None;
        }
        let _guard = DrainGuard(&self.draining);

        let batch = self.pop_batch();
        let mut report = DrainReport {
            started: batch.len(),
            ..DrainReport::default()
        };
        if batch.is_empty() {
            return Some(report);
        }

        let handles: Vec<_> = batch
            .iter()
            .map(|task| {
                let work = self.dispatch_plan(task);
                tokio::spawn(work)
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        for (task, joined) in batch.into_iter().zip(results) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(format!("task aborted: {e}")),
            };
            let finished = self.finish(task, outcome);
            match finished.status {
                TaskStatus::Completed => report.completed += 1,
                _ => report.failed += 1,
            }
        }

        info!(
            started = report.started,
            completed = report.completed,
            failed = report.failed,
            "Drained task queue"
        );
        Some(report)
    }

    /// Cancel a task that has not started yet.
    pub fn cancel_task(&self, id: &str) -> Result<Task, TaskError> {
        let now = self.clock.now();
        let task = {
            let mut state = self.lock();
            let task = state
                .tasks
                .get_mut(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if task.status != TaskStatus::Queued {
                return Err(TaskError::NotCancellable {
                    id: id.to_string(),
                    status: task.status.to_string(),
                });
            }
            task.status = TaskStatus::Cancelled;
            task.finished_at = Some(now);
            let task = task.clone();
            state.queue.retain(|slot| slot.id != id);
            state.stats.cancelled += 1;
            task
        };
        self.context
            .update_task_context(&task.describe(), task.status.as_str());
        info!(task_id = %id, "Task cancelled");
        Ok(task)
    }

    /// Drop terminal tasks that finished longer ago than the retention
    /// window. Returns how many were removed.
    pub fn purge_history(&self) -> usize {
        let now = self.clock.now();
        let retention =
            Duration::from_secs(self.config.history_retention_hours.max(0) as u64 * 3600);
        let mut state = self.lock();
        let before = state.tasks.len();
        state.tasks.retain(|_, t| {
            !(t.status.is_terminal()
                && t
                    .finished_at
                    .is_some_and(|at| elapsed_at_least(now, at, retention)))
        });
        let purged = before - state.tasks.len();
        if purged > 0 {
            debug!(purged, "Purged finished tasks");
        }
        purged
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    /// Queued tasks in drain order.
    pub fn queued_tasks(&self) -> Vec<Task> {
        let state = self.lock();
        let mut slots: Vec<&QueueSlot> = state.queue.iter().collect();
        slots.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        slots
            .into_iter()
            .filter_map(|s| state.tasks.get(&s.id).cloned())
            .collect()
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    pub fn stats(&self) -> ExecutorStats {
        let state = self.lock();
        ExecutorStats {
            queue_depth: state.queue.len(),
            running: state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .count(),
            tracked_tasks: state.tasks.len(),
            ..state.stats.clone()
        }
    }

    // ── Internal ───────────────────────────────────────────────────

    fn registered(&self, task_type: &str) -> Option<Arc<dyn TaskProcessor>> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }

    /// Registered processor first, then the built-in for simple types.
    fn local_processor(&self, task_type: &str) -> Option<Arc<dyn TaskProcessor>> {
        self.registered(task_type).or_else(|| {
            self.config
                .simple_task_types
                .iter()
                .any(|t| t == task_type)
                .then(|| self.builtins.get(task_type).cloned())
                .flatten()
        })
    }

    /// Take the highest-priority queued tasks and mark them running.
    fn pop_batch(&self) -> Vec<Task> {
        let now = self.clock.now();
        let mut state = self.lock();
        state
            .queue
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        let take = state.queue.len().min(self.config.max_concurrent);
        let slots: Vec<QueueSlot> = state.queue.drain(..take).collect();

        let mut batch = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(task) = state.tasks.get_mut(&slot.id) {
                task.mark_running(now);
                batch.push(task.clone());
            }
        }
        batch
    }

    /// The future that runs one drained task, detached from `self`.
    fn dispatch_plan(
        &self,
        task: &Task,
    ) -> impl std::future::Future<Output = Result<Value, String>> + Send + 'static {
        let processor = self.local_processor(&task.task_type);
        let remote = self.remote.clone();
        let local_timeout = self.config.local_timeout();
        let remote_timeout = self.config.remote_timeout();
        let task = task.clone();

        async move {
            match processor {
                Some(processor) => run_processor(processor, task.parameters, local_timeout).await,
                None => match tokio::time::timeout(remote_timeout, remote.execute(&task)).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(steward_core::RemoteError::Timeout {
                        timeout_ms: remote_timeout.as_millis() as u64,
                    }
                    .to_string()),
                },
            }
        }
    }

    /// Record a terminal outcome: task record, cache, context, events.
    fn finish(&self, mut task: Task, outcome: Result<Value, String>) -> Task {
        let now = self.clock.now();
        match outcome {
            Ok(result) => {
                let key = task_cache_key(&task.task_type, &task.parameters);
                self.cache
                    .set(&key, &self.config.cache_category, result.clone());
                task.complete(result, now);
            }
            Err(message) => {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    error = %message,
                    "Task failed"
                );
                task.fail(message, now);
            }
        }

        {
            let mut state = self.lock();
            match task.status {
                TaskStatus::Completed => state.stats.completed += 1,
                _ => state.stats.failed += 1,
            }
            state.tasks.insert(task.id.clone(), task.clone());
        }
        self.context
            .update_task_context(&task.describe(), task.status.as_str());

        match task.status {
            TaskStatus::Completed => self.publish_completed(&task),
            _ => {
                if let Some(bus) = &self.events {
                    bus.publish(DomainEvent::TaskFailed {
                        task_id: task.id.clone(),
                        task_type: task.task_type.clone(),
                        error_message: task.error.clone().unwrap_or_default(),
                        timestamp: now,
                    });
                }
            }
        }
        task
    }

    fn track(&self, task: &Task) {
        self.lock().tasks.insert(task.id.clone(), task.clone());
    }

    fn publish_completed(&self, task: &Task) {
        debug!(task_id = %task.id, route = ?task.route, "Task completed");
        if let Some(bus) = &self.events {
            let route = match task.route {
                ExecutionRoute::Cache => "cache",
                ExecutionRoute::Local => "local",
                ExecutionRoute::Queued => "queued",
            };
            bus.publish(DomainEvent::TaskCompleted {
                task_id: task.id.clone(),
                task_type: task.task_type.clone(),
                route: route.to_string(),
                timestamp: task.finished_at.unwrap_or_else(|| self.clock.now()),
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecutorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueProbe for TaskExecutor {
    fn queue_depth(&self) -> usize {
        TaskExecutor::queue_depth(self)
    }
}

/// Run a processor with a timeout, turning errors and panics into messages.
async fn run_processor(
    processor: Arc<dyn TaskProcessor>,
    parameters: Value,
    timeout: Duration,
) -> Result<Value, String> {
    let task_type = processor.task_type().to_string();
    let work = AssertUnwindSafe(async move { processor.process(&parameters).await }).catch_unwind();
    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(panic)) => Err(TaskError::ProcessingFailed {
            task_type,
            reason: panic_message(panic.as_ref()),
        }
        .to_string()),
        Err(_) => Err(TaskError::Timeout {
            task_type,
            timeout_ms: timeout.as_millis() as u64,
        }
        .to_string()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "processor panicked".to_string())
}

/// Cache key for a task: `task:` + hex SHA-256 of the type and the
/// key-sorted JSON of its parameters.
pub fn task_cache_key(task_type: &str, parameters: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(parameters, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(task_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    format!("task:{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use steward_config::{CacheConfig, ContextConfig};
    use steward_core::{ManualClock, RemoteError, TaskPriority, UnavailableRemote};

    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskProcessor for Counting {
        fn task_type(&self) -> &str {
            self.name
        }

        async fn process(&self, parameters: &Value) -> Result<Value, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match parameters.get("mode").and_then(Value::as_str) {
                Some("fail") => Err(TaskError::ProcessingFailed {
                    task_type: self.name.into(),
                    reason: "asked to fail".into(),
                }),
                Some("panic") => panic!("processor exploded"),
                Some("slow") => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(json!("late"))
                }
                _ => Ok(json!({"echo": parameters})),
            }
        }
    }

    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteExecutor for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn execute(&self, task: &Task) -> Result<Value, RemoteError> {
            self.seen.lock().unwrap().push(task.task_type.clone());
            if task.parameters.get("mode").and_then(Value::as_str) == Some("fail") {
                return Err(RemoteError::Failed("remote said no".into()));
            }
            Ok(json!({"remote": task.task_type}))
        }
    }

    fn executor_with(remote: Arc<dyn RemoteExecutor>) -> (TaskExecutor, Arc<ContextStore>) {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Arc::new(TieredCache::new(&CacheConfig::default(), clock.clone()));
        let context = Arc::new(ContextStore::new(ContextConfig::default(), clock.clone()));
        let exec = TaskExecutor::new(
            ExecutorConfig::default(),
            cache,
            context.clone(),
            remote,
            clock,
        );
        (exec, context)
    }

    fn executor() -> TaskExecutor {
        executor_with(Arc::new(UnavailableRemote)).0
    }

    fn counting(name: &'static str) -> Arc<Counting> {
        Arc::new(Counting {
            name,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn cache_key_ignores_key_order() {
        let a = task_cache_key("lint", &json!({"a": 1, "b": {"y": 2, "x": 1}}));
        let b = task_cache_key("lint", &json!({"b": {"x": 1, "y": 2}, "a": 1}));
        assert_eq!(a, b);
        assert!(a.starts_with("task:"));
        assert_eq!(a.len(), "task:".len() + 64);
        assert_ne!(a, task_cache_key("format", &json!({"a": 1, "b": {"y": 2, "x": 1}})));
    }

    #[tokio::test]
    async fn registered_processor_runs_inline_then_hits_cache() {
        let exec = executor();
        let lint = counting("lint");
        exec.register_local_processor(lint.clone());

        let spec = TaskSpec::new("lint", json!({"path": "src/lib.rs"}));
        let first = exec.execute_task(spec.clone()).await;
        assert_eq!(first.route, ExecutionRoute::Local);
        assert_eq!(first.status, TaskStatus::Completed);

        let second = exec.execute_task(spec).await;
        assert_eq!(second.route, ExecutionRoute::Cache);
        assert_eq!(second.result, first.result);
        assert_eq!(lint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(exec.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn simple_types_use_builtins() {
        let exec = executor();
        let task = exec
            .execute_task(TaskSpec::new("word_count", json!({"text": "one two three"})))
            .await;
        assert_eq!(task.route, ExecutionRoute::Local);
        assert_eq!(task.result.unwrap()["words"], 3);
    }

    #[tokio::test]
    async fn oversized_simple_task_is_queued() {
        let exec = executor();
        let big = "x".repeat(20 * 1024);
        let task = exec
            .execute_task(TaskSpec::new("word_count", json!({"text": big})))
            .await;
        assert_eq!(task.route, ExecutionRoute::Queued);
        assert_eq!(exec.queue_depth(), 1);
    }

    #[tokio::test]
    async fn processor_error_is_recorded() {
        let exec = executor();
        exec.register_local_processor(counting("lint"));
        let task = exec
            .execute_task(TaskSpec::new("lint", json!({"mode": "fail"})))
            .await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("asked to fail"));
        assert_eq!(exec.stats().failed, 1);
    }

    #[tokio::test]
    async fn processor_panic_is_recorded() {
        let exec = executor();
        exec.register_local_processor(counting("lint"));
        let task = exec
            .execute_task(TaskSpec::new("lint", json!({"mode": "panic"})))
            .await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("processor exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_processor_times_out() {
        let exec = executor();
        exec.register_local_processor(counting("lint"));
        let task = exec
            .execute_task(TaskSpec::new("lint", json!({"mode": "slow"})))
            .await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_type_is_queued_then_fails_without_remote() {
        let (exec, context) = executor_with(Arc::new(UnavailableRemote));
        let task = exec
            .execute_task(
                TaskSpec::new("unregistered_type", json!({})).with_description("mystery job"),
            )
            .await;
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(
            context.task_entry("mystery-job").map(|e| e.status),
            Some("queued".to_string())
        );

        let report = exec.drain_queue().await.unwrap();
        assert_eq!(report.started, 1);
        assert_eq!(report.failed, 1);
        let task = exec.get_task(&task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("No remote executor"));
        assert_eq!(
            context.task_entry("mystery-job").map(|e| e.status),
            Some("failed".to_string())
        );
    }

    #[tokio::test]
    async fn drain_respects_priority_and_limit() {
        let remote = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let (exec, _) = executor_with(remote.clone());
        for (ty, p) in [
            ("low1", TaskPriority::Low),
            ("normal1", TaskPriority::Normal),
            ("high1", TaskPriority::High),
            ("normal2", TaskPriority::Normal),
            ("critical1", TaskPriority::Critical),
        ] {
            exec.execute_task(TaskSpec::new(ty, json!({})).with_priority(p))
                .await;
        }

        let queued: Vec<String> = exec.queued_tasks().into_iter().map(|t| t.task_type).collect();
        assert_eq!(queued, vec!["critical1", "high1", "normal1", "normal2", "low1"]);

        let report = exec.drain_queue().await.unwrap();
        assert_eq!(report.started, 3);
        assert_eq!(report.completed, 3);
        let mut seen = remote.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["critical1", "high1", "normal1"]);
        assert_eq!(exec.queue_depth(), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_siblings() {
        let (exec, _) = executor_with(Arc::new(UnavailableRemote));
        let p = counting("job");
        // Queue first, register afterwards so the drain uses the processor.
        let specs = [json!({"mode": "ok"}), json!({"mode": "panic"}), json!({"mode": "fail"})];
        let mut ids = Vec::new();
        for params in specs {
            ids.push(exec.execute_task(TaskSpec::new("job", params)).await.id);
        }
        exec.register_local_processor(p.clone());

        let report = exec.drain_queue().await.unwrap();
        assert_eq!(report.started, 3);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 2);
        let statuses: Vec<TaskStatus> = ids
            .iter()
            .map(|id| exec.get_task(id).unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Failed]
        );
    }

    #[tokio::test]
    async fn cancel_only_queued() {
        let exec = executor();
        let queued = exec.execute_task(TaskSpec::new("later", json!({}))).await;
        let done = exec
            .execute_task(TaskSpec::new("line_count", json!({"text": "a"})))
            .await;

        let cancelled = exec.cancel_task(&queued.id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(exec.queue_depth(), 0);

        assert!(matches!(
            exec.cancel_task(&done.id),
            Err(TaskError::NotCancellable { .. })
        ));
        assert!(matches!(exec.cancel_task("nope"), Err(TaskError::NotFound(_))));
        // A cancelled task is never drained.
        assert_eq!(exec.drain_queue().await.unwrap().started, 0);
    }

    #[tokio::test]
    async fn purge_drops_old_terminal_tasks() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Arc::new(TieredCache::new(&CacheConfig::default(), clock.clone()));
        let context = Arc::new(ContextStore::new(ContextConfig::default(), clock.clone()));
        let exec = TaskExecutor::new(
            ExecutorConfig::default(),
            cache,
            context,
            Arc::new(UnavailableRemote),
            clock.clone(),
        );

        let done = exec
            .execute_task(TaskSpec::new("line_count", json!({"text": "a"})))
            .await;
        let queued = exec.execute_task(TaskSpec::new("later", json!({}))).await;

        clock.advance(Duration::from_secs(23 * 3600));
        assert_eq!(exec.purge_history(), 0);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(exec.purge_history(), 1);
        assert!(exec.get_task(&done.id).is_none());
        assert!(exec.get_task(&queued.id).is_some());
    }

    #[tokio::test]
    async fn drain_does_not_reenter() {
        let exec = executor();
        exec.draining.store(true, Ordering::Release);
        assert!(exec.drain_queue().await.is_none());
    }
}
