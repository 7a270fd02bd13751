//! End-to-end tests for the Steward service.
//!
//! Every test drives a fully wired service with a manual clock and a manual
//! scheduler, so TTLs, periodic jobs and retention are deterministic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use steward_config::AppConfig;
use steward_core::{
    DomainEvent, KeyValueStore, ManualClock, RemoteError, RemoteExecutor, Task, TaskSpec,
    TaskStatus,
};
use steward_decision::DecisionMethod;
use steward_runtime::{HealthStatus, JOB_TASK_DRAIN, Steward};
use steward_scheduler::ManualScheduler;
use steward_store::InMemoryStore;

// ── Doubles ──────────────────────────────────────────────────────────────

/// A remote executor that answers every task with its type.
struct EchoRemote;

#[async_trait::async_trait]
impl RemoteExecutor for EchoRemote {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, task: &Task) -> Result<Value, RemoteError> {
        Ok(json!({"handled": task.task_type}))
    }
}

struct Harness {
    steward: Arc<Steward>,
    clock: Arc<ManualClock>,
    scheduler: ManualScheduler,
    store: InMemoryStore,
}

fn harness_with(store: InMemoryStore, remote: Option<Arc<dyn RemoteExecutor>>) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let mut config = AppConfig::default();
    config.storage.backend = "memory".into();

    let mut builder = Steward::builder(config)
        .clock(clock.clone())
        .store(Arc::new(store.clone()));
    if let Some(remote) = remote {
        builder = builder.remote(remote);
    }
    let steward = Arc::new(builder.build().unwrap());
    let scheduler = ManualScheduler::new(clock.clone());
    Harness {
        steward,
        clock,
        scheduler,
        store,
    }
}

fn harness() -> Harness {
    harness_with(InMemoryStore::new(), None)
}

fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<Arc<DomainEvent>>,
) -> Vec<Arc<DomainEvent>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ── Component scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn search_results_expire_after_fifteen_minutes() {
    let h = harness();
    let cache = h.steward.cache();
    cache.set("k1", "search", json!("v1"));

    h.clock.advance(Duration::from_millis(10));
    assert_eq!(cache.get("k1", "search"), Some(json!("v1")));

    h.clock.advance(Duration::from_millis(900_990));
    assert_eq!(cache.get("k1", "search"), None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn protected_file_decision_becomes_a_pattern() {
    let h = harness();
    let engine = h.steward.decisions();
    let ctx = json!({"filePath": "package.json"});

    let first = engine.make_decision("file_operation", "canDelete", ctx.clone());
    assert_eq!(first.result, json!(false));
    assert_eq!(first.method, DecisionMethod::Rule);

    for _ in 0..4 {
        let next = engine.make_decision("file_operation", "canDelete", ctx.clone());
        assert_eq!(next.method, DecisionMethod::Pattern);
        assert_eq!(next.result, json!(false));
    }

    let patterns = engine.patterns("file_operation", "canDelete");
    assert_eq!(patterns.len(), 1);
    assert!((patterns[0].confidence - 0.9).abs() < 1e-9);
    assert_eq!(patterns[0].usage_count, 5);
}

#[tokio::test]
async fn unknown_decision_returns_safe_default() {
    let h = harness();
    let decision = h
        .steward
        .decisions()
        .make_decision("weather", "willItRain", json!({}));
    assert_eq!(decision.method, DecisionMethod::Default);
    assert_eq!(decision.result, Value::Null);
    assert!(decision.fallback_reason.is_some());
}

#[tokio::test]
async fn important_turn_survives_compression() {
    let h = harness();
    let mut rx = h.steward.events().subscribe();
    let context = h.steward.context();

    let important = context.add_conversation_turn("the build has a crash on startup", "looking");
    assert_eq!(important.importance, 3);
    for i in 0..50 {
        context.add_conversation_turn(&format!("small talk {i}"), "ok");
    }

    let turns = context.conversation();
    assert!(turns.len() <= 1 + 20);
    assert!(turns.iter().any(|t| t.id == important.id));
    assert!(
        drain_events(&mut rx)
            .iter()
            .any(|e| matches!(e.as_ref(), DomainEvent::ConversationCompressed { .. }))
    );
}

#[tokio::test]
async fn unregistered_task_is_queued_then_drained() {
    let h = harness_with(InMemoryStore::new(), Some(Arc::new(EchoRemote)));
    h.steward.start(&h.scheduler);

    let task = h
        .steward
        .executor()
        .execute_task(TaskSpec::new("unregistered_type", json!({"x": 1})))
        .await;
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(h.steward.executor().queue_depth(), 1);

    h.clock.advance(Duration::from_secs(1));
    let ran = h.scheduler.run_due().await;
    assert_eq!(ran, vec![JOB_TASK_DRAIN]);

    let task = h.steward.executor().get_task(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"handled": "unregistered_type"})));
    assert_eq!(h.steward.executor().queue_depth(), 0);
}

#[tokio::test]
async fn drained_task_without_remote_fails_with_message() {
    let h = harness();
    let task = h
        .steward
        .executor()
        .execute_task(TaskSpec::new("unregistered_type", json!({})))
        .await;

    let report = h.steward.drain_tasks().await.unwrap();
    assert_eq!(report.failed, 1);
    let task = h.steward.executor().get_task(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.is_some());
}

#[tokio::test]
async fn simple_task_runs_inline_and_caches() {
    let h = harness();
    let spec = TaskSpec::new("word_count", json!({"text": "alpha beta gamma"}));

    let first = h.steward.executor().execute_task(spec.clone()).await;
    assert_eq!(first.status, TaskStatus::Completed);
    let second = h.steward.executor().execute_task(spec).await;
    assert_eq!(second.result, first.result);
    assert_eq!(h.steward.executor().stats().cache_hits, 1);
}

#[tokio::test]
async fn failed_tasks_leave_no_context_behind() {
    let h = harness();
    let executor = h.steward.executor();
    for i in 0..10 {
        executor
            .execute_task(TaskSpec::new("remote_job", json!({"n": i})))
            .await;
    }
    while executor.queue_depth() > 0 {
        h.steward.drain_tasks().await.unwrap();
    }
    assert_eq!(h.steward.context().stats().task_entries, 10);

    h.clock.advance(Duration::from_secs(30 * 86_400));
    h.steward.drain_tasks().await;
    let report = h.steward.context().compact();
    assert_eq!(executor.stats().tracked_tasks, 0);
    assert_eq!(report.tasks_pruned, 10);
    assert_eq!(h.steward.context().stats().task_entries, 0);
}

// ── Background jobs ──────────────────────────────────────────────────────

#[tokio::test]
async fn start_schedules_five_jobs() {
    let h = harness();
    assert_eq!(h.steward.start(&h.scheduler), 5);
    assert_eq!(
        h.scheduler.job_names(),
        vec!["cache_sweep", "batch_flush", "persist", "task_drain", "health_check"]
    );
    assert_eq!(
        h.scheduler.interval_of("persist"),
        Some(Duration::from_secs(30))
    );
}

#[tokio::test]
async fn all_jobs_run_when_due() {
    let h = harness();
    let mut rx = h.steward.events().subscribe();
    h.steward.start(&h.scheduler);

    h.steward.cache().set("q", "search", json!(1));
    h.steward
        .context()
        .add_conversation_turn("please review the parser", "sure");
    h.clock.advance(Duration::from_secs(3600));

    let ran = h.scheduler.run_due().await;
    assert_eq!(ran.len(), 5);

    let events = drain_events(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e.as_ref(), DomainEvent::CacheSwept { removed: 1, .. }))
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e.as_ref(), DomainEvent::HealthChecked { healthy: true, .. }))
    );
    assert!(
        h.store
            .get("context:conversation")
            .await
            .unwrap()
            .is_some()
    );
    assert!(h.store.get("decision:patterns").await.unwrap().is_some());
}

#[tokio::test]
async fn stopped_service_does_not_keep_jobs_running() {
    let h = harness();
    h.steward.start(&h.scheduler);
    h.steward.shutdown().await.unwrap();

    h.clock.advance(Duration::from_secs(3600));
    assert!(h.scheduler.run_due().await.is_empty());
}

// ── Persistence ──────────────────────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let store = InMemoryStore::new();
    let first = harness_with(store.clone(), None);
    first
        .steward
        .decisions()
        .make_decision("file_operation", "canDelete", json!({"filePath": "Cargo.toml"}));
    first
        .steward
        .context()
        .update_project_context("language", json!("rust"));
    first.steward.shutdown().await.unwrap();

    let second = harness_with(store, None);
    let report = second.steward.init().await;
    assert!(report.restored >= 2);
    assert_eq!(report.dropped, 0);

    let again = second.steward.decisions().make_decision(
        "file_operation",
        "canDelete",
        json!({"filePath": "Cargo.toml"}),
    );
    assert_eq!(again.method, DecisionMethod::Pattern);
    assert_eq!(
        second
            .steward
            .context()
            .project_entry("language")
            .map(|e| e.value),
        Some(json!("rust"))
    );
}

#[tokio::test]
async fn corrupt_state_is_dropped_not_fatal() {
    let store = InMemoryStore::new();
    store
        .set("decision:patterns", json!([{"category": 3}, "junk"]))
        .await
        .unwrap();
    store
        .set("context:conversation", json!("not an array"))
        .await
        .unwrap();

    let h = harness_with(store, None);
    let report = h.steward.init().await;
    assert_eq!(report.restored, 0);
    assert!(report.dropped >= 3);
    assert!(h.steward.context().conversation().is_empty());
}

#[tokio::test]
async fn fresh_store_reports_missing_keys() {
    let h = harness();
    let report = h.steward.init().await;
    assert_eq!(report.restored, 0);
    assert_eq!(report.dropped, 0);
    assert!(report.missing_keys > 0);
}

// ── Health ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn cold_cache_degrades_health() {
    let h = harness();
    assert_eq!(h.steward.health().status, HealthStatus::Healthy);

    for i in 0..20 {
        h.steward.cache().get(&format!("missing-{i}"), "search");
    }
    let report = h.steward.check_health();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.reasons.len(), 1);
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = AppConfig::default();
    config.decision.overlap_threshold = 1.5;
    assert!(Steward::from_config(config).is_err());
}
