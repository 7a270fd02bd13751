//! The context store.
//!
//! All four sub-stores live behind one lock. Persistence snapshots the
//! bounded slices under the lock and talks to the key-value store after
//! releasing it.

use chrono::TimeDelta;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use steward_config::ContextConfig;
use steward_core::store::{load_entries, set_with_timeout};
use steward_core::{Clock, DomainEvent, EventBus, KeyValueStore, LoadReport, PersistReport, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{
    CodeContextEntry, CompactionReport, ContextStats, ConversationTurn, ProjectContextEntry,
    RelevanceLimits, RelevantContext, TaskContextEntry, query_terms, slugify, words,
};

pub const KEY_CONVERSATION: &str = "context:conversation";
pub const KEY_PROJECT: &str = "context:project";
pub const KEY_CODE: &str = "context:code";
pub const KEY_TASKS: &str = "context:tasks";

#[derive(Default)]
struct ContextState {
    conversation: Vec<ConversationTurn>,
    project: BTreeMap<String, ProjectContextEntry>,
    code: HashMap<String, CodeContextEntry>,
    tasks: HashMap<String, TaskContextEntry>,
    compressions: u64,
}

pub struct ContextStore {
    config: ContextConfig,
    high_keywords: HashSet<String>,
    medium_keywords: HashSet<String>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
    state: Mutex<ContextState>,
}

impl ContextStore {
    pub fn new(config: ContextConfig, clock: Arc<dyn Clock>) -> Self {
        let lower = |list: &[String]| -> HashSet<String> {
            list.iter().map(|w| w.to_lowercase()).collect()
        };
        Self {
            high_keywords: lower(&config.high_importance_keywords),
            medium_keywords: lower(&config.medium_importance_keywords),
            config,
            clock,
            events: None,
            state: Mutex::new(ContextState::default()),
        }
    }

    /// Publish compression events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    // ── Conversation ───────────────────────────────────────────────

    /// Importance of a turn: 3 for a high-severity keyword, 2 for a medium
    /// one, else 1. Matches whole words, case-insensitively.
    pub fn score_importance(&self, user_input: &str, response: &str) -> u8 {
        let mut score = 1;
        for word in words(user_input).chain(words(response)) {
            if self.high_keywords.contains(&word) {
                return 3;
            }
            if self.medium_keywords.contains(&word) {
                score = 2;
            }
        }
        score
    }

    /// Record an interaction. Compresses the history once it grows past
    /// the configured length.
    pub fn add_conversation_turn(&self, user_input: &str, response: &str) -> ConversationTurn {
        let turn = ConversationTurn {
            id: Uuid::new_v4().to_string(),
            timestamp: self.clock.now(),
            user_input: user_input.to_string(),
            response: response.to_string(),
            importance: self.score_importance(user_input, response),
        };

        let compressed = {
            let mut state = self.lock();
            state.conversation.push(turn.clone());
            if state.conversation.len() > self.config.max_conversation_turns {
                let before = state.conversation.len();
                let turns = std::mem::take(&mut state.conversation);
                state.conversation = compress(turns, self.config.keep_recent_turns);
                state.compressions += 1;
                Some((before, state.conversation.len()))
            } else {
                None
            }
        };

        if let Some((before, after)) = compressed {
            info!(before, after, "Compressed conversation history");
            if let Some(bus) = &self.events {
                bus.publish(DomainEvent::ConversationCompressed {
                    before,
                    after,
                    timestamp: turn.timestamp,
                });
            }
        }
        debug!(importance = turn.importance, "Conversation turn added");
        turn
    }

    /// Conversation history, oldest first.
    pub fn conversation(&self) -> Vec<ConversationTurn> {
        self.lock().conversation.clone()
    }

    // ── Project / code / task upserts ──────────────────────────────

    pub fn update_project_context(&self, key: &str, value: Value) -> ProjectContextEntry {
        let now = self.clock.now();
        let mut state = self.lock();
        let entry = state
            .project
            .entry(key.to_string())
            .or_insert_with(|| ProjectContextEntry {
                key: key.to_string(),
                value: Value::Null,
                last_updated: now,
                update_count: 0,
            });
        entry.value = value;
        entry.last_updated = now;
        entry.update_count += 1;
        entry.clone()
    }

    /// Record an access to `path`. `analysis`, when given, replaces the
    /// stored analysis.
    pub fn update_code_context(&self, path: &str, analysis: Option<Value>) -> CodeContextEntry {
        let now = self.clock.now();
        let mut state = self.lock();
        let entry = state
            .code
            .entry(path.to_string())
            .or_insert_with(|| CodeContextEntry {
                path: path.to_string(),
                last_accessed: now,
                access_count: 0,
                analysis: Value::Null,
            });
        entry.last_accessed = now;
        entry.access_count += 1;
        if let Some(analysis) = analysis {
            entry.analysis = analysis;
        }
        entry.clone()
    }

    /// Upsert the task entry for `description`. Repeated descriptions map
    /// to the same entry.
    pub fn update_task_context(&self, description: &str, status: &str) -> TaskContextEntry {
        let now = self.clock.now();
        let id = slugify(description);
        let mut state = self.lock();
        let entry = state
            .tasks
            .entry(id.clone())
            .or_insert_with(|| TaskContextEntry {
                id,
                description: description.to_string(),
                status: String::new(),
                last_updated: now,
            });
        entry.status = status.to_string();
        entry.last_updated = now;
        entry.clone()
    }

    pub fn project_entry(&self, key: &str) -> Option<ProjectContextEntry> {
        self.lock().project.get(key).cloned()
    }

    pub fn code_entry(&self, path: &str) -> Option<CodeContextEntry> {
        self.lock().code.get(path).cloned()
    }

    pub fn task_entry(&self, id: &str) -> Option<TaskContextEntry> {
        self.lock().tasks.get(id).cloned()
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Prune idle, rarely used code entries and long-finished tasks.
    pub fn compact(&self) -> CompactionReport {
        let now = self.clock.now();
        let code_idle = TimeDelta::days(self.config.code_idle_days);
        let task_retention = TimeDelta::days(self.config.finished_task_retention_days);
        let min_access = self.config.code_min_access_count;

        let mut state = self.lock();
        let code_before = state.code.len();
        state
            .code
            .retain(|_, e| !(now - e.last_accessed >= code_idle && e.access_count < min_access));
        let tasks_before = state.tasks.len();
        state
            .tasks
            .retain(|_, e| !(e.is_finished() && now - e.last_updated > task_retention));

        let report = CompactionReport {
            code_pruned: code_before - state.code.len(),
            tasks_pruned: tasks_before - state.tasks.len(),
        };
        drop(state);

        if report.code_pruned + report.tasks_pruned > 0 {
            info!(
                code_pruned = report.code_pruned,
                tasks_pruned = report.tasks_pruned,
                "Compacted context"
            );
        }
        report
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Entries whose text overlaps `query`, sorted per sub-store and
    /// truncated to `limits` (configured defaults when `None`).
    pub fn get_relevant_context(
        &self,
        query: &str,
        limits: Option<RelevanceLimits>,
    ) -> RelevantContext {
        let limits = limits.unwrap_or_else(|| RelevanceLimits::from(&self.config.limits));
        let matcher = QueryMatcher::new(query);
        if matcher.is_empty() {
            return RelevantContext::default();
        }

        let state = self.lock();

        // Iterating newest first keeps the sort stable on recency ties.
        let mut conversation: Vec<ConversationTurn> = state
            .conversation
            .iter()
            .rev()
            .filter(|t| matcher.matches(&t.searchable_text()))
            .cloned()
            .collect();
        conversation.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        conversation.truncate(limits.conversation);

        let mut project: Vec<ProjectContextEntry> = state
            .project
            .values()
            .filter(|e| matcher.matches(&format!("{} {}", e.key, e.value).to_lowercase()))
            .cloned()
            .collect();
        project.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        project.truncate(limits.project);

        let mut code: Vec<CodeContextEntry> = state
            .code
            .values()
            .filter(|e| matcher.matches(&format!("{} {}", e.path, e.analysis).to_lowercase()))
            .cloned()
            .collect();
        code.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then(b.last_accessed.cmp(&a.last_accessed))
                .then(a.path.cmp(&b.path))
        });
        code.truncate(limits.code);

        let mut tasks: Vec<TaskContextEntry> = state
            .tasks
            .values()
            .filter(|e| matcher.matches(&format!("{} {}", e.description, e.status).to_lowercase()))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.last_updated.cmp(&a.last_updated).then(a.id.cmp(&b.id)));
        tasks.truncate(limits.tasks);

        RelevantContext {
            conversation,
            project,
            code,
            tasks,
        }
    }

    pub fn stats(&self) -> ContextStats {
        let state = self.lock();
        ContextStats {
            conversation_turns: state.conversation.len(),
            high_importance_turns: state
                .conversation
                .iter()
                .filter(|t| t.importance >= 3)
                .count(),
            project_entries: state.project.len(),
            code_entries: state.code.len(),
            task_entries: state.tasks.len(),
            compressions: state.compressions,
        }
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Write bounded slices of every sub-store.
    pub async fn persist(
        &self,
        store: &dyn KeyValueStore,
        timeout: Duration,
    ) -> Result<PersistReport> {
        let slices = self.snapshot();
        let mut report = PersistReport::default();
        for (key, entries) in slices {
            report.entries_written += entries.len();
            set_with_timeout(store, key, Value::Array(entries), timeout).await?;
            report.keys_written += 1;
        }
        debug!(
            keys = report.keys_written,
            entries = report.entries_written,
            "Persisted context"
        );
        Ok(report)
    }

    /// Replace every sub-store with what the key-value store holds.
    ///
    /// Missing or unreadable keys leave that sub-store empty; corrupt
    /// entries are skipped one by one.
    pub async fn load(&self, store: &dyn KeyValueStore, timeout: Duration) -> LoadReport {
        let mut report = LoadReport::default();

        let (conversation, r) =
            load_entries::<ConversationTurn>(store, KEY_CONVERSATION, timeout).await;
        report.merge(r);
        let (project, r) = load_entries::<ProjectContextEntry>(store, KEY_PROJECT, timeout).await;
        report.merge(r);
        let (code, r) = load_entries::<CodeContextEntry>(store, KEY_CODE, timeout).await;
        report.merge(r);
        let (tasks, r) = load_entries::<TaskContextEntry>(store, KEY_TASKS, timeout).await;
        report.merge(r);

        {
            let mut state = self.lock();
            state.conversation = conversation;
            state.conversation.sort_by_key(|t| t.timestamp);
            state.project = project.into_iter().map(|e| (e.key.clone(), e)).collect();
            state.code = code.into_iter().map(|e| (e.path.clone(), e)).collect();
            state.tasks = tasks.into_iter().map(|e| (e.id.clone(), e)).collect();
        }

        info!(
            restored = report.restored,
            dropped = report.dropped,
            missing = report.missing_keys,
            "Loaded context"
        );
        report
    }

    // ── Internal ───────────────────────────────────────────────────

    fn snapshot(&self) -> Vec<(&'static str, Vec<Value>)> {
        let state = self.lock();

        let skip = state
            .conversation
            .len()
            .saturating_sub(self.config.persist_conversation_turns);
        let conversation = to_values(state.conversation.iter().skip(skip));

        let project = to_values(state.project.values());

        let mut code: Vec<&CodeContextEntry> = state.code.values().collect();
        code.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        code.truncate(self.config.persist_code_entries);

        let mut tasks: Vec<&TaskContextEntry> = state.tasks.values().collect();
        tasks.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        tasks.truncate(self.config.persist_task_entries);

        vec![
            (KEY_CONVERSATION, conversation),
            (KEY_PROJECT, project),
            (KEY_CODE, to_values(code)),
            (KEY_TASKS, to_values(tasks)),
        ]
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keep every importance-3 turn plus the `keep_recent` most recent others,
/// in their original order.
pub fn compress(turns: Vec<ConversationTurn>, keep_recent: usize) -> Vec<ConversationTurn> {
    let low_total = turns.iter().filter(|t| t.importance < 3).count();
    let mut low_to_skip = low_total.saturating_sub(keep_recent);
    turns
        .into_iter()
        .filter(|t| {
            if t.importance >= 3 {
                return true;
            }
            if low_to_skip > 0 {
                low_to_skip -= 1;
                return false;
            }
            true
        })
        .collect()
}

fn to_values<'a, T, I>(items: I) -> Vec<Value>
where
    T: serde::Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    items
        .into_iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect()
}

struct QueryMatcher {
    whole: String,
    terms: Vec<String>,
}

impl QueryMatcher {
    fn new(query: &str) -> Self {
        Self {
            whole: query.trim().to_lowercase(),
            terms: query_terms(query),
        }
    }

    fn is_empty(&self) -> bool {
        self.whole.is_empty()
    }

    fn matches(&self, text: &str) -> bool {
        text.contains(&self.whole) || self.terms.iter().any(|t| text.contains(t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use steward_core::ManualClock;
    use steward_store::InMemoryStore;

    fn store() -> (ContextStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (
            ContextStore::new(ContextConfig::default(), clock.clone()),
            clock,
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn importance_scoring() {
        let (ctx, _) = store();
        assert_eq!(ctx.score_importance("There is a critical bug", "ok"), 3);
        assert_eq!(ctx.score_importance("please refactor this", "done"), 2);
        assert_eq!(ctx.score_importance("hello", "hi"), 1);
        // Whole words only.
        assert_eq!(ctx.score_importance("errors everywhere", "terror"), 1);
        assert_eq!(ctx.score_importance("hello", "the build is BROKEN"), 3);
    }

    #[test]
    fn high_importance_turn_survives_compression() {
        let (ctx, clock) = store();
        let critical = ctx.add_conversation_turn("the server hit a critical error", "looking");
        assert_eq!(critical.importance, 3);

        for i in 0..50 {
            clock.advance(Duration::from_secs(1));
            ctx.add_conversation_turn(&format!("question {i}"), "answer");
        }

        let turns = ctx.conversation();
        assert_eq!(turns.len(), 21);
        assert_eq!(turns[0].id, critical.id);
        assert_eq!(turns.last().map(|t| t.user_input.as_str()), Some("question 49"));
        assert_eq!(ctx.stats().compressions, 1);
    }

    #[test]
    fn compression_invariant_holds() {
        let now = Utc::now();
        let turns: Vec<ConversationTurn> = (0..60)
            .map(|i| ConversationTurn {
                id: i.to_string(),
                timestamp: now + TimeDelta::seconds(i),
                user_input: String::new(),
                response: String::new(),
                importance: if i % 7 == 0 { 3 } else { 1 + (i % 2) as u8 },
            })
            .collect();
        let high = turns.iter().filter(|t| t.importance >= 3).count();

        let kept = compress(turns, 20);
        assert!(kept.len() <= high + 20);
        assert_eq!(kept.iter().filter(|t| t.importance >= 3).count(), high);
        assert!(kept.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        // The newest low-importance turn is always kept.
        assert_eq!(kept.last().map(|t| t.id.as_str()), Some("59"));
    }

    #[test]
    fn upserts_bump_counters() {
        let (ctx, clock) = store();
        let first = ctx.update_project_context("language", json!("rust"));
        clock.advance(Duration::from_secs(5));
        let second = ctx.update_project_context("language", json!("rust 2024"));
        assert_eq!(first.update_count, 1);
        assert_eq!(second.update_count, 2);
        assert!(second.last_updated > first.last_updated);

        ctx.update_code_context("src/main.rs", Some(json!({"lines": 10})));
        let code = ctx.update_code_context("src/main.rs", None);
        assert_eq!(code.access_count, 2);
        assert_eq!(code.analysis, json!({"lines": 10}));
    }

    #[test]
    fn task_entries_dedup_by_slug() {
        let (ctx, _) = store();
        ctx.update_task_context("Fix the login bug", "queued");
        let entry = ctx.update_task_context("fix the LOGIN bug!", "running");
        assert_eq!(entry.id, "fix-the-login-bug");
        assert_eq!(entry.status, "running");
        assert_eq!(ctx.stats().task_entries, 1);
    }

    #[test]
    fn compaction_prunes_idle_code_and_old_tasks() {
        let (ctx, clock) = store();
        ctx.update_code_context("rare.rs", None);
        for _ in 0..3 {
            ctx.update_code_context("hot.rs", None);
        }
        ctx.update_task_context("ship release", "completed");
        ctx.update_task_context("write docs", "running");

        clock.advance(Duration::from_secs(3 * 86_400 + 1));
        let report = ctx.compact();
        assert_eq!(report.tasks_pruned, 1);
        assert_eq!(report.code_pruned, 0);

        clock.advance(Duration::from_secs(4 * 86_400));
        let report = ctx.compact();
        assert_eq!(report.code_pruned, 1);
        assert!(ctx.code_entry("hot.rs").is_some());
        assert!(ctx.task_entry("write-docs").is_some());
    }

    #[test]
    fn compaction_prunes_failed_and_cancelled_tasks() {
        let (ctx, clock) = store();
        for i in 0..200 {
            ctx.update_task_context(&format!("remote_job task {i}"), "failed");
        }
        ctx.update_task_context("abandoned import", "cancelled");
        ctx.update_task_context("nightly sync", "queued");

        clock.advance(Duration::from_secs(86_400));
        assert_eq!(ctx.compact().tasks_pruned, 0);

        clock.advance(Duration::from_secs(29 * 86_400));
        let report = ctx.compact();
        assert_eq!(report.tasks_pruned, 201);
        assert_eq!(ctx.stats().task_entries, 1);
        assert!(ctx.task_entry("nightly-sync").is_some());
    }

    #[test]
    fn relevance_sorting_and_limits() {
        let (ctx, clock) = store();
        ctx.add_conversation_turn("deploy the parser", "ok");
        clock.advance(Duration::from_secs(1));
        ctx.add_conversation_turn("parser crash on input", "investigating");
        clock.advance(Duration::from_secs(1));
        ctx.add_conversation_turn("parser question", "answer");
        ctx.add_conversation_turn("unrelated chat", "sure");

        ctx.update_code_context("src/parser.rs", None);
        ctx.update_code_context("src/lexer.rs", Some(json!({"note": "feeds the parser"})));
        ctx.update_code_context("src/lexer.rs", None);

        for i in 0..5 {
            clock.advance(Duration::from_secs(1));
            ctx.update_task_context(&format!("parser task {i}"), "running");
        }

        let relevant = ctx.get_relevant_context("parser", None);
        let inputs: Vec<&str> = relevant
            .conversation
            .iter()
            .map(|t| t.user_input.as_str())
            .collect();
        assert_eq!(
            inputs,
            vec!["parser crash on input", "deploy the parser", "parser question"]
        );
        assert_eq!(relevant.code[0].path, "src/lexer.rs");
        assert_eq!(relevant.code.len(), 2);
        assert_eq!(relevant.tasks.len(), 3);
        assert_eq!(relevant.tasks[0].id, "parser-task-4");

        let limited = ctx.get_relevant_context(
            "parser",
            Some(RelevanceLimits {
                conversation: 1,
                code: 1,
                tasks: 1,
                project: 1,
            }),
        );
        assert_eq!(limited.conversation.len(), 1);
        assert_eq!(limited.code.len(), 1);

        assert!(ctx.get_relevant_context("   ", None).is_empty());
    }

    #[tokio::test]
    async fn persist_then_load_restores_bounded_slices() {
        let (ctx, _) = store();
        for i in 0..30 {
            ctx.add_conversation_turn(&format!("turn {i}"), "ok");
        }
        ctx.update_project_context("language", json!("rust"));
        ctx.update_code_context("src/lib.rs", None);
        ctx.update_task_context("write tests", "running");

        let kv = InMemoryStore::new();
        let report = ctx.persist(&kv, TIMEOUT).await.unwrap();
        assert_eq!(report.keys_written, 4);
        assert_eq!(report.entries_written, 33);

        let (fresh, _) = store();
        let loaded = fresh.load(&kv, TIMEOUT).await;
        assert_eq!(loaded.restored, 33);
        assert_eq!(loaded.dropped, 0);
        assert_eq!(fresh.stats().conversation_turns, 30);
        assert_eq!(
            fresh.project_entry("language").map(|e| e.value),
            Some(json!("rust"))
        );
    }

    #[tokio::test]
    async fn load_tolerates_missing_and_corrupt_state() {
        let kv = InMemoryStore::new();
        let (ctx, _) = store();
        let report = ctx.load(&kv, TIMEOUT).await;
        assert_eq!(report.missing_keys, 4);
        assert_eq!(ctx.stats(), ContextStats::default());

        kv.set(KEY_CONVERSATION, json!("{definitely not json"))
            .await
            .unwrap();
        kv.set(
            KEY_CODE,
            json!([
                {"path": "ok.rs", "last_accessed": "2024-01-01T00:00:00Z", "access_count": 1},
                {"path": 42}
            ]),
        )
        .await
        .unwrap();
        kv.set(KEY_PROJECT, json!({"not": "an array"})).await.unwrap();

        let report = ctx.load(&kv, TIMEOUT).await;
        assert_eq!(report.restored, 1);
        assert_eq!(report.dropped, 3);
        assert!(ctx.code_entry("ok.rs").is_some());
        assert!(ctx.conversation().is_empty());
    }
}
