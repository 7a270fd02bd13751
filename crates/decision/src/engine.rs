//! The decision engine.
//!
//! Patterns, history and counters share one lock. Enrichment reads the
//! context store and cache before that lock is taken, and rule functions run
//! with no lock held.

use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use steward_cache::TieredCache;
use steward_config::DecisionConfig;
use steward_context::ContextStore;
use steward_core::store::{load_entries, set_with_timeout};
use steward_core::{
    Clock, DecisionError, DomainEvent, EventBus, KeyValueStore, LoadReport, PersistReport,
    QueueProbe, Result,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Decision, DecisionMethod, DecisionPattern, DecisionRecord, DecisionStats};
use crate::pattern::{self, Signature, project_signature};
use crate::registry::{DecisionRegistry, RuleFn};

pub const KEY_PATTERNS: &str = "decision:patterns";
pub const KEY_HISTORY: &str = "decision:history";

#[derive(Default)]
struct DecisionState {
    patterns: HashMap<(String, String), Vec<DecisionPattern>>,
    history: VecDeque<DecisionRecord>,
    rule_decisions: u64,
    pattern_decisions: u64,
    default_decisions: u64,
}

impl DecisionState {
    fn push_record(&mut self, record: DecisionRecord, capacity: usize) {
        self.history.push_back(record);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }
}

pub struct DecisionEngine {
    config: DecisionConfig,
    registry: RwLock<DecisionRegistry>,
    context: Arc<ContextStore>,
    cache: Arc<TieredCache>,
    clock: Arc<dyn Clock>,
    queue: Option<Arc<dyn QueueProbe>>,
    events: Option<Arc<EventBus>>,
    state: Mutex<DecisionState>,
}

impl DecisionEngine {
    pub fn new(
        config: DecisionConfig,
        mut registry: DecisionRegistry,
        context: Arc<ContextStore>,
        cache: Arc<TieredCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        registry.apply_config(&config);
        Self {
            config,
            registry: RwLock::new(registry),
            context,
            cache,
            clock,
            queue: None,
            events: None,
            state: Mutex::new(DecisionState::default()),
        }
    }

    /// Report this queue's depth in the system snapshot.
    pub fn with_queue_probe(mut self, probe: Arc<dyn QueueProbe>) -> Self {
        self.queue = Some(probe);
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Register (or replace) a rule at runtime.
    pub fn register_rule<F>(&self, category: &str, action: &str, rule: F)
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(category, action, rule);
    }

    pub fn decisions(&self) -> Vec<(String, String)> {
        self.read_registry().decisions()
    }

    /// Resolve a decision. Never fails: anything that goes wrong resolves to
    /// the configured safe default with `method = Default`.
    pub fn make_decision(&self, category: &str, action: &str, context: Value) -> Decision {
        let decision = match self.try_decide(category, action, &context) {
            Ok(decision) => decision,
            Err(err) => self.fall_back(category, action, context, err),
        };

        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::DecisionMade {
                category: decision.category.clone(),
                action: decision.action.clone(),
                method: decision.method.to_string(),
                confidence: decision.confidence,
                timestamp: decision.timestamp,
            });
        }
        decision
    }

    /// Mark a past decision as successful or not. Returns whether the
    /// record is still in history.
    pub fn record_outcome(&self, decision_id: &str, success: bool) -> bool {
        let mut state = self.lock();
        match state.history.iter_mut().rev().find(|r| r.id == decision_id) {
            Some(record) => {
                record.success = Some(success);
                true
            }
            None => false,
        }
    }

    /// Most recent records for `category.action`, newest first.
    pub fn history(&self, category: &str, action: &str, limit: usize) -> Vec<DecisionRecord> {
        self.lock()
            .history
            .iter()
            .rev()
            .filter(|r| r.category == category && r.action == action)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn patterns(&self, category: &str, action: &str) -> Vec<DecisionPattern> {
        self.lock()
            .patterns
            .get(&(category.to_string(), action.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn stats(&self) -> DecisionStats {
        let state = self.lock();
        let all: Vec<&DecisionPattern> = state.patterns.values().flatten().collect();
        let total = state.rule_decisions + state.pattern_decisions + state.default_decisions;
        DecisionStats {
            total_decisions: total,
            rule_decisions: state.rule_decisions,
            pattern_decisions: state.pattern_decisions,
            default_decisions: state.default_decisions,
            history_len: state.history.len(),
            pattern_keys: state.patterns.values().filter(|v| !v.is_empty()).count(),
            patterns: all.len(),
            average_pattern_confidence: if all.is_empty() {
                0.0
            } else {
                all.iter().map(|p| p.confidence).sum::<f64>() / all.len() as f64
            },
            pattern_hit_ratio: if total == 0 {
                0.0
            } else {
                state.pattern_decisions as f64 / total as f64
            },
        }
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Write every pattern table and the most recent history records.
    pub async fn persist(
        &self,
        store: &dyn KeyValueStore,
        timeout: Duration,
    ) -> Result<PersistReport> {
        let (patterns, history) = {
            let state = self.lock();
            let patterns: Vec<Value> = state
                .patterns
                .values()
                .flatten()
                .filter_map(|p| serde_json::to_value(p).ok())
                .collect();
            let skip = state.history.len().saturating_sub(self.config.persist_history);
            let history: Vec<Value> = state
                .history
                .iter()
                .skip(skip)
                .filter_map(|r| serde_json::to_value(r).ok())
                .collect();
            (patterns, history)
        };

        let report = PersistReport {
            keys_written: 2,
            entries_written: patterns.len() + history.len(),
        };
        set_with_timeout(store, KEY_PATTERNS, Value::Array(patterns), timeout).await?;
        set_with_timeout(store, KEY_HISTORY, Value::Array(history), timeout).await?;
        debug!(entries = report.entries_written, "Persisted decision state");
        Ok(report)
    }

    /// Replace patterns and history with the persisted state.
    pub async fn load(&self, store: &dyn KeyValueStore, timeout: Duration) -> LoadReport {
        let mut report = LoadReport::default();
        let (patterns, r) = load_entries::<DecisionPattern>(store, KEY_PATTERNS, timeout).await;
        report.merge(r);
        let (mut history, r) = load_entries::<DecisionRecord>(store, KEY_HISTORY, timeout).await;
        report.merge(r);

        let mut tables: HashMap<(String, String), Vec<DecisionPattern>> = HashMap::new();
        for mut p in patterns {
            p.confidence = p.confidence.clamp(0.0, 1.0);
            tables
                .entry((p.category.clone(), p.action.clone()))
                .or_default()
                .push(p);
        }
        for table in tables.values_mut() {
            pattern::evict_lru(table, self.config.max_patterns_per_key);
        }

        history.sort_by_key(|r| r.timestamp);
        let skip = history.len().saturating_sub(self.config.max_history);

        {
            let mut state = self.lock();
            state.patterns = tables;
            state.history = history.into_iter().skip(skip).collect();
        }

        info!(
            restored = report.restored,
            dropped = report.dropped,
            missing = report.missing_keys,
            "Loaded decision state"
        );
        report
    }

    // ── Internal ───────────────────────────────────────────────────

    fn try_decide(
        &self,
        category: &str,
        action: &str,
        context: &Value,
    ) -> std::result::Result<Decision, DecisionError> {
        let rule = self.read_registry().rule(category, action).ok_or_else(|| {
            DecisionError::UnknownDecision {
                category: category.to_string(),
                action: action.to_string(),
            }
        })?;

        let recent = self.history(category, action, self.config.recent_window);
        let enriched = self.enrich(category, action, context, &recent)?;
        let signature = project_signature(&enriched, &self.config.signature_keys);

        if let Some(decision) = self.try_pattern(category, action, context, &signature) {
            return Ok(decision);
        }

        let result = run_rule(&rule, &enriched).map_err(|reason| DecisionError::RuleFailed {
            category: category.to_string(),
            action: action.to_string(),
            reason,
        })?;

        let confidence = self.rule_confidence(&recent, &enriched);
        let now = self.clock.now();
        let record = DecisionRecord {
            id: Uuid::new_v4().to_string(),
            category: category.to_string(),
            action: action.to_string(),
            context: context.clone(),
            result: result.clone(),
            method: DecisionMethod::Rule,
            confidence,
            timestamp: now,
            success: None,
        };
        let fresh = DecisionPattern {
            category: category.to_string(),
            action: action.to_string(),
            signature,
            result: result.clone(),
            confidence: self.config.initial_pattern_confidence,
            usage_count: 1,
            last_used: now,
        };

        let evicted = {
            let mut state = self.lock();
            state.rule_decisions += 1;
            state.push_record(record.clone(), self.config.max_history);
            let table = state
                .patterns
                .entry((category.to_string(), action.to_string()))
                .or_default();
            pattern::upsert(table, fresh, self.config.max_patterns_per_key)
        };
        if evicted > 0 {
            debug!(category, action, evicted, "Evicted least recently used patterns");
        }

        debug!(category, action, confidence, "Decision resolved by rule");
        Ok(Decision {
            id: record.id,
            category: record.category,
            action: record.action,
            result,
            method: DecisionMethod::Rule,
            confidence,
            timestamp: now,
            fallback_reason: None,
            fallback: None,
        })
    }

    /// Reinforce and return the best matching pattern, if any.
    fn try_pattern(
        &self,
        category: &str,
        action: &str,
        context: &Value,
        signature: &Signature,
    ) -> Option<Decision> {
        let now = self.clock.now();
        let mut state = self.lock();
        let table = state
            .patterns
            .get_mut(&(category.to_string(), action.to_string()))?;
        let index = pattern::best_match(table, signature, self.config.overlap_threshold)?;

        let matched = &mut table[index];
        pattern::reinforce(matched, self.config.reinforcement_step, now);
        let result = matched.result.clone();
        let confidence = matched.confidence;
        let usage_count = matched.usage_count;

        let record = DecisionRecord {
            id: Uuid::new_v4().to_string(),
            category: category.to_string(),
            action: action.to_string(),
            context: context.clone(),
            result: result.clone(),
            method: DecisionMethod::Pattern,
            confidence,
            timestamp: now,
            success: None,
        };
        let id = record.id.clone();
        state.pattern_decisions += 1;
        state.push_record(record, self.config.max_history);
        drop(state);

        debug!(category, action, confidence, usage_count, "Decision resolved by pattern");
        Some(Decision {
            id,
            category: category.to_string(),
            action: action.to_string(),
            result,
            method: DecisionMethod::Pattern,
            confidence,
            timestamp: now,
            fallback_reason: None,
            fallback: None,
        })
    }

    fn fall_back(
        &self,
        category: &str,
        action: &str,
        context: Value,
        err: DecisionError,
    ) -> Decision {
        match &err {
            DecisionError::UnknownDecision { .. } => {
                debug!(category, action, "Unknown decision, using safe default")
            }
            other => warn!(category, action, error = %other, "Decision failed, using safe default"),
        }

        let result = self.read_registry().safe_default(category, action);
        let now = self.clock.now();
        let confidence = self.config.default_confidence;
        let record = DecisionRecord {
            id: Uuid::new_v4().to_string(),
            category: category.to_string(),
            action: action.to_string(),
            context,
            result: result.clone(),
            method: DecisionMethod::Default,
            confidence,
            timestamp: now,
            success: None,
        };
        let id = record.id.clone();
        {
            let mut state = self.lock();
            state.default_decisions += 1;
            state.push_record(record, self.config.max_history);
        }

        Decision {
            id,
            category: category.to_string(),
            action: action.to_string(),
            result,
            method: DecisionMethod::Default,
            confidence,
            timestamp: now,
            fallback_reason: Some(err.to_string()),
            fallback: Some(err),
        }
    }

    /// Caller context plus relevant context, a system snapshot and recent
    /// same-key decisions. Caller keys win except `category` and `action`.
    fn enrich(
        &self,
        category: &str,
        action: &str,
        context: &Value,
        recent: &[DecisionRecord],
    ) -> std::result::Result<Value, DecisionError> {
        let mut enriched = match context {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".into(), other.clone());
                map
            }
        };

        let relevant = self
            .context
            .get_relevant_context(&format!("{category} {action}"), None);
        let relevant = serde_json::to_value(relevant)
            .map_err(|e| DecisionError::Enrichment(e.to_string()))?;

        let system_state = json!({
            "cacheStats": self.cache.stats(),
            "queueDepth": self.queue.as_ref().map_or(0, |q| q.queue_depth()),
            "timestamp": self.clock.now(),
        });

        let recent: Vec<Value> = recent
            .iter()
            .map(|r| {
                json!({
                    "result": r.result,
                    "method": r.method,
                    "confidence": r.confidence,
                    "success": r.success,
                    "timestamp": r.timestamp,
                })
            })
            .collect();

        enriched.entry("relevantContext").or_insert(relevant);
        enriched.entry("systemState").or_insert(system_state);
        enriched
            .entry("recentDecisions")
            .or_insert(Value::Array(recent));
        enriched.insert("category".into(), json!(category));
        enriched.insert("action".into(), json!(action));
        Ok(Value::Object(enriched))
    }

    fn rule_confidence(&self, recent: &[DecisionRecord], enriched: &Value) -> f64 {
        let success_rate = if recent.is_empty() {
            0.5
        } else {
            recent.iter().filter(|r| r.success != Some(false)).count() as f64 / recent.len() as f64
        };

        let required = &self.config.required_fields;
        let completeness = if required.is_empty() {
            1.0
        } else {
            required
                .iter()
                .filter(|k| enriched.get(k.as_str()).is_some_and(|v| !v.is_null()))
                .count() as f64
                / required.len() as f64
        };

        (self.config.base_confidence
            + self.config.success_weight * success_rate
            + self.config.completeness_weight * completeness)
            .clamp(0.0, 1.0)
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, DecisionRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, DecisionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a rule, turning a panic into an error.
fn run_rule(rule: &RuleFn, context: &Value) -> std::result::Result<Value, String> {
    match catch_unwind(AssertUnwindSafe(|| rule(context))) {
        Ok(result) => result,
        Err(panic) => Err(panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "rule panicked".to_string())),
    }
}
