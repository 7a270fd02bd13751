//! Configuration loading, validation, and management for Steward.
//!
//! Loads configuration from `~/.steward/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! Every heuristic in the core (TTLs, overlap threshold, confidence weights,
//! keyword sets, capacities, intervals) is a field here with a named default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.steward/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tiered cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Request batcher settings
    #[serde(default)]
    pub batcher: BatcherConfig,

    /// Context store settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Decision engine settings
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Task executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Periodic job settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_true() -> bool {
    true
}

// ── Cache ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL per category, in seconds.
    #[serde(default = "default_ttl_table")]
    pub ttl_secs: BTreeMap<String, u64>,

    /// TTL for categories missing from the table, in seconds.
    #[serde(default = "default_fallback_ttl")]
    pub default_ttl_secs: u64,

    /// How often the expiry sweep runs, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_table() -> BTreeMap<String, u64> {
    BTreeMap::from([
        ("search".to_string(), 15 * 60),
        ("content".to_string(), 30 * 60),
        ("structure".to_string(), 2 * 60 * 60),
        ("task".to_string(), 30 * 60),
        ("decision".to_string(), 60 * 60),
    ])
}
fn default_fallback_ttl() -> u64 {
    10 * 60
}
fn default_sweep_interval() -> u64 {
    60
}

impl CacheConfig {
    pub fn ttl_table(&self) -> BTreeMap<String, Duration> {
        self.ttl_secs
            .iter()
            .map(|(k, v)| (k.clone(), Duration::from_secs(*v)))
            .collect()
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_table(),
            default_ttl_secs: default_fallback_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

// ── Batcher ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Operation types that tolerate delay and may be batched.
    #[serde(default = "default_batchable_types")]
    pub batchable_types: Vec<String>,

    /// A type stops batching once this many operations are pending.
    #[serde(default = "default_max_pending")]
    pub max_pending_per_type: usize,

    /// Flush tick, in milliseconds.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Sliding window for call-volume measurement, in seconds.
    #[serde(default = "default_volume_window")]
    pub volume_window_secs: u64,

    /// Calls per window considered full load.
    #[serde(default = "default_max_calls")]
    pub max_calls_per_window: usize,

    /// Load ratio above which any batchable operation is batched.
    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,

    /// Timeout for one handler call, in milliseconds.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_ms: u64,
}

fn default_batchable_types() -> Vec<String> {
    vec![
        "analysis".into(),
        "documentation".into(),
        "code_review".into(),
        "optimization".into(),
        "summarization".into(),
    ]
}
fn default_max_pending() -> usize {
    10
}
fn default_flush_interval() -> u64 {
    2_000
}
fn default_volume_window() -> u64 {
    60
}
fn default_max_calls() -> usize {
    60
}
fn default_load_threshold() -> f64 {
    0.8
}
fn default_handler_timeout() -> u64 {
    30_000
}

impl BatcherConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn volume_window(&self) -> Duration {
        Duration::from_secs(self.volume_window_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batchable_types: default_batchable_types(),
            max_pending_per_type: default_max_pending(),
            flush_interval_ms: default_flush_interval(),
            volume_window_secs: default_volume_window(),
            max_calls_per_window: default_max_calls(),
            load_threshold: default_load_threshold(),
            handler_timeout_ms: default_handler_timeout(),
        }
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Words that make a turn importance 3.
    #[serde(default = "default_high_keywords")]
    pub high_importance_keywords: Vec<String>,

    /// Words that make a turn importance 2.
    #[serde(default = "default_medium_keywords")]
    pub medium_importance_keywords: Vec<String>,

    /// Compression runs when the history grows past this many turns.
    #[serde(default = "default_max_conversation")]
    pub max_conversation_turns: usize,

    /// Low-importance turns kept by compression.
    #[serde(default = "default_keep_recent")]
    pub keep_recent_turns: usize,

    /// Code entries idle this long with few accesses are pruned.
    #[serde(default = "default_code_idle_days")]
    pub code_idle_days: i64,

    /// Access count below which idle code entries are pruned.
    #[serde(default = "default_code_min_access")]
    pub code_min_access_count: u64,

    /// Finished (completed, failed or cancelled) tasks older than this are
    /// pruned.
    #[serde(
        default = "default_task_retention_days",
        alias = "completed_task_retention_days"
    )]
    pub finished_task_retention_days: i64,

    /// Result limits for relevance queries.
    #[serde(default)]
    pub limits: RelevanceLimitsConfig,

    /// Bounded slices written on persist.
    #[serde(default = "default_persist_conversation")]
    pub persist_conversation_turns: usize,

    #[serde(default = "default_persist_code")]
    pub persist_code_entries: usize,

    #[serde(default = "default_persist_tasks")]
    pub persist_task_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceLimitsConfig {
    #[serde(default = "default_limit_five")]
    pub conversation: usize,
    #[serde(default = "default_limit_five")]
    pub code: usize,
    #[serde(default = "default_limit_three")]
    pub tasks: usize,
    #[serde(default = "default_limit_five")]
    pub project: usize,
}

fn default_high_keywords() -> Vec<String> {
    [
        "error", "bug", "critical", "urgent", "broken", "crash", "security", "failure", "fail",
        "vulnerability", "outage",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_medium_keywords() -> Vec<String> {
    [
        "fix", "implement", "create", "update", "refactor", "feature", "test", "deploy",
        "optimize", "review",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_conversation() -> usize {
    50
}
fn default_keep_recent() -> usize {
    20
}
fn default_code_idle_days() -> i64 {
    7
}
fn default_code_min_access() -> u64 {
    3
}
fn default_task_retention_days() -> i64 {
    3
}
fn default_limit_five() -> usize {
    5
}
fn default_limit_three() -> usize {
    3
}
fn default_persist_conversation() -> usize {
    50
}
fn default_persist_code() -> usize {
    100
}
fn default_persist_tasks() -> usize {
    50
}

impl Default for RelevanceLimitsConfig {
    fn default() -> Self {
        Self {
            conversation: 5,
            code: 5,
            tasks: 3,
            project: 5,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            high_importance_keywords: default_high_keywords(),
            medium_importance_keywords: default_medium_keywords(),
            max_conversation_turns: default_max_conversation(),
            keep_recent_turns: default_keep_recent(),
            code_idle_days: default_code_idle_days(),
            code_min_access_count: default_code_min_access(),
            finished_task_retention_days: default_task_retention_days(),
            limits: RelevanceLimitsConfig::default(),
            persist_conversation_turns: default_persist_conversation(),
            persist_code_entries: default_persist_code(),
            persist_task_entries: default_persist_tasks(),
        }
    }
}

// ── Decision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Fraction of compared signature keys that must agree for a pattern hit.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,

    #[serde(default = "default_base_confidence")]
    pub base_confidence: f64,

    #[serde(default = "default_success_weight")]
    pub success_weight: f64,

    #[serde(default = "default_completeness_weight")]
    pub completeness_weight: f64,

    /// Confidence added each time a pattern is reused.
    #[serde(default = "default_reinforcement")]
    pub reinforcement_step: f64,

    /// Confidence of a freshly learned pattern.
    #[serde(default = "default_initial_confidence")]
    pub initial_pattern_confidence: f64,

    /// Confidence reported for safe-default decisions.
    #[serde(default)]
    pub default_confidence: f64,

    #[serde(default = "default_max_patterns")]
    pub max_patterns_per_key: usize,

    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Recent same-key records used for enrichment and success rate.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Records written on persist.
    #[serde(default = "default_persist_history")]
    pub persist_history: usize,

    /// Context keys projected into a signature. Every key a registered rule
    /// decides on belongs here, or a stored pattern answers for contexts the
    /// rule would tell apart.
    #[serde(default = "default_signature_keys")]
    pub signature_keys: Vec<String>,

    /// Context keys whose presence counts toward completeness.
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,

    /// Result used when nothing more specific is configured.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub fallback_default: serde_json::Value,

    /// Per-decision safe defaults. `action = "*"` covers a whole category.
    #[serde(default)]
    pub safe_defaults: Vec<SafeDefaultConfig>,
}

/// A statically configured safe result for one decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeDefaultConfig {
    pub category: String,
    pub action: String,
    pub value: serde_json::Value,
}

fn default_overlap_threshold() -> f64 {
    0.7
}
fn default_base_confidence() -> f64 {
    0.5
}
fn default_success_weight() -> f64 {
    0.3
}
fn default_completeness_weight() -> f64 {
    0.2
}
fn default_reinforcement() -> f64 {
    0.1
}
fn default_initial_confidence() -> f64 {
    0.5
}
fn default_max_patterns() -> usize {
    50
}
fn default_max_history() -> usize {
    1000
}
fn default_recent_window() -> usize {
    10
}
fn default_persist_history() -> usize {
    100
}
fn default_signature_keys() -> Vec<String> {
    [
        "filePath",
        "taskType",
        "category",
        "action",
        "fileSize",
        "complexity",
        "isProduction",
        "description",
        "isVolatile",
        "linesChanged",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_required_fields() -> Vec<String> {
    ["filePath", "taskType", "systemState"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: default_overlap_threshold(),
            base_confidence: default_base_confidence(),
            success_weight: default_success_weight(),
            completeness_weight: default_completeness_weight(),
            reinforcement_step: default_reinforcement(),
            initial_pattern_confidence: default_initial_confidence(),
            default_confidence: 0.0,
            max_patterns_per_key: default_max_patterns(),
            max_history: default_max_history(),
            recent_window: default_recent_window(),
            persist_history: default_persist_history(),
            signature_keys: default_signature_keys(),
            required_fields: default_required_fields(),
            fallback_default: serde_json::Value::Null,
            safe_defaults: vec![],
        }
    }
}

// ── Executor ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Queue drain tick, in milliseconds.
    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,

    /// Tasks popped per drain tick.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Terminal tasks are purged from history after this many hours.
    #[serde(default = "default_history_retention")]
    pub history_retention_hours: i64,

    /// Types that are pure, small-input transforms.
    #[serde(default = "default_simple_types")]
    pub simple_task_types: Vec<String>,

    /// Upper bound on serialized parameters for a "simple" task.
    #[serde(default = "default_simple_max_bytes")]
    pub simple_max_input_bytes: usize,

    /// Timeout for one local processor run, in milliseconds.
    #[serde(default = "default_local_timeout")]
    pub local_timeout_ms: u64,

    /// Timeout for one remote execution, in milliseconds.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_ms: u64,

    /// Cache category for task results.
    #[serde(default = "default_task_cache_category")]
    pub cache_category: String,
}

fn default_drain_interval() -> u64 {
    1_000
}
fn default_max_concurrent() -> usize {
    3
}
fn default_history_retention() -> i64 {
    24
}
fn default_simple_types() -> Vec<String> {
    [
        "word_count",
        "line_count",
        "json_validate",
        "text_transform",
        "sort_lines",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_simple_max_bytes() -> usize {
    16 * 1024
}
fn default_local_timeout() -> u64 {
    10_000
}
fn default_remote_timeout() -> u64 {
    120_000
}
fn default_task_cache_category() -> String {
    "task".into()
}

impl ExecutorConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn local_timeout(&self) -> Duration {
        Duration::from_millis(self.local_timeout_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: default_drain_interval(),
            max_concurrent: default_max_concurrent(),
            history_retention_hours: default_history_retention(),
            simple_task_types: default_simple_types(),
            simple_max_input_bytes: default_simple_max_bytes(),
            local_timeout_ms: default_local_timeout(),
            remote_timeout_ms: default_remote_timeout(),
            cache_category: default_task_cache_category(),
        }
    }
}

// ── Scheduler ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Persistence tick (context + patterns), in seconds.
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,

    /// Health check tick, in seconds.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Queue depth above which health reports `degraded`.
    #[serde(default = "default_queue_warn")]
    pub health_queue_warn_depth: usize,

    /// Hit ratio below which health reports `degraded` (after 20 lookups).
    #[serde(default = "default_min_hit_ratio")]
    pub health_min_hit_ratio: f64,
}

fn default_persist_interval() -> u64 {
    30
}
fn default_health_interval() -> u64 {
    60
}
fn default_queue_warn() -> usize {
    100
}
fn default_min_hit_ratio() -> f64 {
    0.05
}

impl SchedulerConfig {
    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            persist_interval_secs: default_persist_interval(),
            health_interval_secs: default_health_interval(),
            health_queue_warn_depth: default_queue_warn(),
            health_min_hit_ratio: default_min_hit_ratio(),
        }
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "file", "memory" or "none".
    #[serde(default = "default_store_kind")]
    pub backend: String,

    /// Directory for the file store. Defaults to `~/.steward/data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Timeout for one store call, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,

    /// Persist on shutdown even if the timer has not fired.
    #[serde(default = "default_true")]
    pub persist_on_shutdown: bool,
}

fn default_store_kind() -> String {
    "file".into()
}
fn default_store_timeout() -> u64 {
    5_000
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("data"))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_store_kind(),
            data_dir: None,
            timeout_ms: default_store_timeout(),
            persist_on_shutdown: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.steward/config.toml).
    ///
    /// Environment overrides:
    /// - `STEWARD_STORE`: storage backend
    /// - `STEWARD_DATA_DIR`: file store directory
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(backend) = std::env::var("STEWARD_STORE") {
            config.storage.backend = backend;
        }

        if let Ok(dir) = std::env::var("STEWARD_DATA_DIR") {
            config.storage.data_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".steward")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.decision;
        for (name, value) in [
            ("decision.overlap_threshold", d.overlap_threshold),
            ("decision.base_confidence", d.base_confidence),
            ("decision.success_weight", d.success_weight),
            ("decision.completeness_weight", d.completeness_weight),
            ("decision.reinforcement_step", d.reinforcement_step),
            ("decision.initial_pattern_confidence", d.initial_pattern_confidence),
            ("decision.default_confidence", d.default_confidence),
            ("batcher.load_threshold", self.batcher.load_threshold),
            ("scheduler.health_min_hit_ratio", self.scheduler.health_min_hit_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0 (got {value})"
                )));
            }
        }

        for (name, value) in [
            ("decision.max_patterns_per_key", d.max_patterns_per_key),
            ("decision.max_history", d.max_history),
            ("batcher.max_pending_per_type", self.batcher.max_pending_per_type),
            ("batcher.max_calls_per_window", self.batcher.max_calls_per_window),
            ("executor.max_concurrent", self.executor.max_concurrent),
            ("context.max_conversation_turns", self.context.max_conversation_turns),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }

        for (name, value) in [
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("batcher.flush_interval_ms", self.batcher.flush_interval_ms),
            ("executor.drain_interval_ms", self.executor.drain_interval_ms),
            ("scheduler.persist_interval_secs", self.scheduler.persist_interval_secs),
            ("scheduler.health_interval_secs", self.scheduler.health_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be a positive interval"
                )));
            }
        }

        if self.context.keep_recent_turns > self.context.max_conversation_turns {
            return Err(ConfigError::ValidationError(
                "context.keep_recent_turns must not exceed context.max_conversation_turns".into(),
            ));
        }

        if !matches!(self.storage.backend.as_str(), "file" | "memory" | "none") {
            return Err(ConfigError::ValidationError(format!(
                "storage.backend must be one of file, memory, none (got '{}')",
                self.storage.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
