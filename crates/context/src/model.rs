//! Context entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use steward_config::RelevanceLimitsConfig;

/// One user interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_input: String,
    pub response: String,
    /// 3 = high severity, 2 = medium, 1 = routine.
    pub importance: u8,
}

impl ConversationTurn {
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.user_input, self.response).to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContextEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub last_updated: DateTime<Utc>,
    pub update_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeContextEntry {
    pub path: String,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default)]
    pub analysis: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContextEntry {
    /// Slug of the description; stable across updates.
    pub id: String,
    pub description: String,
    pub status: String,
    pub last_updated: DateTime<Utc>,
}

impl TaskContextEntry {
    /// Whether the task reached a terminal status.
    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed" | "cancelled")
    }
}

/// Per-sub-store result caps for relevance queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceLimits {
    pub conversation: usize,
    pub code: usize,
    pub tasks: usize,
    pub project: usize,
}

impl Default for RelevanceLimits {
    fn default() -> Self {
        Self::from(&RelevanceLimitsConfig::default())
    }
}

impl From<&RelevanceLimitsConfig> for RelevanceLimits {
    fn from(c: &RelevanceLimitsConfig) -> Self {
        Self {
            conversation: c.conversation,
            code: c.code,
            tasks: c.tasks,
            project: c.project,
        }
    }
}

/// Everything relevant to a query, already sorted and truncated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevantContext {
    pub conversation: Vec<ConversationTurn>,
    pub project: Vec<ProjectContextEntry>,
    pub code: Vec<CodeContextEntry>,
    pub tasks: Vec<TaskContextEntry>,
}

impl RelevantContext {
    pub fn is_empty(&self) -> bool {
        self.conversation.is_empty()
            && self.project.is_empty()
            && self.code.is_empty()
            && self.tasks.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub code_pruned: usize,
    pub tasks_pruned: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub conversation_turns: usize,
    pub high_importance_turns: usize,
    pub project_entries: usize,
    pub code_entries: usize,
    pub task_entries: usize,
    pub compressions: u64,
}

/// Normalize a description into a stable id: lowercase ASCII alphanumerics
/// separated by single dashes, at most 64 characters.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len().min(64));
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
            if slug.len() >= 64 {
                break;
            }
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

/// Lowercase alphanumeric words of at least three characters.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = words(query).filter(|w| w.len() >= 3).collect();
    terms.sort();
    terms.dedup();
    terms
}

pub(crate) fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}
