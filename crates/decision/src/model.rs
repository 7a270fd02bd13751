//! Decision data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use steward_core::DecisionError;

use crate::pattern::Signature;

/// How a decision was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionMethod {
    Rule,
    Pattern,
    Default,
}

impl DecisionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionMethod::Rule => "rule",
            DecisionMethod::Pattern => "pattern",
            DecisionMethod::Default => "default",
        }
    }
}

impl fmt::Display for DecisionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Id of the history record; pass it to `record_outcome`.
    pub id: String,
    pub category: String,
    pub action: String,
    pub result: serde_json::Value,
    pub method: DecisionMethod,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,

    /// Why the safe default was used, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,

    /// Why the safe default was used.
    #[serde(skip)]
    pub fallback: Option<DecisionError>,
}

impl Decision {
    pub fn is_default(&self) -> bool {
        self.method == DecisionMethod::Default
    }
}

/// One entry of the decision history ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub category: String,
    pub action: String,
    /// The caller-supplied context.
    pub context: serde_json::Value,
    pub result: serde_json::Value,
    pub method: DecisionMethod,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// Set after the fact through `record_outcome`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// A remembered (signature, result) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPattern {
    pub category: String,
    pub action: String,
    pub signature: Signature,
    pub result: serde_json::Value,
    pub confidence: f64,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionStats {
    pub total_decisions: u64,
    pub rule_decisions: u64,
    pub pattern_decisions: u64,
    pub default_decisions: u64,
    pub history_len: usize,
    pub pattern_keys: usize,
    pub patterns: usize,
    pub average_pattern_confidence: f64,
    /// Share of decisions answered from the pattern table.
    pub pattern_hit_ratio: f64,
}
