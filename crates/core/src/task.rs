//! Task model and the local processor seam.
//!
//! A task is a unit of work submitted to the executor. Tasks with a
//! registered processor (or a "simple" type) run locally; everything else
//! waits in the priority queue for the remote executor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::TaskError;

/// Scheduling priority. Higher variants drain first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Lifecycle state of a task.
///
/// `Queued -> Running -> Completed | Failed`, or `Queued -> Cancelled`.
/// A task that has left `Queued` never returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the executor resolved a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionRoute {
    /// Answered from the tiered cache without running anything.
    Cache,
    /// Ran in-process through a registered or built-in processor.
    Local,
    /// Waited in the queue and ran on a drain tick.
    Queued,
}

/// What a caller submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub task_type: String,

    #[serde(default)]
    pub parameters: serde_json::Value,

    #[serde(default)]
    pub priority: TaskPriority,

    /// Free-form description, mirrored into the context store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            priority: TaskPriority::Normal,
            description: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A submitted task and everything recorded about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: String,

    pub parameters: serde_json::Value,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub route: ExecutionRoute,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a fresh task from a spec. The caller decides the route.
    pub fn from_spec(spec: TaskSpec, route: ExecutionRoute, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: spec.task_type,
            parameters: spec.parameters,
            priority: spec.priority,
            status: TaskStatus::Queued,
            route,
            description: spec.description,
            created_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    /// Text used for the context store's task entry.
    pub fn describe(&self) -> String {
        match &self.description {
            Some(d) if !d.trim().is_empty() => d.clone(),
            _ => format!("{} task {}", self.task_type, self.id),
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
    }

    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(now);
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(now);
    }
}

/// A local handler for one task type.
///
/// Processors are registered on the executor by name and must be pure with
/// respect to the executor's state: they receive the parameters and return a
/// JSON result.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// The task type this processor handles (e.g., "word_count").
    fn task_type(&self) -> &str;

    /// Run the task.
    async fn process(&self, parameters: &serde_json::Value)
    -> Result<serde_json::Value, TaskError>;
}

/// Read-only view of queue depth, for components that must not depend on
/// the executor crate.
pub trait QueueProbe: Send + Sync {
    fn queue_depth(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        assert!("urgent".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn task_lifecycle_stamps_times() {
        let now = Utc::now();
        let mut task = Task::from_spec(
            TaskSpec::new("word_count", serde_json::json!({"text": "a b"})),
            ExecutionRoute::Local,
            now,
        );
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(!task.status.is_terminal());

        task.mark_running(now);
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        task.fail("boom", now);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert!(task.status.is_terminal());
    }

    #[test]
    fn spec_deserializes_with_type_field() {
        let spec: TaskSpec = serde_json::from_str(
            r#"{"type":"lint","parameters":{"path":"a.rs"},"priority":"high"}"#,
        )
        .unwrap();
        assert_eq!(spec.task_type, "lint");
        assert_eq!(spec.priority, TaskPriority::High);
    }

    #[test]
    fn describe_falls_back_to_type() {
        let task = Task::from_spec(
            TaskSpec::new("lint", serde_json::Value::Null),
            ExecutionRoute::Queued,
            Utc::now(),
        );
        assert!(task.describe().starts_with("lint task "));
    }
}
