//! Built-in processors for simple task types.
//!
//! Each is a pure transform over a small `text` parameter, cheap enough to
//! run inline on the caller's task.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use steward_core::{TaskError, TaskProcessor};

pub fn builtin_processors() -> Vec<Arc<dyn TaskProcessor>> {
    vec![
        Arc::new(WordCount),
        Arc::new(LineCount),
        Arc::new(JsonValidate),
        Arc::new(TextTransform),
        Arc::new(SortLines),
    ]
}

fn text_param<'a>(parameters: &'a Value) -> Result<&'a str, TaskError> {
    parameters
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::InvalidParameters("'text' must be a string".into()))
}

pub struct WordCount;

#[async_trait]
impl TaskProcessor for WordCount {
    fn task_type(&self) -> &str {
        "word_count"
    }

    async fn process(&self, parameters: &Value) -> Result<Value, TaskError> {
        let text = text_param(parameters)?;
        Ok(json!({
            "words": text.split_whitespace().count(),
            "characters": text.chars().count(),
            "lines": text.lines().count(),
        }))
    }
}

pub struct LineCount;

#[async_trait]
impl TaskProcessor for LineCount {
    fn task_type(&self) -> &str {
        "line_count"
    }

    async fn process(&self, parameters: &Value) -> Result<Value, TaskError> {
        let text = text_param(parameters)?;
        Ok(json!({
            "lines": text.lines().count(),
            "non_empty": text.lines().filter(|l| !l.trim().is_empty()).count(),
        }))
    }
}

pub struct JsonValidate;

#[async_trait]
impl TaskProcessor for JsonValidate {
    fn task_type(&self) -> &str {
        "json_validate"
    }

    async fn process(&self, parameters: &Value) -> Result<Value, TaskError> {
        let text = text_param(parameters)?;
        Ok(match serde_json::from_str::<Value>(text) {
            Ok(_) => json!({"valid": true}),
            Err(e) => json!({
                "valid": false,
                "error": e.to_string(),
                "line": e.line(),
                "column": e.column(),
            }),
        })
    }
}

pub struct TextTransform;

#[async_trait]
impl TaskProcessor for TextTransform {
    fn task_type(&self) -> &str {
        "text_transform"
    }

    async fn process(&self, parameters: &Value) -> Result<Value, TaskError> {
        let text = text_param(parameters)?;
        let operation = parameters
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("trim");
        let out = match operation {
            "upper" | "uppercase" => text.to_uppercase(),
            "lower" | "lowercase" => text.to_lowercase(),
            "trim" => text.trim().to_string(),
            "reverse" => text.chars().rev().collect(),
            other => {
                return Err(TaskError::InvalidParameters(format!(
                    "unknown operation '{other}'"
                )));
            }
        };
        Ok(json!({ "text": out }))
    }
}

pub struct SortLines;

#[async_trait]
impl TaskProcessor for SortLines {
    fn task_type(&self) -> &str {
        "sort_lines"
    }

    async fn process(&self, parameters: &Value) -> Result<Value, TaskError> {
        let text = text_param(parameters)?;
        let reverse = parameters.get("reverse").and_then(Value::as_bool) == Some(true);
        let unique = parameters.get("unique").and_then(Value::as_bool) == Some(true);

        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort_unstable();
        if unique {
            lines.dedup();
        }
        if reverse {
            lines.reverse();
        }
        Ok(json!({ "text": lines.join("\n"), "lines": lines.len() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn word_count_counts() {
        let out = WordCount
            .process(&json!({"text": "hello brave\nnew world"}))
            .await
            .unwrap();
        assert_eq!(out["words"], 4);
        assert_eq!(out["lines"], 2);
    }

    #[tokio::test]
    async fn missing_text_is_invalid() {
        let err = LineCount.process(&json!({})).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn json_validation_reports_position() {
        let ok = JsonValidate.process(&json!({"text": "{\"a\": 1}"})).await.unwrap();
        assert_eq!(ok["valid"], true);
        let bad = JsonValidate.process(&json!({"text": "{\"a\": }"})).await.unwrap();
        assert_eq!(bad["valid"], false);
        assert_eq!(bad["line"], 1);
    }

    #[tokio::test]
    async fn transforms() {
        let out = TextTransform
            .process(&json!({"text": "Abc", "operation": "upper"}))
            .await
            .unwrap();
        assert_eq!(out["text"], "ABC");
        assert!(
            TextTransform
                .process(&json!({"text": "x", "operation": "rot13"}))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn sort_unique_reverse() {
        let out = SortLines
            .process(&json!({"text": "b\na\nb\nc", "unique": true, "reverse": true}))
            .await
            .unwrap();
        assert_eq!(out["text"], "c\nb\na");
        assert_eq!(out["lines"], 3);
    }

    #[test]
    fn builtin_types_are_distinct() {
        let mut types: Vec<String> = builtin_processors()
            .iter()
            .map(|p| p.task_type().to_string())
            .collect();
        types.sort();
        types.dedup();
        assert_eq!(types.len(), 5);
    }
}
