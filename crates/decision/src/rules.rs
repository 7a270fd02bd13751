//! Built-in decision rules.
//!
//! These cover the decisions a local coding assistant asks most often.
//! Embedders can start from [`default_registry`] and register their own.

use serde_json::{Value, json};

use crate::registry::{ANY_ACTION, DecisionRegistry};

/// File names that are never deleted automatically.
pub const PROTECTED_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.toml",
    "Cargo.lock",
    ".env",
    ".gitignore",
    "go.mod",
    "go.sum",
    "requirements.txt",
    "pyproject.toml",
    "Dockerfile",
];

const LOCKFILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "go.sum",
];

const SENSITIVE_PATH_PARTS: &[&str] = &[
    "auth", "crypto", "security", "secret", "password", "token",
];

/// Above this many bytes a file is not processed locally.
const LOCAL_SIZE_LIMIT: u64 = 50_000;

/// The illustrative rule set with conservative safe defaults.
pub fn default_registry() -> DecisionRegistry {
    let mut registry = DecisionRegistry::new();
    registry
        .register("file_operation", "canDelete", can_delete)
        .register("file_operation", "canModify", can_modify)
        .register("task", "shouldRunLocally", should_run_locally)
        .register("task", "priority", task_priority)
        .register("cache", "shouldCache", should_cache)
        .register("code", "needsReview", needs_review)
        .set_safe_default("file_operation", ANY_ACTION, json!(false))
        .set_safe_default("task", "shouldRunLocally", json!(false))
        .set_safe_default("task", "priority", json!("normal"))
        .set_safe_default("cache", "shouldCache", json!(false))
        .set_safe_default("code", "needsReview", json!(true));
    registry
}

fn can_delete(ctx: &Value) -> Result<Value, String> {
    let path = required_str(ctx, "filePath")?;
    if PROTECTED_FILES.contains(&file_name(path)) {
        return Ok(json!(false));
    }
    Ok(json!(!is_production(ctx)))
}

fn can_modify(ctx: &Value) -> Result<Value, String> {
    let path = required_str(ctx, "filePath")?;
    let name = file_name(path);
    if LOCKFILES.contains(&name) {
        return Ok(json!(false));
    }
    if is_production(ctx) && name.starts_with(".env") {
        return Ok(json!(false));
    }
    Ok(json!(true))
}

fn should_run_locally(ctx: &Value) -> Result<Value, String> {
    if ctx.get("complexity").and_then(Value::as_str) == Some("high") {
        return Ok(json!(false));
    }
    let size = ctx.get("fileSize").and_then(Value::as_u64).unwrap_or(0);
    Ok(json!(size <= LOCAL_SIZE_LIMIT))
}

fn task_priority(ctx: &Value) -> Result<Value, String> {
    let text = ["description", "taskType"]
        .iter()
        .filter_map(|k| ctx.get(*k).and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if text.is_empty() {
        return Err("description or taskType is required".into());
    }

    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
    let priority = if has(&["security", "critical", "urgent", "outage"]) {
        "critical"
    } else if has(&["bug", "error", "fix", "crash"]) {
        "high"
    } else if has(&["docs", "documentation", "cleanup", "refactor"]) {
        "low"
    } else {
        "normal"
    };
    Ok(json!(priority))
}

fn should_cache(ctx: &Value) -> Result<Value, String> {
    if ctx.get("isVolatile").and_then(Value::as_bool) == Some(true) {
        return Ok(json!(false));
    }
    let size = ctx.get("fileSize").and_then(Value::as_u64).unwrap_or(0);
    Ok(json!(size <= 1_000_000))
}

fn needs_review(ctx: &Value) -> Result<Value, String> {
    if is_production(ctx) {
        return Ok(json!(true));
    }
    if ctx.get("linesChanged").and_then(Value::as_u64).unwrap_or(0) > 200 {
        return Ok(json!(true));
    }
    let sensitive = ctx
        .get("filePath")
        .and_then(Value::as_str)
        .map(|p| {
            let p = p.to_lowercase();
            SENSITIVE_PATH_PARTS.iter().any(|s| p.contains(s))
        })
        .unwrap_or(false);
    Ok(json!(sensitive))
}

fn required_str<'a>(ctx: &'a Value, key: &str) -> Result<&'a str, String> {
    ctx.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("{key} is required"))
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn is_production(ctx: &Value) -> bool {
    ctx.get("isProduction").and_then(Value::as_bool) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(category: &str, action: &str, ctx: Value) -> Result<Value, String> {
        let registry = default_registry();
        let rule = registry.rule(category, action).unwrap();
        rule(&ctx)
    }

    #[test]
    fn protected_files_cannot_be_deleted() {
        for path in ["package.json", "./Cargo.toml", "app/.env", "C:\\proj\\Cargo.lock"] {
            assert_eq!(
                decide("file_operation", "canDelete", json!({"filePath": path})),
                Ok(json!(false)),
                "{path}"
            );
        }
        assert_eq!(
            decide("file_operation", "canDelete", json!({"filePath": "src/old.rs"})),
            Ok(json!(true))
        );
        assert_eq!(
            decide(
                "file_operation",
                "canDelete",
                json!({"filePath": "src/old.rs", "isProduction": true})
            ),
            Ok(json!(false))
        );
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(decide("file_operation", "canDelete", json!({})).is_err());
    }

    #[test]
    fn lockfiles_are_not_modified() {
        assert_eq!(
            decide("file_operation", "canModify", json!({"filePath": "Cargo.lock"})),
            Ok(json!(false))
        );
        assert_eq!(
            decide("file_operation", "canModify", json!({"filePath": "src/lib.rs"})),
            Ok(json!(true))
        );
    }

    #[test]
    fn local_execution_depends_on_size_and_complexity() {
        assert_eq!(
            decide("task", "shouldRunLocally", json!({"fileSize": 1000})),
            Ok(json!(true))
        );
        assert_eq!(
            decide("task", "shouldRunLocally", json!({"fileSize": 900_000})),
            Ok(json!(false))
        );
        assert_eq!(
            decide("task", "shouldRunLocally", json!({"complexity": "high"})),
            Ok(json!(false))
        );
    }

    #[test]
    fn priority_keywords() {
        assert_eq!(
            decide("task", "priority", json!({"description": "Security patch"})),
            Ok(json!("critical"))
        );
        assert_eq!(
            decide("task", "priority", json!({"description": "fix login bug"})),
            Ok(json!("high"))
        );
        assert_eq!(
            decide("task", "priority", json!({"taskType": "documentation"})),
            Ok(json!("low"))
        );
        assert!(decide("task", "priority", json!({})).is_err());
    }

    #[test]
    fn review_for_sensitive_paths() {
        assert_eq!(
            decide("code", "needsReview", json!({"filePath": "src/auth/session.rs"})),
            Ok(json!(true))
        );
        assert_eq!(
            decide("code", "needsReview", json!({"filePath": "src/ui/button.rs"})),
            Ok(json!(false))
        );
    }

    #[test]
    fn default_registry_has_safe_defaults() {
        let registry = default_registry();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.safe_default("file_operation", "canRename"), json!(false));
        assert_eq!(registry.safe_default("code", "needsReview"), json!(true));
    }
}
