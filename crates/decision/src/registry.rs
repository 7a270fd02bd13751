//! Registry of valid decisions, their rule functions, and safe defaults.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use steward_config::{DecisionConfig, SafeDefaultConfig};

/// A pure rule: enriched context in, result out.
pub type RuleFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Wildcard action for category-wide safe defaults.
pub const ANY_ACTION: &str = "*";

#[derive(Clone, Default)]
pub struct DecisionRegistry {
    rules: BTreeMap<(String, String), RuleFn>,
    safe_defaults: HashMap<(String, String), Value>,
    fallback: Value,
}

impl DecisionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the rule for `category.action`.
    pub fn register<F>(&mut self, category: &str, action: &str, rule: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.rules
            .insert((category.to_string(), action.to_string()), Arc::new(rule));
        self
    }

    /// Safe default for `category.action`; use [`ANY_ACTION`] to cover the
    /// whole category.
    pub fn set_safe_default(&mut self, category: &str, action: &str, value: Value) -> &mut Self {
        self.safe_defaults
            .insert((category.to_string(), action.to_string()), value);
        self
    }

    /// Result used when nothing more specific is configured.
    pub fn set_fallback(&mut self, value: Value) -> &mut Self {
        self.fallback = value;
        self
    }

    /// Apply configured safe defaults and the global fallback.
    pub fn apply_config(&mut self, config: &DecisionConfig) -> &mut Self {
        self.apply_safe_defaults(&config.safe_defaults);
        if !config.fallback_default.is_null() {
            self.fallback = config.fallback_default.clone();
        }
        self
    }

    pub fn apply_safe_defaults(&mut self, defaults: &[SafeDefaultConfig]) -> &mut Self {
        for d in defaults {
            self.set_safe_default(&d.category, &d.action, d.value.clone());
        }
        self
    }

    pub fn contains(&self, category: &str, action: &str) -> bool {
        self.rules
            .contains_key(&(category.to_string(), action.to_string()))
    }

    pub fn rule(&self, category: &str, action: &str) -> Option<RuleFn> {
        self.rules
            .get(&(category.to_string(), action.to_string()))
            .cloned()
    }

    /// Exact default, then the category wildcard, then the global fallback.
    pub fn safe_default(&self, category: &str, action: &str) -> Value {
        self.safe_defaults
            .get(&(category.to_string(), action.to_string()))
            .or_else(|| {
                self.safe_defaults
                    .get(&(category.to_string(), ANY_ACTION.to_string()))
            })
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Every registered `(category, action)`, sorted.
    pub fn decisions(&self) -> Vec<(String, String)> {
        self.rules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for DecisionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionRegistry")
            .field("decisions", &self.decisions())
            .field("safe_defaults", &self.safe_defaults.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn safe_default_resolution_order() {
        let mut registry = DecisionRegistry::new();
        registry
            .set_safe_default("file_operation", "canDelete", json!(false))
            .set_safe_default("file_operation", ANY_ACTION, json!("deny"))
            .set_fallback(json!({"ok": false}));

        assert_eq!(registry.safe_default("file_operation", "canDelete"), json!(false));
        assert_eq!(registry.safe_default("file_operation", "canMove"), json!("deny"));
        assert_eq!(registry.safe_default("weather", "rain"), json!({"ok": false}));
    }

    #[test]
    fn config_overrides_defaults() {
        let mut registry = DecisionRegistry::new();
        registry.set_safe_default("task", "priority", json!("normal"));

        let mut config = DecisionConfig::default();
        config.safe_defaults.push(SafeDefaultConfig {
            category: "task".into(),
            action: "priority".into(),
            value: json!("low"),
        });
        config.fallback_default = json!(0);
        registry.apply_config(&config);

        assert_eq!(registry.safe_default("task", "priority"), json!("low"));
        assert_eq!(registry.safe_default("x", "y"), json!(0));
    }

    #[test]
    fn rules_are_looked_up_by_pair() {
        let mut registry = DecisionRegistry::new();
        registry.register("cache", "shouldCache", |_| Ok(json!(true)));
        assert!(registry.contains("cache", "shouldCache"));
        assert!(!registry.contains("cache", "shouldEvict"));
        let rule = registry.rule("cache", "shouldCache").unwrap();
        assert_eq!(rule(&json!({})), Ok(json!(true)));
        assert_eq!(registry.decisions(), vec![("cache".into(), "shouldCache".into())]);
    }
}
