//! Context signatures and pattern tables.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::DecisionPattern;

/// A context reduced to the comparison keys it actually carries.
pub type Signature = BTreeMap<String, Value>;

/// Project `context` onto `keys`. Absent and `null` keys are left out.
pub fn project_signature(context: &Value, keys: &[String]) -> Signature {
    keys.iter()
        .filter_map(|k| match context.get(k) {
            Some(Value::Null) | None => None,
            Some(v) => Some((k.clone(), v.clone())),
        })
        .collect()
}

/// Fraction of the keys present in both signatures whose values agree.
/// `None` when the signatures share no keys.
pub fn overlap_ratio(a: &Signature, b: &Signature) -> Option<f64> {
    let mut compared = 0usize;
    let mut equal = 0usize;
    for (key, value) in a {
        if let Some(other) = b.get(key) {
            compared += 1;
            if other == value {
                equal += 1;
            }
        }
    }
    (compared > 0).then(|| equal as f64 / compared as f64)
}

/// Index of the best pattern matching `signature`: highest overlap at or
/// above `threshold`, most recently used on ties.
pub(crate) fn best_match(
    patterns: &[DecisionPattern],
    signature: &Signature,
    threshold: f64,
) -> Option<usize> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            overlap_ratio(&p.signature, signature)
                .filter(|r| *r >= threshold)
                .map(|r| (i, r, p.last_used))
        })
        .max_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        })
        .map(|(i, _, _)| i)
}

/// Insert or refresh the pattern for `signature`, then evict the least
/// recently used entries beyond `capacity`. Returns how many were evicted.
pub(crate) fn upsert(
    patterns: &mut Vec<DecisionPattern>,
    fresh: DecisionPattern,
    capacity: usize,
) -> usize {
    if let Some(existing) = patterns.iter_mut().find(|p| p.signature == fresh.signature) {
        existing.result = fresh.result;
        existing.last_used = fresh.last_used;
    } else {
        patterns.push(fresh);
    }
    evict_lru(patterns, capacity)
}

pub(crate) fn evict_lru(patterns: &mut Vec<DecisionPattern>, capacity: usize) -> usize {
    let mut evicted = 0;
    while patterns.len() > capacity {
        let oldest = patterns
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.last_used)
            .map(|(i, _)| i);
        match oldest {
            Some(i) => {
                patterns.remove(i);
                evicted += 1;
            }
            None => break,
        }
    }
    evicted
}

/// Reinforce a matched pattern. Confidence never decreases and never
/// exceeds 1.
pub(crate) fn reinforce(pattern: &mut DecisionPattern, step: f64, now: DateTime<Utc>) {
    pattern.confidence = (pattern.confidence + step).clamp(0.0, 1.0);
    pattern.usage_count += 1;
    pattern.last_used = now;
}
