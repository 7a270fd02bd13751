//! Health report for the periodic health check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use steward_cache::CacheStats;
use steward_config::SchedulerConfig;
use steward_context::ContextStats;
use steward_decision::DecisionStats;

/// Hit ratios are only judged after this many lookups.
pub const MIN_LOOKUPS_FOR_HIT_RATIO: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Degraded => f.write_str("degraded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Why the status is degraded; empty when healthy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    pub cache: CacheStats,
    pub queue_depth: usize,
    pub running_tasks: usize,
    pub pending_batches: usize,
    pub decisions: DecisionStats,
    pub context: ContextStats,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Reasons the given counters count as degraded under `config`.
pub(crate) fn degradation_reasons(
    config: &SchedulerConfig,
    cache: &CacheStats,
    queue_depth: usize,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if queue_depth > config.health_queue_warn_depth {
        reasons.push(format!(
            "task queue depth {queue_depth} exceeds {}",
            config.health_queue_warn_depth
        ));
    }
    if cache.lookups() >= MIN_LOOKUPS_FOR_HIT_RATIO && cache.hit_ratio < config.health_min_hit_ratio
    {
        reasons.push(format!(
            "cache hit ratio {:.2} below {:.2}",
            cache.hit_ratio, config.health_min_hit_ratio
        ));
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(hits: u64, misses: u64) -> CacheStats {
        let lookups = hits + misses;
        let ratio = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        CacheStats {
            hits,
            misses,
            entries: 0,
            hit_ratio: ratio,
            savings_percentage: ratio * 100.0,
        }
    }

    #[test]
    fn cold_cache_is_not_degraded() {
        let config = SchedulerConfig::default();
        assert!(degradation_reasons(&config, &cache(0, 19), 0).is_empty());
    }

    #[test]
    fn low_hit_ratio_degrades() {
        let config = SchedulerConfig::default();
        let reasons = degradation_reasons(&config, &cache(0, 20), 0);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("hit ratio"));
    }

    #[test]
    fn deep_queue_degrades() {
        let config = SchedulerConfig::default();
        let reasons =
            degradation_reasons(&config, &cache(10, 10), config.health_queue_warn_depth + 1);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("queue depth"));
    }
}
