//! Tiered TTL cache.
//!
//! Entries are scoped by `(category, key)`. Each category has its own
//! time-to-live from the configured table; unknown categories use the
//! default TTL. Expiry is checked lazily on `get` and eagerly by
//! [`TieredCache::cleanup_expired`], which the runtime calls on a timer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use steward_config::CacheConfig;
use steward_core::Clock;
use steward_core::clock::elapsed_at_least;
use tracing::{debug, info};

/// A cached value and when it was stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub category: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Cumulative cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    /// `hits / (hits + misses)`, 0 before the first lookup.
    pub hit_ratio: f64,
    /// The hit ratio as a percentage of lookups answered without recomputing.
    pub savings_percentage: f64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<(String, String), CacheEntry>,
    hits: u64,
    misses: u64,
}

pub struct TieredCache {
    ttls: BTreeMap<String, Duration>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    sweeping: AtomicBool,
}

impl TieredCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttls(config.ttl_table(), config.default_ttl(), clock)
    }

    pub fn with_ttls(
        ttls: BTreeMap<String, Duration>,
        default_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ttls,
            default_ttl,
            clock,
            state: Mutex::new(CacheState::default()),
            sweeping: AtomicBool::new(false),
        }
    }

    /// The TTL applied to `category`.
    pub fn ttl(&self, category: &str) -> Duration {
        self.ttls.get(category).copied().unwrap_or(self.default_ttl)
    }

    /// Look up a live entry. A stale entry counts as a miss and is removed.
    pub fn get(&self, key: &str, category: &str) -> Option<serde_json::Value> {
        let now = self.clock.now();
        let ttl = self.ttl(category);
        let map_key = (category.to_string(), key.to_string());

        let mut state = self.lock();
        let live = match state.entries.get(&map_key) {
            Some(entry) if !elapsed_at_least(now, entry.created_at, ttl) => {
                Some(entry.value.clone())
            }
            Some(_) => {
                state.entries.remove(&map_key);
                debug!(key, category, "Cache entry expired");
                None
            }
            None => None,
        };

        if live.is_some() {
            state.hits += 1;
            debug!(key, category, "Cache hit");
        } else {
            state.misses += 1;
        }
        live
    }

    /// Store `value`, replacing any previous entry for the same key.
    pub fn set(&self, key: &str, category: &str, value: serde_json::Value) {
        let entry = CacheEntry {
            key: key.to_string(),
            category: category.to_string(),
            value,
            created_at: self.clock.now(),
        };
        self.lock()
            .entries
            .insert((category.to_string(), key.to_string()), entry);
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str, category: &str) -> bool {
        self.lock()
            .entries
            .remove(&(category.to_string(), key.to_string()))
            .is_some()
    }

    /// Remove every entry of `category`. Returns how many were removed.
    pub fn clear_category(&self, category: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|(c, _), _| c != category);
        before - state.entries.len()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Remove every expired entry.
    ///
    /// Returns `None` when another sweep is still in progress; the caller
    /// simply skips this tick.
    pub fn cleanup_expired(&self) -> Option<usize> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Cache sweep already running, skipping");
            return None;
        }

        let now = self.clock.now();
        let removed = {
            let mut state = self.lock();
            let before = state.entries.len();
            state
                .entries
                .retain(|(category, _), entry| {
                    !elapsed_at_least(now, entry.created_at, self.ttl(category))
                });
            before - state.entries.len()
        };

        self.sweeping.store(false, Ordering::Release);

        if removed > 0 {
            info!(removed, "Swept expired cache entries");
        }
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        let hit_ratio = if lookups == 0 {
            0.0
        } else {
            state.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
            hit_ratio,
            savings_percentage: hit_ratio * 100.0,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
