//! The `Steward` service: one explicitly constructed instance owning every
//! component, its background jobs and its persistence lifecycle.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use steward_cache::{FlushReport, RequestBatcher, TieredCache};
use steward_config::AppConfig;
use steward_context::ContextStore;
use steward_core::{
    Clock, DomainEvent, Error, EventBus, JobHandle, KeyValueStore, LoadReport, PersistReport,
    RemoteExecutor, Result, Scheduler, SystemClock, UnavailableRemote, job,
};
use steward_decision::{DecisionEngine, DecisionRegistry, rules};
use steward_executor::{DrainReport, TaskExecutor};
use tracing::{debug, info, warn};

use crate::health::{HealthReport, HealthStatus, degradation_reasons};

/// Names of the periodic jobs, in the order they are scheduled.
pub const JOB_CACHE_SWEEP: &str = "cache_sweep";
pub const JOB_BATCH_FLUSH: &str = "batch_flush";
pub const JOB_PERSIST: &str = "persist";
pub const JOB_TASK_DRAIN: &str = "task_drain";
pub const JOB_HEALTH: &str = "health_check";

/// Builder for [`Steward`]. Anything not supplied gets the production
/// default: system clock, the configured store, no remote executor and the
/// built-in rule set.
pub struct StewardBuilder {
    config: AppConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn KeyValueStore>>,
    remote: Option<Arc<dyn RemoteExecutor>>,
    registry: Option<DecisionRegistry>,
    events: Option<Arc<EventBus>>,
}

impl StewardBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteExecutor>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn registry(mut self, registry: DecisionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn build(self) -> Result<Steward> {
        self.config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self.store.unwrap_or_else(|| {
            steward_store::from_backend(
                &config.storage.backend,
                config.storage.resolved_data_dir(),
            )
        });
        let remote = self.remote.unwrap_or_else(|| Arc::new(UnavailableRemote));
        let registry = self.registry.unwrap_or_else(rules::default_registry);
        let events = self.events.unwrap_or_default();

        let cache = Arc::new(TieredCache::new(&config.cache, clock.clone()));
        let batcher = Arc::new(RequestBatcher::new(config.batcher.clone(), clock.clone()));
        let context = Arc::new(
            ContextStore::new(config.context.clone(), clock.clone()).with_events(events.clone()),
        );
        let executor = Arc::new(
            TaskExecutor::new(
                config.executor.clone(),
                cache.clone(),
                context.clone(),
                remote.clone(),
                clock.clone(),
            )
            .with_events(events.clone()),
        );
        let decisions = Arc::new(
            DecisionEngine::new(
                config.decision.clone(),
                registry,
                context.clone(),
                cache.clone(),
                clock.clone(),
            )
            .with_queue_probe(executor.clone())
            .with_events(events.clone()),
        );

        info!(
            store = store.name(),
            remote = remote.name(),
            decisions = decisions.decisions().len(),
            "Steward assembled"
        );

        Ok(Steward {
            config,
            clock,
            store,
            events,
            cache,
            batcher,
            context,
            decisions,
            executor,
            jobs: Mutex::new(Vec::new()),
        })
    }
}

pub struct Steward {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
    cache: Arc<TieredCache>,
    batcher: Arc<RequestBatcher>,
    context: Arc<ContextStore>,
    decisions: Arc<DecisionEngine>,
    executor: Arc<TaskExecutor>,
    jobs: Mutex<Vec<JobHandle>>,
}

impl Steward {
    pub fn builder(config: AppConfig) -> StewardBuilder {
        StewardBuilder {
            config,
            clock: None,
            store: None,
            remote: None,
            registry: None,
            events: None,
        }
    }

    /// Production wiring straight from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    // ── Components ─────────────────────────────────────────────────

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn batcher(&self) -> &Arc<RequestBatcher> {
        &self.batcher
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub fn decisions(&self) -> &Arc<DecisionEngine> {
        &self.decisions
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Restore context and decision state from the store. Corrupt or
    /// missing state starts empty; the report says which.
    pub async fn init(&self) -> LoadReport {
        let timeout = self.config.storage.timeout();
        let mut report = self.context.load(self.store.as_ref(), timeout).await;
        report.merge(self.decisions.load(self.store.as_ref(), timeout).await);

        if report.dropped > 0 {
            warn!(
                restored = report.restored,
                dropped = report.dropped,
                "Restored state with corrupt entries dropped"
            );
        } else {
            info!(
                restored = report.restored,
                missing_keys = report.missing_keys,
                "Restored state"
            );
        }
        report
    }

    /// Schedule the five periodic jobs. Returns how many were scheduled.
    pub fn start(self: &Arc<Self>, scheduler: &dyn Scheduler) -> usize {
        let cfg = &self.config;
        self.schedule(scheduler, JOB_CACHE_SWEEP, cfg.cache.sweep_interval(), |s| async move {
            s.sweep_cache();
        });
        self.schedule(scheduler, JOB_BATCH_FLUSH, cfg.batcher.flush_interval(), |s| async move {
            s.flush_batches().await;
        });
        self.schedule(scheduler, JOB_PERSIST, cfg.scheduler.persist_interval(), |s| async move {
            s.context.compact();
            if let Err(e) = s.persist().await {
                warn!(error = %e, "Periodic persistence failed");
            }
        });
        self.schedule(scheduler, JOB_TASK_DRAIN, cfg.executor.drain_interval(), |s| async move {
            s.drain_tasks().await;
        });
        self.schedule(scheduler, JOB_HEALTH, cfg.scheduler.health_interval(), |s| async move {
            s.check_health();
        });

        let count = self.lock_jobs().len();
        info!(jobs = count, "Background jobs started");
        count
    }

    /// Stop every job and, when configured, persist one last time.
    pub async fn shutdown(&self) -> Result<()> {
        let jobs = std::mem::take(&mut *self.lock_jobs());
        for handle in &jobs {
            handle.cancel();
        }
        info!(jobs = jobs.len(), "Background jobs stopped");

        if self.config.storage.persist_on_shutdown {
            self.persist().await?;
        }
        Ok(())
    }

    // ── Job bodies ─────────────────────────────────────────────────

    /// Drop expired cache entries. `None` when a sweep is already running.
    pub fn sweep_cache(&self) -> Option<usize> {
        let removed = self.cache.cleanup_expired()?;
        if removed > 0 {
            self.events.publish(DomainEvent::CacheSwept {
                removed,
                timestamp: self.clock.now(),
            });
        }
        Some(removed)
    }

    /// Dispatch every pending batched operation.
    pub async fn flush_batches(&self) -> Option<FlushReport> {
        let report = self.batcher.flush().await?;
        let now = self.clock.now();
        for (op_type, items) in &report.per_type {
            self.events.publish(DomainEvent::BatchFlushed {
                op_type: op_type.clone(),
                items: *items,
                timestamp: now,
            });
        }
        Some(report)
    }

    /// Write context and decision state to the store.
    pub async fn persist(&self) -> Result<PersistReport> {
        let timeout = self.config.storage.timeout();
        let mut report = self.context.persist(self.store.as_ref(), timeout).await?;
        let decisions = self.decisions.persist(self.store.as_ref(), timeout).await?;
        report.keys_written += decisions.keys_written;
        report.entries_written += decisions.entries_written;
        info!(
            keys = report.keys_written,
            entries = report.entries_written,
            store = self.store.name(),
            "Persisted state"
        );
        Ok(report)
    }

    /// Run one queue drain, then forget old finished tasks.
    pub async fn drain_tasks(&self) -> Option<DrainReport> {
        let report = self.executor.drain_queue().await;
        let purged = self.executor.purge_history();
        if purged > 0 {
            debug!(purged, "Purged task history");
        }
        report
    }

    /// Snapshot component health without side effects.
    pub fn health(&self) -> HealthReport {
        let cache = self.cache.stats();
        let queue_depth = self.executor.queue_depth();
        let reasons = degradation_reasons(&self.config.scheduler, &cache, queue_depth);
        HealthReport {
            status: if reasons.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            reasons,
            cache,
            queue_depth,
            running_tasks: self.executor.running_count(),
            pending_batches: self.batcher.pending_total(),
            decisions: self.decisions.stats(),
            context: self.context.stats(),
            checked_at: self.clock.now(),
        }
    }

    /// The health job: snapshot, log and publish.
    pub fn check_health(&self) -> HealthReport {
        let report = self.health();
        if report.is_healthy() {
            debug!(
                queue_depth = report.queue_depth,
                hit_ratio = report.cache.hit_ratio,
                "Health check passed"
            );
        } else {
            warn!(reasons = ?report.reasons, "Health check degraded");
        }
        self.events.publish(DomainEvent::HealthChecked {
            healthy: report.is_healthy(),
            queue_depth: report.queue_depth,
            timestamp: report.checked_at,
        });
        report
    }

    // ── Internal ───────────────────────────────────────────────────

    /// Schedule `body` on a weak handle so jobs never keep the service alive.
    fn schedule<F, Fut>(
        self: &Arc<Self>,
        scheduler: &dyn Scheduler,
        name: &str,
        every: Duration,
        body: F,
    ) where
        F: Fn(Arc<Steward>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let handle = scheduler.schedule(
            name,
            every,
            job(move || {
                let tick = weak.upgrade().map(&body);
                async move {
                    if let Some(tick) = tick {
                        tick.await;
                    }
                }
            }),
        );
        self.lock_jobs().push(handle);
    }

    fn lock_jobs(&self) -> MutexGuard<'_, Vec<JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
