//! Periodic job scheduling.
//!
//! [`TokioScheduler`] drives jobs from tokio interval timers in production.
//! [`ManualScheduler`] runs jobs only when told to, against an injected
//! clock, so background behavior can be tested deterministically.
//!
//! Both honor the same contract: a job never overlaps with itself, and a
//! panicking tick is logged without stopping later ticks.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use steward_core::{Clock, JobFn, JobHandle, Scheduler};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Tokio scheduler ─────────────────────────────────────────────────────────

/// Runs each job on its own background loop.
///
/// Must be used from within a tokio runtime.
#[derive(Default)]
pub struct TokioScheduler {
    handles: Mutex<Vec<JobHandle>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every job scheduled so far.
    pub fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.lock());
        for handle in &handles {
            handle.cancel();
        }
        info!(jobs = handles.len(), "Scheduler stopped");
    }

    pub fn job_count(&self) -> usize {
        self.lock().iter().filter(|h| !h.is_cancelled()).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JobHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, name: &str, interval: Duration, job: JobFn) -> JobHandle {
        let token = CancellationToken::new();
        let handle = JobHandle::new(name, token.clone());
        let name = name.to_string();

        tokio::spawn(async move {
            // First tick one full interval from now, not immediately.
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(job = %name, "Job cancelled");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                // Awaiting the tick keeps the job from overlapping itself.
                if let Err(e) = tokio::spawn(job()).await {
                    if e.is_panic() {
                        warn!(job = %name, "Job tick panicked");
                    } else {
                        debug!(job = %name, error = %e, "Job tick aborted");
                    }
                }
            }
        });

        debug!(job = %handle.name(), interval_ms = interval.as_millis() as u64, "Job scheduled");
        self.lock().push(handle.clone());
        handle
    }
}

// ── Manual scheduler ────────────────────────────────────────────────────────

struct ManualJob {
    name: String,
    interval: Duration,
    job: JobFn,
    token: CancellationToken,
    next_due: DateTime<Utc>,
}

/// A scheduler that only runs jobs from [`ManualScheduler::run_due`] or
/// [`ManualScheduler::run`].
pub struct ManualScheduler {
    clock: Arc<dyn Clock>,
    jobs: Mutex<Vec<ManualJob>>,
}

impl ManualScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Run every job whose next tick is due by the clock, in registration
    /// order. Missed ticks collapse into one. Returns the names that ran.
    pub async fn run_due(&self) -> Vec<String> {
        let now = self.clock.now();
        let due: Vec<(String, JobFn)> = {
            let mut jobs = self.lock();
            jobs.retain(|j| !j.token.is_cancelled());
            jobs.iter_mut()
                .filter(|j| j.next_due <= now)
                .map(|j| {
                    j.next_due = after(now, j.interval);
                    (j.name.clone(), j.job.clone())
                })
                .collect()
        };

        for (_, job) in &due {
            job().await;
        }
        due.into_iter().map(|(name, _)| name).collect()
    }

    /// Run one job now, regardless of its schedule.
    pub async fn run(&self, name: &str) -> bool {
        let job = self
            .lock()
            .iter()
            .find(|j| j.name == name && !j.token.is_cancelled())
            .map(|j| j.job.clone());
        match job {
            Some(job) => {
                job().await;
                true
            }
            None => false,
        }
    }

    /// Names of live jobs, in registration order.
    pub fn job_names(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|j| !j.token.is_cancelled())
            .map(|j| j.name.clone())
            .collect()
    }

    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        self.lock()
            .iter()
            .find(|j| j.name == name && !j.token.is_cancelled())
            .map(|j| j.interval)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ManualJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, name: &str, interval: Duration, job: JobFn) -> JobHandle {
        let token = CancellationToken::new();
        let next_due = after(self.clock.now(), interval);
        self.lock().push(ManualJob {
            name: name.to_string(),
            interval,
            job,
            token: token.clone(),
            next_due,
        });
        JobHandle::new(name, token)
    }
}

fn after(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(interval)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
