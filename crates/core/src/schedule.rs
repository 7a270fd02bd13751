//! Periodic job seam.
//!
//! The runtime registers its five background jobs (cache sweep, batch flush,
//! persistence, queue drain, health check) through a [`Scheduler`]. The
//! production implementation drives them from tokio timers; tests use a
//! manual scheduler that only runs jobs when ticked.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One run of a periodic job.
pub type JobFuture = BoxFuture<'static, ()>;

/// A periodic job body. Called once per tick.
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wrap an async closure as a [`JobFn`].
pub fn job<F, Fut>(f: F) -> JobFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> JobFuture { Box::pin(f()) })
}

pub trait Scheduler: Send + Sync {
    /// Run `job` every `interval` until the returned handle is cancelled.
    ///
    /// Implementations must not start a tick of a job while the previous
    /// tick of the same job is still running.
    fn schedule(&self, name: &str, interval: Duration, job: JobFn) -> JobHandle;
}

/// Cancellation handle for a scheduled job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    name: String,
    token: CancellationToken,
}

impl JobHandle {
    pub fn new(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the job. Idempotent; a tick already running finishes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
