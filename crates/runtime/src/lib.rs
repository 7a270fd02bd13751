//! # Steward Runtime
//!
//! Wires the cache, batcher, context store, decision engine and task
//! executor into one [`Steward`] service and drives its five background
//! jobs through a [`steward_core::Scheduler`]:
//!
//! | Job            | Interval (default) | Work                                   |
//! |----------------|--------------------|----------------------------------------|
//! | `cache_sweep`  | 60 s               | drop expired cache entries             |
//! | `batch_flush`  | 2 s                | dispatch pending batched operations    |
//! | `persist`      | 30 s               | compact context, persist context + patterns |
//! | `task_drain`   | 1 s                | run up to 3 queued tasks, purge history |
//! | `health_check` | 60 s               | log and publish a [`HealthReport`]     |

pub mod health;
pub mod service;

pub use health::{HealthReport, HealthStatus};
pub use service::{
    JOB_BATCH_FLUSH, JOB_CACHE_SWEEP, JOB_HEALTH, JOB_PERSIST, JOB_TASK_DRAIN, Steward,
    StewardBuilder,
};
