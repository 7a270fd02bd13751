//! Task execution for Steward.
//!
//! Routing order for a submitted task:
//! 1. A cached result for the same type and parameters is returned as is.
//! 2. A registered processor, or a built-in one for "simple" types, runs
//!    the task inline.
//! 3. Everything else waits in a priority queue drained on a timer, where
//!    the remote executor picks up what no processor can handle.

pub mod executor;
pub mod simple;

pub use executor::{DrainReport, ExecutorStats, TaskExecutor, task_cache_key};
pub use simple::builtin_processors;
