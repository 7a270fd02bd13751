//! # Steward Core
//!
//! Domain types, collaborator traits, and error definitions for the Steward
//! decision-and-optimization core. Every component crate depends inward on
//! this one.
//!
//! ## Seams
//!
//! The core never talks to the outside world directly. Everything external
//! is a trait defined here:
//! - [`KeyValueStore`]: persistence of bounded state slices
//! - [`RemoteExecutor`]: the expensive call the executor tries to avoid
//! - [`Clock`] and [`Scheduler`]: time and periodic jobs, swappable for
//!   deterministic test doubles

pub mod clock;
pub mod error;
pub mod event;
pub mod remote;
pub mod schedule;
pub mod store;
pub mod task;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BatchError, DecisionError, Error, RemoteError, Result, StoreError, TaskError};
pub use event::{DomainEvent, EventBus};
pub use remote::{RemoteExecutor, UnavailableRemote};
pub use schedule::{JobFn, JobHandle, Scheduler, job};
pub use store::{
    KeyValueStore, LoadReport, PersistReport, get_with_timeout, load_entries, set_with_timeout,
};
pub use task::{
    ExecutionRoute, QueueProbe, Task, TaskPriority, TaskProcessor, TaskSpec, TaskStatus,
};
