//! Caching and call coalescing for Steward.
//!
//! - [`TieredCache`]: key/category cache with per-category TTL and hit/miss
//!   accounting.
//! - [`RequestBatcher`]: groups delay-tolerant operations by type and
//!   dispatches them together on a flush tick.

pub mod batcher;
pub mod tiered;

pub use batcher::{
    BatchHandler, BatcherStats, FlushReport, ItemHandler, RequestBatcher, structurally_similar,
};
pub use tiered::{CacheEntry, CacheStats, TieredCache};
