//! Layered context for Steward.
//!
//! Four sub-stores feed decision enrichment and task bookkeeping:
//! conversation turns (scored by importance and compressed when long),
//! project facts, code files, and task progress.

pub mod model;
pub mod store;

pub use model::{
    CodeContextEntry, CompactionReport, ContextStats, ConversationTurn, ProjectContextEntry,
    RelevanceLimits, RelevantContext, TaskContextEntry, query_terms, slugify,
};
pub use store::ContextStore;
