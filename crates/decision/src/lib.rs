//! Decision engine for Steward.
//!
//! Maps `(category, action, context)` to a result. Each call goes through
//! three layers:
//!
//! ```text
//! ┌──────────────┐   hit   ┌──────────────┐
//! │ Pattern table│────────▶│   Decision   │  method = "pattern"
//! └──────┬───────┘         └──────────────┘
//!        │ miss                    ▲
//!        ▼                         │
//! ┌──────────────┐   ok            │           method = "rule"
//! │ Rule function│─────────────────┤
//! └──────┬───────┘                 │
//!        │ unknown / failed        │
//!        ▼                         │
//! ┌──────────────┐                 │
//! │ Safe default │─────────────────┘           method = "default"
//! └──────────────┘
//! ```
//!
//! Rule results are remembered as patterns keyed by a projection of the
//! enriched context, so similar requests skip rule evaluation and gain
//! confidence each time they are reused.

mod engine;
mod model;
mod pattern;
mod registry;
pub mod rules;

pub use engine::{DecisionEngine, KEY_HISTORY, KEY_PATTERNS};
pub use model::{Decision, DecisionMethod, DecisionPattern, DecisionRecord, DecisionStats};
pub use pattern::{Signature, overlap_ratio, project_signature};
pub use registry::{DecisionRegistry, RuleFn};
