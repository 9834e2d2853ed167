//! Synthesis Engine: turns a final `State` plus `PlanExecutionResult` into
//! the structured response a client sees (spec.md §4.11).

pub mod engine;
pub mod types;

pub use engine::SynthesisEngine;
pub use types::{
    Alert, AlertSeverity, CoreData, Insight, NextStep, Priority, Recommendation, SynthesisMetrics, SynthesisResponse,
    Warning, WarningCategory,
};
