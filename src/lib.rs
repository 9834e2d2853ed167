//! # bunker-orchestrator
//!
//! A multi-agent orchestration engine for a maritime bunker-planning
//! assistant: classify a natural-language query, generate a validated
//! execution plan from a declarative workflow template, run the plan's
//! agent DAG with parallel fan-out and checkpointed state, and synthesize
//! the result into a structured, client-facing response.
//!
//! ## Design principles
//!
//! - **Declarative agents and tools**: the Tool Registry and Agent Registry
//!   hold data records, not trait-object handlers wired by hand — an agent's
//!   `produces`/`consumes` and a tool's `reliability`/`cost` drive planning
//!   and validation rather than being encoded in control flow.
//! - **Plan, then execute**: the Plan Generator turns a classified query plus
//!   a matched [`Workflow`] template into an immutable [`ExecutionPlan`]; the
//!   [`PlanExecutor`] only ever runs a plan already built and validated, and
//!   never calls an LLM itself.
//! - **State-in, state-out**: one shared schema-versioned [`State`] flows
//!   through every stage; each agent returns only the fields it declares it
//!   owns, merged back at a stage or parallel-group boundary.
//! - **Checkpoint as contract, not storage detail**: [`Checkpointer`] wraps
//!   a pluggable [`CheckpointBackend`] (in-memory or SQLite) behind
//!   delta/compression bookkeeping so a partial failure never loses more
//!   than one stage's worth of state.
//! - **Graceful degradation everywhere an LLM could fail**: plan
//!   classification falls back to regex heuristics, synthesis reasoning
//!   falls back to a deterministic template, checkpoint writes log and
//!   continue rather than aborting a plan.
//!
//! ## Main modules
//!
//! - [`registry`]: [`ToolRegistry`], [`AgentRegistry`], [`WorkflowRegistry`] —
//!   process-wide, thread-safe catalogs populated at startup.
//! - [`state`]: [`State`], `StatePatch`, [`StateSchema`] — the schema-versioned
//!   field bag that flows through a plan.
//! - [`store`]: [`ReferenceStore`], [`InMemoryReferenceStore`] — content-addressed
//!   storage for oversized referenceable fields.
//! - [`compress`]: [`Compressor`], [`StateDelta`] — replace oversized fields with
//!   references; diff/apply deltas between checkpoints.
//! - [`checkpoint`]: [`Checkpointer`], [`CheckpointBackend`], [`MemorySaver`],
//!   [`SqliteSaver`] — durable plan-run state snapshots.
//! - [`plan`]: [`PlanGenerator`], [`PlanValidator`], [`LlmClient`] — classify a
//!   query, bind it to a workflow template, validate the result.
//! - [`executor`]: [`PlanExecutor`] — run an [`ExecutionPlan`]'s stages against a
//!   [`State`], honoring parallel groups, retries, and safety validators.
//! - [`synthesis`]: [`SynthesisEngine`] — turn a finished run into a
//!   [`SynthesisResponse`].
//! - [`metrics`]: per-tool/per-agent counters and a compression-effectiveness
//!   report.
//! - [`visualization`]: `generate_dot`/`generate_text`/`explain_plan` for an
//!   [`ExecutionPlan`], for debugging only.
//! - [`config`]: [`OrchestratorConfig`] assembled from the environment.
//! - [`error`]: one `thiserror` enum per fallible boundary.
//!
//! Key types are re-exported at crate root:
//! `use bunker_orchestrator::{PlanGenerator, PlanExecutor, SynthesisEngine};`

pub mod checkpoint;
pub mod compress;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod plan;
pub mod registry;
pub mod state;
pub mod store;
pub mod synthesis;
pub mod visualization;

pub use checkpoint::{
    select_backend, Checkpoint, CheckpointBackend, CheckpointListItem, CheckpointMetadata,
    CheckpointMetrics, CheckpointSource, CheckpointTuple, Checkpointer, MemorySaver,
    RunnableConfig, SqliteSaver,
};
pub use compress::{CompressionConfig, CompressionStats, Compressor, DecompressionReport, StateDelta};
pub use config::OrchestratorConfig;
pub use error::{
    CheckpointError, CompressionError, ExecutorError, PlanError, RegistryError, StateError,
    SynthesisError,
};
pub use executor::circuit_breaker::CircuitBreaker;
pub use executor::cost::{CostAccounting, CostDiff, PricingTable};
pub use executor::safety::{SafeNext, SafetyValidator};
pub use executor::types::{
    CancellationToken, ExecutionContext, PlanExecutionResult, StageExecutionResult, StageStatus, ToolCallRecord,
};
pub use executor::PlanExecutor;
pub use metrics::{
    collect_report, record_latency, CompressionEffectivenessReport, CompressionEffectivenessTracker,
    IdMetrics, MetricsReport,
};
pub use plan::{
    ClassificationRequest, ClassificationResponse, Classification, ExecutionPlan, GenerationOptions,
    LlmClient, LlmError, MockClassifier, PlanGenerator, PlanStage, PlanValidator, ValidationOutcome,
};
pub use registry::{
    AgentDefinition, AgentHandler, AgentRegistry, AgentType, RateLimit, RateLimiter, ToolDefinition, ToolRegistry,
    Workflow, WorkflowRegistry,
};
pub use state::{State, StatePatch};
pub use store::{InMemoryReferenceStore, ReferenceStore};
pub use synthesis::{
    Alert, AlertSeverity, CoreData, Insight, NextStep, Priority, Recommendation, SynthesisEngine,
    SynthesisMetrics, SynthesisResponse, Warning, WarningCategory,
};
pub use visualization::{explain_plan, generate_dot, generate_text};

/// When running `cargo test`, initializes tracing from `RUST_LOG` so unit
/// tests across `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
