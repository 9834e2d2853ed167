//! Error taxonomy, grouped by the component that raises each variant.
//!
//! One `thiserror` enum per fallible boundary (registry, state, checkpoint,
//! plan, executor, synthesis) rather than a single flat error type, the way
//! the teacher splits `CheckpointError` from `AgentError`. Every wire-visible
//! variant named in the specification's error taxonomy appears below.

use thiserror::Error;

/// Errors raised by the Tool Registry, Agent Registry, and Workflow Registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors raised by the State Schema, Validator, and Migrator.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("schema validation failed: {0:?}")]
    SchemaValidationFailed(Vec<String>),
    #[error("migration failed: {0}")]
    MigrationFailed(String),
}

/// Errors raised by the Reference Store and State Compressor/Delta.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("compression failed: {0}")]
    CompressionFailed(String),
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Errors raised by the Checkpointer.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("thread_id required")]
    ThreadIdRequired,
    #[error("checkpoint put failed: {0}")]
    CheckpointPutFailed(String),
    #[error("checkpoint read failed: {0}")]
    CheckpointReadFailed(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors raised by the Plan Generator and Plan Validator.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan invalid: {0:?}")]
    PlanInvalid(Vec<String>),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors raised by the Plan Executor during a single stage or plan run.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("stage {0} timed out")]
    StageTimeout(String),
    #[error("stage {0} failed: {1}")]
    StageFailed(String, String),
    #[error("rate limited: tool {0}")]
    RateLimited(String),
    #[error("cancelled: stage {0}")]
    Cancelled(String),
    #[error("tool failed: {0}: {1}")]
    ToolFailed(String, String),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Errors raised by the Synthesis Engine.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesis failed: {0}")]
    Failed(String),
}
