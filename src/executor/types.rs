//! Plan Executor data model: stage state machine, per-stage results, and the
//! final Plan Execution Result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::executor::cost::CostAccounting;
use crate::state::State;

/// `pending -> (skipped | running) -> (success | failed | timeout)`. No
/// backward transitions; terminal states are recorded immutably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Skipped,
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_id: String,
    pub success: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecutionResult {
    pub stage_id: String,
    pub agent_id: String,
    pub status: StageStatus,
    pub started_at: SystemTime,
    pub completed_at: SystemTime,
    pub duration: Duration,
    pub produced_fields: Vec<String>,
    pub error: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Shared, cloneable cancel signal for a plan run. Every clone observes the
/// same flag, so handing one to a caller and another to in-flight stage
/// tasks lets either side trip it.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Idempotent: cancelling an already-cancelled token is a no-op.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-plan execution context: timeout, a cooperative cancel signal the
/// executor checks at every stage boundary and agents are expected to honor
/// at their next suspension point, and the wall-clock start used to compute
/// the remaining budget for rate-limit queueing and per-stage timeouts.
#[derive(Clone)]
pub struct ExecutionContext {
    pub timeout: Duration,
    pub correlation_id: String,
    started: Instant,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(timeout: Duration, correlation_id: impl Into<String>) -> Self {
        Self::with_cancellation(timeout, correlation_id, CancellationToken::new())
    }

    pub fn with_cancellation(timeout: Duration, correlation_id: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            timeout,
            correlation_id: correlation_id.into(),
            started: Instant::now(),
            cancellation,
        }
    }

    /// Idempotent: cancelling an already-cancelled context is a no-op.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// A clone of the shared cancel signal, for callers that want to trip
    /// it from outside the stage loop (or hand it to spawned tasks).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Time left before `timeout` is reached, measured from when this
    /// context (or the one it was cloned from) was created.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started.elapsed())
    }
}

/// The final result of `execute_plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExecutionResult {
    pub plan_id: String,
    pub success: bool,
    pub stages_completed: Vec<String>,
    pub stages_skipped: Vec<String>,
    pub stages_failed: Vec<String>,
    pub stage_results: Vec<StageExecutionResult>,
    pub final_state: State,
    pub costs: CostAccounting,
    pub errors: Vec<String>,
    pub duration: Duration,
}
