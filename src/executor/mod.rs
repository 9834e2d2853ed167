//! Plan Executor — the hard part. Topological execution with parallel
//! groups, skip/continue predicates, retry, circuit breaking, and cost
//! accounting, with the hard guarantee of no LLM calls at execution time.
//!
//! Grounded on `loom::graph::compiled::CompiledStateGraph::invoke`'s
//! per-node loop (precondition -> run -> merge -> checkpoint), generalized
//! from strictly-linear execution to topological scheduling with
//! `parallel_group` fan-out via `tokio::task::JoinSet` — a concurrency model
//! no teacher file needs, since `loom`'s graphs never run nodes
//! concurrently.

pub mod circuit_breaker;
pub mod cost;
pub mod retry;
pub mod safety;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;

use crate::checkpoint::{CheckpointMetadata, Checkpointer, RunnableConfig};
use crate::config::OrchestratorConfig;
use crate::error::ExecutorError;
use crate::executor::circuit_breaker::CircuitBreaker;
use crate::executor::cost::{compute_actual_cost, diff_against_estimates, CostAccounting, PricingTable};
use crate::executor::retry::with_retry;
use crate::executor::safety::{default_safety_validators, get_safe_next_agent, SafeNext, SafetyValidator};
use crate::executor::types::{
    CancellationToken, ExecutionContext, PlanExecutionResult, StageExecutionResult, StageStatus, ToolCallRecord,
};
use crate::plan::types::{ExecutionPlan, PlanStage};
use crate::registry::agent::AgentRegistry;
use crate::registry::tool::{RateLimiter, ToolRegistry};
use crate::state::{State, StatePatch};

const RESERVED_TOOL_CALLS_FIELD: &str = "_tool_calls";
const RATE_LIMIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct PlanExecutor {
    agent_registry: Arc<AgentRegistry>,
    tool_registry: Arc<ToolRegistry>,
    rate_limiter: Arc<RateLimiter>,
    checkpointer: Option<Arc<Checkpointer>>,
    safety_validators: Vec<SafetyValidator>,
    circuit_breaker: CircuitBreaker,
    pricing: PricingTable,
    config: OrchestratorConfig,
}

impl PlanExecutor {
    pub fn new(
        agent_registry: Arc<AgentRegistry>,
        tool_registry: Arc<ToolRegistry>,
        checkpointer: Option<Arc<Checkpointer>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            agent_registry,
            tool_registry,
            rate_limiter: Arc::new(RateLimiter::new()),
            checkpointer,
            safety_validators: default_safety_validators(),
            circuit_breaker: CircuitBreaker::new(),
            pricing: PricingTable::default(),
            config,
        }
    }

    pub fn with_safety_validators(mut self, validators: Vec<SafetyValidator>) -> Self {
        self.safety_validators = validators;
        self
    }

    /// Runs `plan` to completion or until cancelled. Equivalent to
    /// `execute_plan_cancellable` with a token nothing outside this call
    /// can reach.
    pub async fn execute_plan(&self, plan: &ExecutionPlan, initial_state: State) -> PlanExecutionResult {
        self.execute_plan_cancellable(plan, initial_state, CancellationToken::new()).await
    }

    /// Like `execute_plan`, but `cancellation` is shared with the caller:
    /// cancelling it from another task stops the plan at the next stage
    /// boundary and, for a parallel group already in flight, at each
    /// member's next retry/rate-limit checkpoint.
    pub async fn execute_plan_cancellable(
        &self,
        plan: &ExecutionPlan,
        initial_state: State,
        cancellation: CancellationToken,
    ) -> PlanExecutionResult {
        let started = Instant::now();
        let context = ExecutionContext::with_cancellation(plan.context.timeout, plan.context.correlation_id.clone(), cancellation);

        let state = Arc::new(AsyncMutex::new(initial_state));
        let mut stage_results = Vec::new();
        let mut stages_completed = Vec::new();
        let mut stages_skipped = Vec::new();
        let mut stages_failed = Vec::new();
        let mut errors = Vec::new();
        let mut success = true;
        let mut all_tool_calls: Vec<ToolCallRecord> = Vec::new();
        let mut llm_calls_actual = 0usize;
        let mut stopped_for_clarification = false;

        let mut processed: HashSet<String> = HashSet::new();
        let mut ordered: Vec<&PlanStage> = plan.stages.iter().collect();
        ordered.sort_by_key(|s| s.order);

        let mut i = 0;
        while i < ordered.len() {
            let stage = ordered[i];
            if processed.contains(&stage.stage_id) {
                i += 1;
                continue;
            }

            if stopped_for_clarification {
                break;
            }

            if context.is_cancelled() {
                errors.push(ExecutorError::Cancelled(stage.stage_id.clone()).to_string());
                stages_failed.push(stage.stage_id.clone());
                stage_results.push(StageExecutionResult {
                    stage_id: stage.stage_id.clone(),
                    agent_id: stage.agent_id.clone(),
                    status: StageStatus::Cancelled,
                    started_at: SystemTime::now(),
                    completed_at: SystemTime::now(),
                    duration: Duration::ZERO,
                    produced_fields: vec![],
                    error: Some("plan cancelled before this stage could start".to_string()),
                    tool_calls: vec![],
                });
                success = false;
                break;
            }

            let group_members: Vec<&PlanStage> = match stage.parallel_group {
                Some(group_id) => ordered.iter().filter(|s| s.parallel_group == Some(group_id)).copied().collect(),
                None => vec![stage],
            };

            if group_members.len() > 1 {
                let snapshot = state.lock().await.clone();
                let mut join_set = JoinSet::new();
                for member in &group_members {
                    let member_owned = (*member).clone();
                    let snapshot_clone = snapshot.clone();
                    let agent_registry = self.agent_registry.clone();
                    let tool_registry = self.tool_registry.clone();
                    let rate_limiter = self.rate_limiter.clone();
                    let context_clone = context.clone();
                    join_set.spawn(async move {
                        run_stage(&agent_registry, &tool_registry, &rate_limiter, &member_owned, &snapshot_clone, &context_clone).await
                    });
                }

                let mut group_outcomes = Vec::new();
                while let Some(joined) = join_set.join_next().await {
                    match joined {
                        Ok(outcome) => group_outcomes.push(outcome),
                        Err(e) => errors.push(format!("stage task panicked: {e}")),
                    }
                }

                let mut shared = state.lock().await;
                let mut merged_fields: std::collections::HashMap<String, serde_json::Value> = std::collections::HashMap::new();
                for outcome in group_outcomes {
                    let StageRunOutcome {
                        stage_id,
                        agent_id,
                        status,
                        started_at,
                        completed_at,
                        patch,
                        error,
                        tool_calls,
                        uses_llm,
                    } = outcome;

                    let duration = completed_at.duration_since(started_at).unwrap_or_default();
                    let mut produced_fields = Vec::new();

                    if let Some(patch) = patch {
                        for (field, value) in patch {
                            produced_fields.push(field.clone());
                            match merged_fields.get(&field) {
                                Some(existing) if existing != &value => {
                                    let required = group_members.iter().find(|s| s.stage_id == stage_id).map(|s| s.required).unwrap_or(true);
                                    errors.push(format!("{stage_id}: conflicting concurrent write to field {field}"));
                                    if required {
                                        success = false;
                                    }
                                }
                                _ => {
                                    merged_fields.insert(field, value);
                                }
                            }
                        }
                    }

                    if status == StageStatus::Success {
                        stages_completed.push(stage_id.clone());
                        self.circuit_breaker.record_success(&agent_id);
                    } else if status == StageStatus::Failed {
                        stages_failed.push(stage_id.clone());
                        let required = group_members.iter().find(|s| s.stage_id == stage_id).map(|s| s.required).unwrap_or(true);
                        let trip_count = self.circuit_breaker.record_failure(&agent_id);
                        if self.circuit_breaker.is_tripped(&agent_id) {
                            tracing::warn!(agent_id = %agent_id, trip_count, "circuit breaker tripped, no further retries for this agent");
                        }
                        if let Some(err) = &error {
                            errors.push(format!("{stage_id}: {err}"));
                        }
                        if required && !self.config.continue_on_error {
                            success = false;
                        } else if required {
                            success = false;
                        }
                    } else if status == StageStatus::Skipped {
                        stages_skipped.push(stage_id.clone());
                    } else if status == StageStatus::Cancelled {
                        stages_failed.push(stage_id.clone());
                        let required = group_members.iter().find(|s| s.stage_id == stage_id).map(|s| s.required).unwrap_or(true);
                        if let Some(err) = &error {
                            errors.push(format!("{stage_id}: {err}"));
                        }
                        if required {
                            success = false;
                        }
                    }

                    if uses_llm && status == StageStatus::Success {
                        llm_calls_actual += 1;
                    }
                    all_tool_calls.extend(tool_calls.clone());

                    stage_results.push(StageExecutionResult {
                        stage_id,
                        agent_id,
                        status,
                        started_at,
                        completed_at,
                        duration,
                        produced_fields,
                        error,
                        tool_calls,
                    });
                }
                for (field, value) in merged_fields {
                    shared.insert(field, value);
                }
                if shared.needs_clarification() {
                    stopped_for_clarification = true;
                }
                drop(shared);

                if let Some(checkpointer) = &self.checkpointer {
                    self.checkpoint_state(checkpointer, plan, &state).await;
                }

                for member in &group_members {
                    processed.insert(member.stage_id.clone());
                }
            } else {
                let mut shared = state.lock().await;

                let safe_next = {
                    shared.set_next_agent(stage.agent_id.clone());
                    get_safe_next_agent(&self.safety_validators, &shared)
                };

                let outcome = match safe_next {
                    SafeNext::Abort => StageRunOutcome {
                        stage_id: stage.stage_id.clone(),
                        agent_id: stage.agent_id.clone(),
                        status: StageStatus::Failed,
                        started_at: SystemTime::now(),
                        completed_at: SystemTime::now(),
                        patch: None,
                        error: Some("safety validator hard violation".to_string()),
                        tool_calls: vec![],
                        uses_llm: false,
                    },
                    SafeNext::Reroute(required_agent) if !already_produced(&stage_results, &required_agent) => {
                        tracing::warn!(stage_id = %stage.stage_id, required_agent = %required_agent, "safety validator requested soft recovery; skipping stage");
                        StageRunOutcome {
                            stage_id: stage.stage_id.clone(),
                            agent_id: stage.agent_id.clone(),
                            status: StageStatus::Skipped,
                            started_at: SystemTime::now(),
                            completed_at: SystemTime::now(),
                            patch: None,
                            error: None,
                            tool_calls: vec![],
                            uses_llm: false,
                        }
                    }
                    _ => run_stage(&self.agent_registry, &self.tool_registry, &self.rate_limiter, stage, &shared, &context).await,
                };

                let duration = outcome.completed_at.duration_since(outcome.started_at).unwrap_or_default();
                let mut produced_fields = Vec::new();

                match outcome.status {
                    StageStatus::Success => {
                        if let Some(patch) = &outcome.patch {
                            for field in patch.keys() {
                                produced_fields.push(field.clone());
                            }
                        }
                        if let Some(patch) = outcome.patch.clone() {
                            shared.merge_patch(patch);
                        }
                        stages_completed.push(outcome.stage_id.clone());
                        self.circuit_breaker.record_success(&outcome.agent_id);
                        if outcome.uses_llm {
                            llm_calls_actual += 1;
                        }
                    }
                    StageStatus::Failed => {
                        stages_failed.push(outcome.stage_id.clone());
                        self.circuit_breaker.record_failure(&outcome.agent_id);
                        if let Some(err) = &outcome.error {
                            errors.push(format!("{}: {err}", outcome.stage_id));
                        }
                        if stage.required {
                            success = false;
                            if !self.config.continue_on_error {
                                all_tool_calls.extend(outcome.tool_calls.clone());
                                stage_results.push(StageExecutionResult {
                                    stage_id: outcome.stage_id.clone(),
                                    agent_id: outcome.agent_id.clone(),
                                    status: outcome.status,
                                    started_at: outcome.started_at,
                                    completed_at: outcome.completed_at,
                                    duration,
                                    produced_fields,
                                    error: outcome.error.clone(),
                                    tool_calls: outcome.tool_calls.clone(),
                                });
                                drop(shared);
                                break;
                            }
                        }
                    }
                    StageStatus::Skipped => stages_skipped.push(outcome.stage_id.clone()),
                    StageStatus::Timeout => {
                        stages_failed.push(outcome.stage_id.clone());
                        errors.push(format!("{}: stage timed out", outcome.stage_id));
                        if stage.required {
                            success = false;
                        }
                    }
                    StageStatus::Cancelled => {
                        stages_failed.push(outcome.stage_id.clone());
                        if let Some(err) = &outcome.error {
                            errors.push(format!("{}: {err}", outcome.stage_id));
                        }
                        if stage.required {
                            success = false;
                        }
                    }
                    _ => {}
                }

                if shared.needs_clarification() {
                    stopped_for_clarification = true;
                }

                all_tool_calls.extend(outcome.tool_calls.clone());
                stage_results.push(StageExecutionResult {
                    stage_id: outcome.stage_id,
                    agent_id: outcome.agent_id,
                    status: outcome.status,
                    started_at: outcome.started_at,
                    completed_at: outcome.completed_at,
                    duration,
                    produced_fields,
                    error: outcome.error,
                    tool_calls: outcome.tool_calls,
                });

                drop(shared);

                if let Some(checkpointer) = &self.checkpointer {
                    self.checkpoint_state(checkpointer, plan, &state).await;
                }

                processed.insert(stage.stage_id.clone());
            }

            i += 1;
        }

        let final_state = state.lock().await.clone();
        let actual_duration = started.elapsed();
        let api_calls_actual = all_tool_calls.len();
        let actual_cost_usd = compute_actual_cost(&self.pricing, &all_tool_calls, llm_calls_actual);
        let vs_estimates = diff_against_estimates(&plan.estimates, actual_cost_usd, actual_duration, llm_calls_actual, api_calls_actual);

        PlanExecutionResult {
            plan_id: plan.plan_id.clone(),
            success,
            stages_completed,
            stages_skipped,
            stages_failed,
            stage_results,
            final_state,
            costs: CostAccounting {
                llm_calls: llm_calls_actual,
                api_calls: api_calls_actual,
                actual_cost_usd,
                vs_estimates,
            },
            errors,
            duration: actual_duration,
        }
    }

    async fn checkpoint_state(&self, checkpointer: &Arc<Checkpointer>, plan: &ExecutionPlan, state: &Arc<AsyncMutex<State>>) {
        let snapshot = state.lock().await.clone();
        let config = RunnableConfig::for_thread(plan.context.correlation_id.clone());
        if let Err(e) = checkpointer.put(&config, snapshot, None, CheckpointMetadata::default()).await {
            tracing::error!(error = %e, "checkpoint write failed; stage output remains available in memory only");
        }
    }
}

fn already_produced(results: &[StageExecutionResult], agent_id: &str) -> bool {
    results.iter().any(|r| r.agent_id == agent_id && r.status == StageStatus::Success)
}

struct StageRunOutcome {
    stage_id: String,
    agent_id: String,
    status: StageStatus,
    started_at: SystemTime,
    completed_at: SystemTime,
    patch: Option<StatePatch>,
    error: Option<String>,
    tool_calls: Vec<ToolCallRecord>,
    uses_llm: bool,
}

/// Per-stage protocol: cancellation -> precondition -> rate limit ->
/// timeout -> retry -> tool-call extraction. Merge and checkpoint happen at
/// the call site, since they touch shared state across possibly-concurrent
/// stages.
async fn run_stage(
    agent_registry: &Arc<AgentRegistry>,
    tool_registry: &Arc<ToolRegistry>,
    rate_limiter: &Arc<RateLimiter>,
    stage: &PlanStage,
    state: &State,
    context: &ExecutionContext,
) -> StageRunOutcome {
    let started_at = SystemTime::now();

    if context.is_cancelled() {
        return cancelled_outcome(stage, started_at);
    }

    if let Some(skip_when) = &stage.skip_when {
        if skip_when.matches(state) {
            return StageRunOutcome {
                stage_id: stage.stage_id.clone(),
                agent_id: stage.agent_id.clone(),
                status: StageStatus::Skipped,
                started_at,
                completed_at: SystemTime::now(),
                patch: None,
                error: None,
                tool_calls: vec![],
                uses_llm: false,
            };
        }
    }
    if let Some(continue_when) = &stage.continue_when {
        if !continue_when.matches(state) {
            return StageRunOutcome {
                stage_id: stage.stage_id.clone(),
                agent_id: stage.agent_id.clone(),
                status: StageStatus::Skipped,
                started_at,
                completed_at: SystemTime::now(),
                patch: None,
                error: None,
                tool_calls: vec![],
                uses_llm: false,
            };
        }
    }

    let Some(agent) = agent_registry.get(&stage.agent_id) else {
        return StageRunOutcome {
            stage_id: stage.stage_id.clone(),
            agent_id: stage.agent_id.clone(),
            status: StageStatus::Failed,
            started_at,
            completed_at: SystemTime::now(),
            patch: None,
            error: Some(format!("agent {} not found in registry", stage.agent_id)),
            tool_calls: vec![],
            uses_llm: false,
        };
    };

    for tool_id in &stage.tools_needed {
        if let Some(outcome) = acquire_rate_limit(tool_registry, rate_limiter, tool_id, stage, context, started_at).await {
            return outcome;
        }
    }

    let stage_timeout = agent.execution_hints.max_execution_time.min(context.remaining().max(Duration::from_millis(1)));

    let policy = agent.execution_hints.retry_policy.clone();
    let handler = agent.implementation_handle.clone();
    let state_for_attempts = state.clone();
    let declared_produces = agent.produces.clone();
    let context_for_attempts = context.clone();
    let stage_id_for_attempts = stage.stage_id.clone();

    let retry_future = with_retry(&policy, move |_attempt| {
        let handler = handler.clone();
        let state = state_for_attempts.clone();
        let context = context_for_attempts.clone();
        let stage_id = stage_id_for_attempts.clone();
        Box::pin(async move {
            if context.is_cancelled() {
                return Err(ExecutorError::Cancelled(stage_id));
            }
            handler.run(&state).await
        })
    });

    let (status, patch, error) = match tokio::time::timeout(stage_timeout, retry_future).await {
        Ok(outcome) => match outcome.result {
            Ok(mut patch) => {
                for field in patch.keys() {
                    if !declared_produces.iter().any(|p| p == field) && field != RESERVED_TOOL_CALLS_FIELD {
                        tracing::warn!(stage_id = %stage.stage_id, field = %field, "agent wrote undeclared field");
                    }
                }
                let tool_calls = extract_tool_calls(&mut patch);
                return StageRunOutcome {
                    stage_id: stage.stage_id.clone(),
                    agent_id: stage.agent_id.clone(),
                    status: StageStatus::Success,
                    started_at,
                    completed_at: SystemTime::now(),
                    patch: Some(patch),
                    error: None,
                    tool_calls,
                    uses_llm: agent.uses_llm,
                };
            }
            Err(e @ ExecutorError::Cancelled(_)) => (StageStatus::Cancelled, None, Some(e.to_string())),
            Err(e) => (StageStatus::Failed, None, Some(e.to_string())),
        },
        Err(_) => (StageStatus::Timeout, None, Some("stage execution timed out".to_string())),
    };

    StageRunOutcome {
        stage_id: stage.stage_id.clone(),
        agent_id: stage.agent_id.clone(),
        status,
        started_at,
        completed_at: SystemTime::now(),
        patch,
        error,
        tool_calls: vec![],
        uses_llm: agent.uses_llm,
    }
}

fn cancelled_outcome(stage: &PlanStage, started_at: SystemTime) -> StageRunOutcome {
    StageRunOutcome {
        stage_id: stage.stage_id.clone(),
        agent_id: stage.agent_id.clone(),
        status: StageStatus::Cancelled,
        started_at,
        completed_at: SystemTime::now(),
        patch: None,
        error: Some(ExecutorError::Cancelled(stage.stage_id.clone()).to_string()),
        tool_calls: vec![],
        uses_llm: false,
    }
}

/// Polls `rate_limiter` for `tool_id` until a slot frees up, the context is
/// cancelled, or the context's remaining budget runs out — at which point
/// the stage fails with `ExecutorError::RateLimited`. A tool with no
/// declared `rate_limit` is always allowed through immediately.
async fn acquire_rate_limit(
    tool_registry: &Arc<ToolRegistry>,
    rate_limiter: &Arc<RateLimiter>,
    tool_id: &str,
    stage: &PlanStage,
    context: &ExecutionContext,
    started_at: SystemTime,
) -> Option<StageRunOutcome> {
    let limit = tool_registry.get(tool_id).and_then(|t| t.rate_limit)?;

    loop {
        if rate_limiter.try_acquire(tool_id, &limit) {
            return None;
        }
        if context.is_cancelled() {
            return Some(cancelled_outcome(stage, started_at));
        }
        let remaining = context.remaining();
        if remaining.is_zero() {
            return Some(StageRunOutcome {
                stage_id: stage.stage_id.clone(),
                agent_id: stage.agent_id.clone(),
                status: StageStatus::Failed,
                started_at,
                completed_at: SystemTime::now(),
                patch: None,
                error: Some(ExecutorError::RateLimited(tool_id.to_string()).to_string()),
                tool_calls: vec![],
                uses_llm: false,
            });
        }
        tokio::time::sleep(RATE_LIMIT_POLL_INTERVAL.min(remaining)).await;
    }
}

/// Pulls the reserved `_tool_calls` convention key out of a patch before
/// merging — the agent's way of reporting which tools it invoked without
/// the executor needing a second trait method, since the executor itself
/// never calls tools directly.
fn extract_tool_calls(patch: &mut StatePatch) -> Vec<ToolCallRecord> {
    let Some(value) = patch.remove(RESERVED_TOOL_CALLS_FIELD) else {
        return vec![];
    };
    serde_json::from_value::<Vec<ToolCallRecordJson>>(value)
        .unwrap_or_default()
        .into_iter()
        .map(|t| ToolCallRecord {
            tool_id: t.tool_id,
            success: t.success,
            duration: Duration::from_millis(t.duration_ms),
        })
        .collect()
}

#[derive(serde::Deserialize)]
struct ToolCallRecordJson {
    tool_id: String,
    success: bool,
    duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::agent::{AgentDefinition, AgentHandler, AgentType, Consumes, DependencyHints, ExecutionHints, ToolBindings};
    use crate::registry::workflow::Predicate;
    use crate::plan::types::{Classification, Estimates, PlanContext};
    use crate::plan::llm::ExtractedEntities;
    use async_trait::async_trait;

    struct FixedPatchAgent {
        field: &'static str,
        value: serde_json::Value,
    }

    #[async_trait]
    impl AgentHandler for FixedPatchAgent {
        async fn run(&self, _state: &State) -> Result<StatePatch, ExecutorError> {
            let mut patch = StatePatch::new();
            patch.insert(self.field.to_string(), self.value.clone());
            Ok(patch)
        }
    }

    struct AlwaysFailAgent;

    #[async_trait]
    impl AgentHandler for AlwaysFailAgent {
        async fn run(&self, _state: &State) -> Result<StatePatch, ExecutorError> {
            Err(ExecutorError::StageFailed("x".into(), "always fails".into()))
        }
    }

    fn agent_def(id: &str, produces: Vec<&str>, handler: Arc<dyn AgentHandler>) -> AgentDefinition {
        AgentDefinition {
            id: id.into(),
            name: id.into(),
            agent_type: AgentType::Specialist,
            domain_tags: vec![],
            capability_tags: vec![],
            intent_tags: vec![],
            produces: produces.into_iter().map(String::from).collect(),
            consumes: Consumes::default(),
            tools: ToolBindings::default(),
            dependency_hints: DependencyHints::default(),
            execution_hints: ExecutionHints {
                can_run_in_parallel: false,
                max_execution_time: Duration::from_secs(2),
                retry_policy: crate::registry::agent::AgentRetryPolicy::none(),
            },
            uses_llm: false,
            priority: 0,
            enabled: true,
            implementation_handle: handler,
        }
    }

    fn stage(id: &str, agent_id: &str, required: bool) -> PlanStage {
        PlanStage {
            stage_id: id.into(),
            agent_id: agent_id.into(),
            required,
            parallel_group: None,
            skip_when: None,
            continue_when: None,
            depends_on: vec![],
            provides: vec![],
            requires: vec![],
            tools_needed: vec![],
            est_cost_usd: 0.0,
            est_duration: Duration::from_millis(10),
            order: 0,
        }
    }

    fn plan_with(stages: Vec<PlanStage>) -> ExecutionPlan {
        ExecutionPlan {
            plan_id: "p1".into(),
            query_type: "route_only".into(),
            workflow_id: "route_only".into(),
            workflow_version: "1.0.0".into(),
            classification: Classification {
                query_type: "route_only".into(),
                confidence: 0.9,
                reasoning: String::new(),
                secondary_intents: vec![],
                extracted_entities: ExtractedEntities::default(),
                proposed_workflow_id: None,
            },
            stages,
            validation: Default::default(),
            estimates: Estimates::default(),
            required_state: vec![],
            expected_outputs: vec![],
            context: PlanContext {
                timeout: Duration::from_secs(5),
                priority: 0,
                correlation_id: "corr-1".into(),
            },
            parallel_groups: vec![],
        }
    }

    #[tokio::test]
    async fn execute_plan_runs_deterministically_with_mock_agents() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(agent_def(
                "route_agent",
                vec!["route_data"],
                Arc::new(FixedPatchAgent {
                    field: "route_data",
                    value: serde_json::json!({"distance_nm": 8288}),
                }),
            ))
            .unwrap();

        let executor = PlanExecutor::new(registry, Arc::new(ToolRegistry::new()), None, OrchestratorConfig::default());
        let plan = plan_with(vec![stage("route", "route_agent", true)]);

        let result = executor.execute_plan(&plan, State::new()).await;
        assert!(result.success);
        assert_eq!(result.stages_completed, vec!["route".to_string()]);
        assert_eq!(result.costs.llm_calls, 0);
        assert_eq!(result.final_state.get("route_data").unwrap()["distance_nm"], 8288);
    }

    #[tokio::test]
    async fn required_stage_failure_aborts_plan() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(agent_def("route_agent", vec!["route_data"], Arc::new(AlwaysFailAgent))).unwrap();
        registry
            .register(agent_def(
                "finalize_agent",
                vec!["final_response"],
                Arc::new(FixedPatchAgent {
                    field: "final_response",
                    value: serde_json::json!("done"),
                }),
            ))
            .unwrap();

        let executor = PlanExecutor::new(registry, Arc::new(ToolRegistry::new()), None, OrchestratorConfig::default());
        let plan = plan_with(vec![stage("route", "route_agent", true), stage("finalize", "finalize_agent", true)]);

        let result = executor.execute_plan(&plan, State::new()).await;
        assert!(!result.success);
        assert!(!result.stages_completed.contains(&"finalize".to_string()));
    }

    #[tokio::test]
    async fn optional_stage_failure_does_not_block_later_stages() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(agent_def("vessel_info_agent", vec!["vessel_list"], Arc::new(AlwaysFailAgent))).unwrap();
        registry
            .register(agent_def(
                "finalize_agent",
                vec!["final_response"],
                Arc::new(FixedPatchAgent {
                    field: "final_response",
                    value: serde_json::json!("done"),
                }),
            ))
            .unwrap();

        let executor = PlanExecutor::new(registry, Arc::new(ToolRegistry::new()), None, OrchestratorConfig::default());
        let plan = plan_with(vec![stage("vessel_info", "vessel_info_agent", false), stage("finalize", "finalize_agent", true)]);

        let result = executor.execute_plan(&plan, State::new()).await;
        assert!(result.stages_completed.contains(&"finalize".to_string()));
        assert!(result.stages_failed.contains(&"vessel_info".to_string()));
    }

    #[tokio::test]
    async fn skip_when_predicate_marks_stage_skipped() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(agent_def(
                "bunker_agent",
                vec!["bunker_analysis"],
                Arc::new(FixedPatchAgent {
                    field: "bunker_analysis",
                    value: serde_json::json!({}),
                }),
            ))
            .unwrap();

        let mut bunker_stage = stage("bunker", "bunker_agent", true);
        bunker_stage.skip_when = Some(Predicate {
            state_checks: vec![crate::registry::workflow::StateCheck {
                field: "bunker_analysis".into(),
                exists: Some(true),
                equals: None,
            }],
        });

        let executor = PlanExecutor::new(registry, Arc::new(ToolRegistry::new()), None, OrchestratorConfig::default());
        let plan = plan_with(vec![bunker_stage]);

        let mut initial_state = State::new();
        initial_state.insert("bunker_analysis".into(), serde_json::json!({"best_option": "X"}));

        let result = executor.execute_plan(&plan, initial_state).await;
        assert_eq!(result.stages_skipped, vec!["bunker".to_string()]);
        assert!(result.stages_completed.is_empty());
    }

    fn rate_limited_tool(id: &str, calls: u32, window: Duration) -> crate::registry::tool::ToolDefinition {
        crate::registry::tool::ToolDefinition {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            deprecated_by: None,
            category: crate::registry::tool::ToolCategory::Routing,
            domain_tags: vec![],
            inputs: vec![],
            outputs: vec![],
            cost: crate::registry::tool::ToolCost::ApiCall,
            avg_latency: Duration::from_millis(10),
            max_latency: Duration::from_millis(50),
            reliability: 0.99,
            external_services: vec![],
            depends_on_tools: vec![],
            permitted_agent_ids: vec![],
            requires_auth: false,
            rate_limit: Some(crate::registry::tool::RateLimit { calls, window }),
            implementation_handle: format!("{id}::impl"),
        }
    }

    #[tokio::test]
    async fn exhausted_tool_bucket_fails_stage_with_rate_limited_once_deadline_passes() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(agent_def("a1", vec!["f1"], Arc::new(FixedPatchAgent { field: "f1", value: serde_json::json!(true) }))).unwrap();
        registry.register(agent_def("a2", vec!["f2"], Arc::new(FixedPatchAgent { field: "f2", value: serde_json::json!(true) }))).unwrap();

        let tool_registry = Arc::new(ToolRegistry::new());
        tool_registry.register(rate_limited_tool("routing_api", 1, Duration::from_secs(10))).unwrap();

        let executor = PlanExecutor::new(registry, tool_registry, None, OrchestratorConfig::default());

        let mut s1 = stage("s1", "a1", true);
        s1.tools_needed = vec!["routing_api".into()];
        let mut s2 = stage("s2", "a2", true);
        s2.tools_needed = vec!["routing_api".into()];
        s2.order = 1;

        let mut plan = plan_with(vec![s1, s2]);
        plan.context.timeout = Duration::from_millis(100);

        let result = executor.execute_plan(&plan, State::new()).await;

        assert!(!result.success);
        assert!(result.stages_completed.contains(&"s1".to_string()));
        assert!(result.stages_failed.contains(&"s2".to_string()));
        assert!(result.errors.iter().any(|e| e.contains("rate limited")), "errors: {:?}", result.errors);
    }

    #[tokio::test]
    async fn pre_cancelled_context_stops_before_any_stage_runs() {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(agent_def("a1", vec!["f1"], Arc::new(FixedPatchAgent { field: "f1", value: serde_json::json!(true) }))).unwrap();
        registry.register(agent_def("a2", vec!["f2"], Arc::new(FixedPatchAgent { field: "f2", value: serde_json::json!(true) }))).unwrap();

        let executor = PlanExecutor::new(registry, Arc::new(ToolRegistry::new()), None, OrchestratorConfig::default());

        let s1 = stage("s1", "a1", true);
        let mut s2 = stage("s2", "a2", true);
        s2.order = 1;
        let plan = plan_with(vec![s1, s2]);

        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = executor.execute_plan_cancellable(&plan, State::new(), cancellation).await;

        assert!(!result.success);
        assert!(result.stages_completed.is_empty());
        assert!(result.stage_results.iter().any(|r| r.status == StageStatus::Cancelled));
        assert!(result.errors.iter().any(|e| e.contains("cancelled")), "errors: {:?}", result.errors);
    }
}
