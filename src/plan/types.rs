//! Execution Plan data model (spec.md §3): `{plan_id, query_type,
//! workflow_id+version, classification, stages[], validation, estimates,
//! required_state, expected_outputs, context, parallel_groups[]}`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::llm::ExtractedEntities;
use crate::registry::workflow::Predicate;

/// Query classification, carried on the plan for downstream debugging/audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub query_type: String,
    pub confidence: f64,
    pub reasoning: String,
    pub secondary_intents: Vec<String>,
    pub extracted_entities: ExtractedEntities,
    pub proposed_workflow_id: Option<String>,
}

/// Plan-generation options, per spec.md §4.7.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub force_regenerate: bool,
    pub include_optional_agents: bool,
    pub enable_parallel_execution: bool,
    pub max_stages: Option<usize>,
    pub exclude_agents: Vec<String>,
    pub context_overrides: HashMap<String, serde_json::Value>,
}

/// Result of the Plan Validator (spec.md §4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub missing_inputs: Vec<String>,
    pub invalid_agents: Vec<String>,
    pub invalid_tools: Vec<String>,
    pub warnings: Vec<String>,
}

/// Cost/duration estimate totals, per spec.md §4.7 step 6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Estimates {
    pub total_agents: usize,
    pub llm_calls: usize,
    pub api_calls: usize,
    pub est_cost_usd: f64,
    pub est_duration: Duration,
}

/// Plan-level execution context.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub timeout: Duration,
    pub priority: i32,
    pub correlation_id: String,
}

/// `Plan Stage (instantiated)`: adds `depends_on`, `provides`, `requires`,
/// `tools_needed`, and per-stage estimates to the workflow-stage template.
#[derive(Debug, Clone)]
pub struct PlanStage {
    pub stage_id: String,
    pub agent_id: String,
    pub required: bool,
    pub parallel_group: Option<u32>,
    pub skip_when: Option<Predicate>,
    pub continue_when: Option<Predicate>,
    pub depends_on: Vec<String>,
    pub provides: Vec<String>,
    pub requires: Vec<String>,
    pub tools_needed: Vec<String>,
    pub est_cost_usd: f64,
    pub est_duration: Duration,
    pub order: usize,
}

/// An instantiated, validated workflow bound to a concrete query and state.
/// Immutable once returned from the Plan Generator.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub query_type: String,
    pub workflow_id: String,
    pub workflow_version: String,
    pub classification: Classification,
    pub stages: Vec<PlanStage>,
    pub validation: ValidationOutcome,
    pub estimates: Estimates,
    pub required_state: Vec<String>,
    pub expected_outputs: Vec<String>,
    pub context: PlanContext,
    pub parallel_groups: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn stage(&self, stage_id: &str) -> Option<&PlanStage> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }
}
