//! Plan Generator: single-LLM-call classification, workflow instantiation,
//! dependency computation, parallel grouping, and estimation — spec.md
//! §4.7's seven-step algorithm.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::plan::llm::{ClassificationRequest, ClassificationResponse, ExtractedEntities, LlmClient};
use crate::plan::types::{Classification, Estimates, ExecutionPlan, GenerationOptions, PlanContext, PlanStage};
use crate::plan::validator::PlanValidator;
use crate::registry::agent::AgentRegistry;
use crate::registry::tool::ToolRegistry;
use crate::registry::workflow::{StageTemplate, WorkflowRegistry};
use crate::state::State;

static PORT_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{5}\b").unwrap());
static IMO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bIMO\s?(\d{7})\b").unwrap());
static FROM_TO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)from\s+([A-Za-z\s]+?)\s+to\s+([A-Za-z\s]+?)(?:[.,]|\s+for|\s*$)").unwrap());

pub struct PlanGenerator {
    agent_registry: Arc<AgentRegistry>,
    tool_registry: Arc<ToolRegistry>,
    workflow_registry: Arc<WorkflowRegistry>,
    llm_client: Arc<dyn LlmClient>,
}

impl PlanGenerator {
    pub fn new(
        agent_registry: Arc<AgentRegistry>,
        tool_registry: Arc<ToolRegistry>,
        workflow_registry: Arc<WorkflowRegistry>,
        llm_client: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            agent_registry,
            tool_registry,
            workflow_registry,
            llm_client,
        }
    }

    pub async fn generate_plan(&self, query: &str, state: &State, options: GenerationOptions) -> ExecutionPlan {
        let classification = self.classify(query).await;

        let workflow = self.select_workflow(&classification);
        let (workflow_id, workflow_version, templates) = match workflow {
            Some(w) => (w.id, w.version, w.stages),
            None => (String::new(), String::new(), Vec::new()),
        };

        let mut templates = templates;
        if let Some(max) = options.max_stages {
            templates.truncate(max);
        }
        templates.retain(|t| !options.exclude_agents.contains(&t.agent_id));

        let stages = self.instantiate_stages(&templates, state);
        let parallel_groups = group_parallel_stages(&stages, &self.agent_registry, options.enable_parallel_execution);
        let estimates = self.estimate(&stages);

        let required_state: Vec<String> = {
            let mut set: Vec<String> = stages.iter().flat_map(|s| s.requires.clone()).collect();
            set.sort();
            set.dedup();
            set
        };
        let expected_outputs: Vec<String> = {
            let mut set: Vec<String> = stages.iter().flat_map(|s| s.provides.clone()).collect();
            set.sort();
            set.dedup();
            set
        };

        let mut plan = ExecutionPlan {
            plan_id: Uuid::new_v4().to_string(),
            query_type: classification.query_type.clone(),
            workflow_id,
            workflow_version,
            classification,
            stages,
            validation: Default::default(),
            estimates,
            required_state,
            expected_outputs,
            context: PlanContext {
                timeout: Duration::from_secs(300),
                priority: 0,
                correlation_id: Uuid::new_v4().to_string(),
            },
            parallel_groups,
        };

        let validator = PlanValidator::new(self.agent_registry.clone(), self.tool_registry.clone());
        plan.validation = validator.validate(&plan, state);
        plan
    }

    /// Step 1: classify and extract entities with a single LLM call,
    /// falling back to regex heuristics on parse failure.
    async fn classify(&self, query: &str) -> Classification {
        let known_query_types = self
            .workflow_registry
            .get("bunker_planning")
            .into_iter()
            .chain(self.workflow_registry.get("route_only"))
            .map(|w| w.query_type)
            .collect::<Vec<_>>();
        let known_workflows = vec!["bunker_planning".to_string(), "route_only".to_string()];
        let known_capabilities = self
            .agent_registry
            .find(&Default::default())
            .into_iter()
            .flat_map(|a| a.capability_tags)
            .collect::<Vec<_>>();

        let request = ClassificationRequest {
            query: query.to_string(),
            known_query_types,
            known_workflows,
            known_capabilities,
        };

        match self.llm_client.classify(request).await {
            Ok(response) => to_classification(response),
            Err(e) => {
                tracing::warn!(error = %e, "llm classification failed, falling back to regex heuristics");
                self.classify_with_regex(query)
            }
        }
    }

    fn classify_with_regex(&self, query: &str) -> Classification {
        let mut entities = ExtractedEntities::default();

        if let Some(caps) = FROM_TO_RE.captures(query) {
            entities.origin = Some(caps[1].trim().to_string());
            entities.destination = Some(caps[2].trim().to_string());
        }
        if let Some(m) = PORT_CODE_RE.find(query) {
            if entities.origin.is_none() {
                entities.origin = Some(m.as_str().to_string());
            }
        }
        if let Some(caps) = IMO_RE.captures(query) {
            entities.vessel_name = Some(format!("IMO{}", &caps[1]));
        }

        let lower = query.to_lowercase();
        let query_type = if lower.contains("bunker") {
            "bunker_planning"
        } else if lower.contains("distance") || lower.contains("route") {
            "route_only"
        } else {
            "unknown"
        };

        Classification {
            query_type: query_type.to_string(),
            confidence: 0.4,
            reasoning: "regex fallback heuristics (LLM parse failure)".to_string(),
            secondary_intents: vec![],
            extracted_entities: entities,
            proposed_workflow_id: None,
        }
    }

    /// Step 2: select the LLM-proposed workflow if it exists, else the
    /// workflow whose declared query_type equals the classification.
    fn select_workflow(&self, classification: &Classification) -> Option<crate::registry::workflow::Workflow> {
        if let Some(proposed) = &classification.proposed_workflow_id {
            if let Some(w) = self.workflow_registry.get(proposed) {
                return Some(w);
            }
        }
        self.workflow_registry.find_by_query_type(&classification.query_type)
    }

    /// Step 3: instantiate stages, resolving each template's agent id
    /// against the Agent Registry.
    fn instantiate_stages(&self, templates: &[StageTemplate], state: &State) -> Vec<PlanStage> {
        let mut stages = Vec::with_capacity(templates.len());
        for (order, template) in templates.iter().enumerate() {
            let agent = self.agent_registry.get(&template.agent_id);
            let (requires, provides, tools_needed) = match &agent {
                Some(a) => (a.consumes.required.clone(), a.produces.clone(), a.tools.required.clone()),
                None => (vec![], vec![], vec![]),
            };

            let depends_on = compute_depends_on(&stages, &requires, state);

            stages.push(PlanStage {
                stage_id: template.stage_id.clone(),
                agent_id: template.agent_id.clone(),
                required: template.required,
                parallel_group: None,
                skip_when: template.skip_when.clone(),
                continue_when: template.continue_when.clone(),
                depends_on,
                provides,
                requires,
                tools_needed,
                est_cost_usd: estimate_stage_cost(&self.tool_registry, &tools_needed),
                est_duration: agent
                    .map(|a| a.execution_hints.max_execution_time)
                    .unwrap_or(Duration::from_secs(5)),
                order,
            });
        }
        stages
    }

    /// Step 6: sum per-stage durations (max within a parallel group); sum
    /// costs; count `llm_calls` from agents declaring LLM use; count
    /// `api_calls` from tool categories.
    fn estimate(&self, stages: &[PlanStage]) -> Estimates {
        let mut by_group: HashMap<u32, Duration> = HashMap::new();
        let mut sequential_duration = Duration::ZERO;
        let mut est_cost_usd = 0.0;
        let mut llm_calls = 0;
        let mut api_calls = 0;

        for stage in stages {
            est_cost_usd += stage.est_cost_usd;
            api_calls += stage.tools_needed.len();
            if let Some(agent) = self.agent_registry.get(&stage.agent_id) {
                if agent.uses_llm {
                    llm_calls += 1;
                }
            }
            match stage.parallel_group {
                Some(group) => {
                    let entry = by_group.entry(group).or_insert(Duration::ZERO);
                    *entry = (*entry).max(stage.est_duration);
                }
                None => sequential_duration += stage.est_duration,
            }
        }

        let parallel_duration: Duration = by_group.values().copied().sum();

        Estimates {
            total_agents: stages.len(),
            llm_calls,
            api_calls,
            est_cost_usd,
            est_duration: sequential_duration + parallel_duration,
        }
    }
}

fn to_classification(response: ClassificationResponse) -> Classification {
    Classification {
        query_type: response.query_type,
        confidence: response.confidence,
        reasoning: response.reasoning,
        secondary_intents: response.secondary_intents,
        extracted_entities: response.extracted_entities,
        proposed_workflow_id: response.proposed_workflow_id,
    }
}

/// `depends_on` = earlier stage ids whose `provides` intersect this stage's
/// `requires`, reduced (but not removed) for fields already present in the
/// initial state.
fn compute_depends_on(earlier: &[PlanStage], requires: &[String], state: &State) -> Vec<String> {
    let mut deps = Vec::new();
    for field in requires {
        if state.contains_key(field) {
            continue;
        }
        for stage in earlier {
            if stage.provides.iter().any(|p| p == field) && !deps.contains(&stage.stage_id) {
                deps.push(stage.stage_id.clone());
            }
        }
    }
    deps
}

fn estimate_stage_cost(tool_registry: &ToolRegistry, tool_ids: &[String]) -> f64 {
    tool_ids
        .iter()
        .filter_map(|id| tool_registry.get(id))
        .map(|t| match t.cost {
            crate::registry::tool::ToolCost::Free => 0.0,
            crate::registry::tool::ToolCost::ApiCall => 0.01,
            crate::registry::tool::ToolCost::Expensive => 0.25,
        })
        .sum()
}

/// Step 5: within a contiguous block of stages whose `depends_on` sets do
/// not reference each other, and whose agent declares
/// `can_run_in_parallel`, assign the same `parallel_group` number.
fn group_parallel_stages(stages: &[PlanStage], agent_registry: &AgentRegistry, enabled: bool) -> Vec<Vec<String>> {
    let mut stages_with_groups = stages.to_vec();
    let mut groups: Vec<Vec<String>> = Vec::new();

    if !enabled {
        return groups;
    }

    let mut i = 0;
    let mut next_group_id: u32 = 0;
    while i < stages_with_groups.len() {
        let can_parallelize = |s: &PlanStage| -> bool {
            agent_registry
                .get(&s.agent_id)
                .map(|a| a.execution_hints.can_run_in_parallel)
                .unwrap_or(false)
        };

        if !can_parallelize(&stages_with_groups[i]) {
            i += 1;
            continue;
        }

        let mut block_end = i + 1;
        while block_end < stages_with_groups.len()
            && can_parallelize(&stages_with_groups[block_end])
            && !stages_with_groups[block_end]
                .depends_on
                .iter()
                .any(|d| stages_with_groups[i..block_end].iter().any(|s| &s.stage_id == d))
        {
            block_end += 1;
        }

        if block_end - i > 1 {
            let mut group_ids = Vec::new();
            for stage in &mut stages_with_groups[i..block_end] {
                stage.parallel_group = Some(next_group_id);
                group_ids.push(stage.stage_id.clone());
            }
            groups.push(group_ids);
            next_group_id += 1;
        }
        i = block_end.max(i + 1);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::llm::MockClassifier;
    use crate::registry::agent::{AgentHandler, AgentType, Consumes, DependencyHints, ExecutionHints, ToolBindings};
    use crate::registry::workflow::WorkflowRegistry;
    use crate::state::StatePatch;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl AgentHandler for NoopHandler {
        async fn run(&self, _state: &State) -> Result<StatePatch, crate::error::ExecutorError> {
            Ok(StatePatch::new())
        }
    }

    fn make_agent(id: &str, produces: Vec<&str>, requires: Vec<&str>) -> crate::registry::agent::AgentDefinition {
        crate::registry::agent::AgentDefinition {
            id: id.into(),
            name: id.into(),
            agent_type: AgentType::Specialist,
            domain_tags: vec![],
            capability_tags: vec![],
            intent_tags: vec![],
            produces: produces.into_iter().map(String::from).collect(),
            consumes: Consumes {
                required: requires.into_iter().map(String::from).collect(),
                optional: vec![],
            },
            tools: ToolBindings::default(),
            dependency_hints: DependencyHints::default(),
            execution_hints: ExecutionHints::default(),
            uses_llm: false,
            priority: 0,
            enabled: true,
            implementation_handle: Arc::new(NoopHandler),
        }
    }

    fn build_generator(llm: Arc<dyn LlmClient>) -> PlanGenerator {
        let agent_registry = Arc::new(AgentRegistry::new());
        agent_registry.register(make_agent("route_agent", vec!["route_data"], vec![])).unwrap();
        agent_registry
            .register(make_agent("finalize_agent", vec!["final_response"], vec!["route_data"]))
            .unwrap();

        let tool_registry = Arc::new(ToolRegistry::new());
        let workflow_registry = Arc::new(WorkflowRegistry::with_embedded_workflows().unwrap());

        PlanGenerator::new(agent_registry, tool_registry, workflow_registry, llm)
    }

    #[tokio::test]
    async fn generate_plan_for_route_only_query() {
        let mock = Arc::new(MockClassifier::with_responses(vec![Ok(ClassificationResponse {
            query_type: "route_only".into(),
            confidence: 0.9,
            reasoning: "distance query".into(),
            secondary_intents: vec![],
            extracted_entities: ExtractedEntities::default(),
            proposed_workflow_id: Some("route_only".into()),
        })]));
        let generator = build_generator(mock);
        let plan = generator
            .generate_plan("Calculate distance between Tokyo and Shanghai.", &State::new(), GenerationOptions::default())
            .await;

        assert_eq!(plan.workflow_id, "route_only");
        assert_eq!(plan.stages.len(), 2);
        assert_eq!(plan.stages[1].depends_on, vec!["route".to_string()]);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_regex_with_low_confidence() {
        let mock = Arc::new(MockClassifier::always_failing());
        let generator = build_generator(mock);
        let plan = generator
            .generate_plan("Find cheapest bunker ports from Singapore to Rotterdam", &State::new(), GenerationOptions::default())
            .await;

        assert_eq!(plan.classification.confidence, 0.4);
        assert_eq!(plan.classification.query_type, "bunker_planning");
    }

    #[tokio::test]
    async fn depends_on_is_reduced_when_state_already_satisfies_requirement() {
        let mock = Arc::new(MockClassifier::with_responses(vec![Ok(ClassificationResponse {
            query_type: "route_only".into(),
            confidence: 0.9,
            reasoning: "distance query".into(),
            secondary_intents: vec![],
            extracted_entities: ExtractedEntities::default(),
            proposed_workflow_id: Some("route_only".into()),
        })]));
        let generator = build_generator(mock);
        let mut state = State::new();
        state.insert("route_data".into(), serde_json::json!({"distance_nm": 1}));

        let plan = generator.generate_plan("distance query", &state, GenerationOptions::default()).await;
        assert!(plan.stages[1].depends_on.is_empty());
    }
}
