//! Plan Validator: structural and semantic checks over an instantiated plan
//! — spec.md §4.8.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::plan::types::{ExecutionPlan, ValidationOutcome};
use crate::registry::agent::AgentRegistry;
use crate::registry::tool::ToolRegistry;
use crate::state::State;

pub struct PlanValidator {
    agent_registry: Arc<AgentRegistry>,
    tool_registry: Arc<ToolRegistry>,
}

impl PlanValidator {
    pub fn new(agent_registry: Arc<AgentRegistry>, tool_registry: Arc<ToolRegistry>) -> Self {
        Self {
            agent_registry,
            tool_registry,
        }
    }

    pub fn validate(&self, plan: &ExecutionPlan, initial_state: &State) -> ValidationOutcome {
        let mut invalid_agents = Vec::new();
        let mut invalid_tools = Vec::new();
        let mut missing_inputs = Vec::new();
        let mut warnings = Vec::new();

        for stage in &plan.stages {
            match self.agent_registry.get(&stage.agent_id) {
                Some(agent) if agent.enabled => {}
                Some(_) => invalid_agents.push(stage.agent_id.clone()),
                None => invalid_agents.push(stage.agent_id.clone()),
            }
            for tool_id in &stage.tools_needed {
                if !self.tool_registry.has(tool_id) {
                    invalid_tools.push(tool_id.clone());
                }
            }
        }

        let mut satisfied: HashSet<String> = initial_state.keys().cloned().collect();
        for stage in &plan.stages {
            for field in &stage.requires {
                if !satisfied.contains(field) {
                    missing_inputs.push(format!("{}: requires {}", stage.stage_id, field));
                }
            }
            satisfied.extend(stage.provides.iter().cloned());
        }

        if let Some(cycle) = detect_stage_cycle(plan) {
            warnings.push(format!("cycle detected in depends_on: {}", cycle.join(" -> ")));
        }

        let all_provides: HashSet<String> = plan.stages.iter().flat_map(|s| s.provides.clone()).collect();
        for output in &plan.expected_outputs {
            if !all_provides.contains(output) {
                warnings.push(format!("expected output {output} is not produced by any stage"));
            }
        }

        let is_valid = invalid_agents.is_empty()
            && invalid_tools.is_empty()
            && missing_inputs.is_empty()
            && !warnings.iter().any(|w| w.contains("cycle detected"));

        ValidationOutcome {
            is_valid,
            missing_inputs,
            invalid_agents,
            invalid_tools,
            warnings,
        }
    }
}

fn detect_stage_cycle(plan: &ExecutionPlan) -> Option<Vec<String>> {
    let graph: HashMap<String, Vec<String>> = plan
        .stages
        .iter()
        .map(|s| (s.stage_id.clone(), s.depends_on.clone()))
        .collect();

    #[derive(PartialEq, Clone, Copy)]
    enum Colour {
        White,
        Grey,
        Black,
    }

    let mut colour: HashMap<&String, Colour> = graph.keys().map(|k| (k, Colour::White)).collect();
    let mut stack: Vec<String> = Vec::new();

    fn visit<'a>(
        node: &'a String,
        graph: &'a HashMap<String, Vec<String>>,
        colour: &mut HashMap<&'a String, Colour>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        colour.insert(node, Colour::Grey);
        stack.push(node.clone());
        if let Some(deps) = graph.get(node) {
            for dep in deps {
                match colour.get(dep).copied().unwrap_or(Colour::White) {
                    Colour::White => {
                        if let Some(c) = visit(dep, graph, colour, stack) {
                            return Some(c);
                        }
                    }
                    Colour::Grey => {
                        let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Colour::Black => {}
                }
            }
        }
        stack.pop();
        colour.insert(node, Colour::Black);
        None
    }

    let mut keys: Vec<&String> = graph.keys().collect();
    keys.sort();
    for node in keys {
        if colour.get(node).copied().unwrap_or(Colour::White) == Colour::White {
            if let Some(c) = visit(node, &graph, &mut colour, &mut stack) {
                return Some(c);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::{Classification, Estimates, PlanContext};
    use crate::plan::llm::ExtractedEntities;
    use std::time::Duration;

    fn empty_plan(stages: Vec<crate::plan::types::PlanStage>, expected_outputs: Vec<String>) -> ExecutionPlan {
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
            expected_outputs,
            context: PlanContext {
                timeout: Duration::from_secs(60),
                priority: 0,
                correlation_id: "c1".into(),
            },
            parallel_groups: vec![],
        }
    }

    fn stage(id: &str, agent_id: &str, depends_on: Vec<&str>, requires: Vec<&str>, provides: Vec<&str>) -> crate::plan::types::PlanStage {
        crate::plan::types::PlanStage {
            stage_id: id.into(),
            agent_id: agent_id.into(),
            required: true,
            parallel_group: None,
            skip_when: None,
            continue_when: None,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            provides: provides.into_iter().map(String::from).collect(),
            requires: requires.into_iter().map(String::from).collect(),
            tools_needed: vec![],
            est_cost_usd: 0.0,
            est_duration: Duration::from_secs(1),
            order: 0,
        }
    }

    #[test]
    fn missing_required_input_is_reported() {
        let agent_registry = Arc::new(AgentRegistry::new());
        let tool_registry = Arc::new(ToolRegistry::new());
        let validator = PlanValidator::new(agent_registry, tool_registry);

        let plan = empty_plan(vec![stage("bunker", "bunker_agent", vec![], vec!["route_data"], vec![])], vec![]);
        let outcome = validator.validate(&plan, &State::new());
        assert!(!outcome.is_valid);
        assert!(outcome.missing_inputs.iter().any(|m| m.contains("route_data")));
    }

    #[test]
    fn unknown_agent_is_invalid() {
        let agent_registry = Arc::new(AgentRegistry::new());
        let tool_registry = Arc::new(ToolRegistry::new());
        let validator = PlanValidator::new(agent_registry, tool_registry);

        let plan = empty_plan(vec![stage("s1", "nonexistent_agent", vec![], vec![], vec![])], vec![]);
        let outcome = validator.validate(&plan, &State::new());
        assert!(outcome.invalid_agents.contains(&"nonexistent_agent".to_string()));
    }

    #[test]
    fn cycle_in_depends_on_is_flagged() {
        let agent_registry = Arc::new(AgentRegistry::new());
        let tool_registry = Arc::new(ToolRegistry::new());
        let validator = PlanValidator::new(agent_registry, tool_registry);

        let plan = empty_plan(
            vec![
                stage("a", "agent_a", vec!["b"], vec![], vec![]),
                stage("b", "agent_b", vec!["a"], vec![], vec![]),
            ],
            vec![],
        );
        let outcome = validator.validate(&plan, &State::new());
        assert!(!outcome.is_valid);
        assert!(outcome.warnings.iter().any(|w| w.contains("cycle detected")));
    }

    #[test]
    fn expected_output_not_produced_is_warned() {
        let agent_registry = Arc::new(AgentRegistry::new());
        let tool_registry = Arc::new(ToolRegistry::new());
        let validator = PlanValidator::new(agent_registry, tool_registry);

        let plan = empty_plan(vec![stage("a", "agent_a", vec![], vec![], vec!["route_data"])], vec!["bunker_analysis".to_string()]);
        let outcome = validator.validate(&plan, &State::new());
        assert!(outcome.warnings.iter().any(|w| w.contains("bunker_analysis")));
    }
}
