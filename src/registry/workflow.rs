//! Workflow Registry: named, declarative stage-template lists keyed by query
//! type. Loaded from embedded YAML at compile time, mirroring
//! `loom::prompts::load`'s embed-then-parse pattern for product-config
//! assets, using `serde_yaml` rather than hand-written Rust literals so
//! workflows can be edited without touching code.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistryError;
use crate::state::State;

const EMBEDDED_WORKFLOWS_YAML: &str = include_str!("workflows.yaml");

/// One `state_checks` entry: a field existence or equality check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateCheck {
    pub field: String,
    #[serde(default)]
    pub exists: Option<bool>,
    #[serde(default)]
    pub equals: Option<Value>,
}

impl StateCheck {
    fn matches(&self, state: &State) -> bool {
        let present = state.contains_key(&self.field);
        if let Some(expect_exists) = self.exists {
            if present != expect_exists {
                return false;
            }
        }
        if let Some(expect_value) = &self.equals {
            match state.get(&self.field) {
                Some(actual) => {
                    if actual != expect_value {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// A `skip_when` / `continue_when` predicate: all `state_checks` must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default)]
    pub state_checks: Vec<StateCheck>,
}

impl Predicate {
    pub fn matches(&self, state: &State) -> bool {
        !self.state_checks.is_empty() && self.state_checks.iter().all(|c| c.matches(state))
    }
}

/// A declarative stage template, as it appears in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTemplate {
    pub stage_id: String,
    pub agent_id: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub parallel_group: Option<u32>,
    #[serde(default)]
    pub skip_when: Option<Predicate>,
    #[serde(default)]
    pub continue_when: Option<Predicate>,
}

fn default_true() -> bool {
    true
}

/// A named, ordered workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub version: String,
    pub query_type: String,
    pub stages: Vec<StageTemplate>,
}

/// Process-wide catalog of workflow templates.
pub struct WorkflowRegistry {
    workflows: DashMap<String, Workflow>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            workflows: DashMap::new(),
        }
    }

    /// Builds a registry pre-populated with the embedded workflow set.
    pub fn with_embedded_workflows() -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.load_embedded()?;
        Ok(registry)
    }

    pub fn load_embedded(&self) -> Result<(), RegistryError> {
        let workflows: Vec<Workflow> = serde_yaml::from_str(EMBEDDED_WORKFLOWS_YAML)
            .map_err(|e| RegistryError::InvalidDefinition(format!("embedded workflow YAML: {e}")))?;
        for workflow in workflows {
            self.register(workflow)?;
        }
        Ok(())
    }

    pub fn register(&self, workflow: Workflow) -> Result<(), RegistryError> {
        if workflow.id.trim().is_empty() {
            return Err(RegistryError::InvalidDefinition("empty workflow id".into()));
        }
        if workflow.stages.is_empty() {
            return Err(RegistryError::InvalidDefinition(format!(
                "workflow {} has no stages",
                workflow.id
            )));
        }
        self.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Workflow> {
        self.workflows.get(id).map(|e| e.value().clone())
    }

    pub fn has(&self, id: &str) -> bool {
        self.workflows.contains_key(id)
    }

    /// Finds the workflow whose declared `query_type` equals `query_type`.
    /// When several match, the lowest id wins, for determinism.
    pub fn find_by_query_type(&self, query_type: &str) -> Option<Workflow> {
        let mut matches: Vec<Workflow> = self
            .workflows
            .iter()
            .map(|e| e.value().clone())
            .filter(|w| w.query_type == query_type)
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_workflows_load_and_resolve_by_query_type() {
        let registry = WorkflowRegistry::with_embedded_workflows().unwrap();
        assert!(registry.has("bunker_planning"));
        assert!(registry.has("route_only"));

        let bunker = registry.find_by_query_type("bunker_planning").unwrap();
        assert_eq!(bunker.stages.len(), 5);
        assert_eq!(bunker.stages[0].agent_id, "route_agent");

        let route_only = registry.find_by_query_type("route_only").unwrap();
        assert_eq!(route_only.stages.len(), 2);
    }

    #[test]
    fn unknown_query_type_returns_none() {
        let registry = WorkflowRegistry::with_embedded_workflows().unwrap();
        assert!(registry.find_by_query_type("nonexistent").is_none());
    }

    #[test]
    fn skip_when_predicate_matches_state() {
        let registry = WorkflowRegistry::with_embedded_workflows().unwrap();
        let bunker = registry.find_by_query_type("bunker_planning").unwrap();
        let bunker_stage = bunker.stages.iter().find(|s| s.stage_id == "bunker").unwrap();
        let predicate = bunker_stage.skip_when.as_ref().unwrap();

        let mut state = State::new();
        assert!(!predicate.matches(&state));
        state.insert("bunker_analysis".into(), serde_json::json!({}));
        assert!(predicate.matches(&state));
    }

    #[test]
    fn registering_workflow_without_stages_fails() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .register(Workflow {
                id: "empty".into(),
                version: "1.0.0".into(),
                query_type: "empty".into(),
                stages: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition(_)));
    }
}
