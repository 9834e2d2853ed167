//! Agent Registry: catalog of agent definitions, their declared data
//! dependencies, and the dependency DAG those declarations imply.
//!
//! Agents are data records plus a handle, the same "registry replaces class
//! hierarchy" design the tool registry uses. The dependency graph generalizes
//! `loom::graph::state_graph::StateGraph::compile_internal`'s single-chain
//! cycle walk to a true multi-edge DAG, checked with DFS colour-marking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, RegistryError};
use crate::registry::tool::ExecutionMetrics;
use crate::state::{State, StatePatch};

/// Agent classification, used for routing and for `llm_calls` accounting
/// (only `Specialist`/`Coordinator` agents that also set `uses_llm` count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    Supervisor,
    Specialist,
    Coordinator,
    Finalizer,
}

/// `consumes.{required, optional}` state-field sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Consumes {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// `tools.{required, optional}` tool-id sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolBindings {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// Declared upstream/downstream agent-id hints, used to seed the dependency
/// graph alongside inferred produces/consumes edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyHints {
    pub upstream: Vec<String>,
    pub downstream: Vec<String>,
}

/// Backoff shape for an agent's retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Backoff {
    Linear(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

/// `execution_hints.retry_policy` — reused in shape by the executor's retry
/// loop, analogous to `graphweave::graph::retry::RetryPolicy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl AgentRetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::Linear(Duration::ZERO),
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Linear(d) => *d,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let scaled = initial.as_secs_f64() * multiplier.powi(attempt as i32);
                Duration::from_secs_f64(scaled).min(*max)
            }
        }
    }
}

/// `execution_hints` (minus retry_policy, held separately above).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHints {
    pub can_run_in_parallel: bool,
    pub max_execution_time: Duration,
    pub retry_policy: AgentRetryPolicy,
}

impl Default for ExecutionHints {
    fn default() -> Self {
        Self {
            can_run_in_parallel: false,
            max_execution_time: Duration::from_secs(30),
            retry_policy: AgentRetryPolicy::none(),
        }
    }
}

/// The generalization of `loom::traits::Agent::run` / `loom::graph::Node::run`:
/// a node returns only the partial state it declared it owns, not the whole
/// state, so the executor can merge concurrent writers.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn run(&self, state: &State) -> Result<StatePatch, ExecutorError>;
}

/// A declarative agent record.
#[derive(Clone)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub domain_tags: Vec<String>,
    pub capability_tags: Vec<String>,
    pub intent_tags: Vec<String>,
    pub produces: Vec<String>,
    pub consumes: Consumes,
    pub tools: ToolBindings,
    pub dependency_hints: DependencyHints,
    pub execution_hints: ExecutionHints,
    pub uses_llm: bool,
    pub priority: i32,
    pub enabled: bool,
    pub implementation_handle: Arc<dyn AgentHandler>,
}

impl std::fmt::Debug for AgentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDefinition")
            .field("id", &self.id)
            .field("agent_type", &self.agent_type)
            .field("produces", &self.produces)
            .field("consumes", &self.consumes)
            .finish()
    }
}

/// Filter criteria for `AgentRegistry::find`.
#[derive(Debug, Clone, Default)]
pub struct AgentCriteria {
    pub domain_tag: Option<String>,
    pub capability_tag: Option<String>,
    pub intent_tag: Option<String>,
    pub min_reliability: Option<f64>,
    pub enabled_only: bool,
}

/// Process-wide catalog of agent definitions and their dependency DAG.
pub struct AgentRegistry {
    definitions: DashMap<String, AgentDefinition>,
    metrics: DashMap<String, ExecutionMetrics>,
    intent_capabilities: DashMap<String, Vec<String>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            metrics: DashMap::new(),
            intent_capabilities: DashMap::new(),
        }
    }

    /// Registers a static intent → capability-set mapping, used by
    /// `resolve_capabilities_for_intent`. Unknown intents resolve empty.
    pub fn register_intent_mapping(&self, intent: impl Into<String>, capabilities: Vec<String>) {
        self.intent_capabilities.insert(intent.into(), capabilities);
    }

    pub fn resolve_capabilities_for_intent(&self, intent: &str) -> Vec<String> {
        self.intent_capabilities
            .get(intent)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn agents_for_capability(&self, capability: &str) -> Vec<AgentDefinition> {
        let mut out: Vec<AgentDefinition> = self
            .definitions
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| a.capability_tags.iter().any(|c| c == capability))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Registers an agent. Fails `InvalidDefinition` if the invariant
    /// "every tool in `tools.required` exists" cannot be checked statically
    /// here (left to the caller supplying a `known_tool_ids` set — the
    /// registry itself only owns agent-to-agent structure) or if the new
    /// definition would introduce a cycle in the dependency graph. Fails
    /// `DuplicateId` if the id exists with a structurally different record.
    pub fn register(&self, def: AgentDefinition) -> Result<(), RegistryError> {
        if def.id.trim().is_empty() {
            return Err(RegistryError::InvalidDefinition("empty agent id".into()));
        }
        if let Some(existing) = self.definitions.get(&def.id) {
            if !definitions_equal(&existing, &def) {
                return Err(RegistryError::DuplicateId(def.id.clone()));
            }
            return Ok(());
        }

        // Provisionally insert, check for cycles against the whole registry,
        // roll back on violation.
        self.definitions.insert(def.id.clone(), def.clone());
        let graph = self.build_dependency_graph();
        if let Some(cycle) = detect_cycles(&graph) {
            self.definitions.remove(&def.id);
            return Err(RegistryError::InvalidDefinition(format!(
                "registering {} would introduce a cycle: {}",
                def.id,
                cycle.join(" -> ")
            )));
        }
        self.metrics
            .entry(def.id.clone())
            .or_insert_with(ExecutionMetrics::default);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<AgentDefinition> {
        self.definitions.get(id).map(|e| e.value().clone())
    }

    pub fn has(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn find(&self, criteria: &AgentCriteria) -> Vec<AgentDefinition> {
        let mut out: Vec<AgentDefinition> = self
            .definitions
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| {
                if criteria.enabled_only && !a.enabled {
                    return false;
                }
                if let Some(tag) = &criteria.domain_tag {
                    if !a.domain_tags.iter().any(|t| t == tag) {
                        return false;
                    }
                }
                if let Some(cap) = &criteria.capability_tag {
                    if !a.capability_tags.iter().any(|t| t == cap) {
                        return false;
                    }
                }
                if let Some(intent) = &criteria.intent_tag {
                    if !a.intent_tags.iter().any(|t| t == intent) {
                        return false;
                    }
                }
                true
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn record_execution(&self, id: &str, success: bool, _duration: Duration) {
        self.metrics
            .entry(id.to_string())
            .or_insert_with(ExecutionMetrics::default)
            .record(success);
        metrics::counter!("agent_invocations_total", "agent_id" => id.to_string()).increment(1);
    }

    pub fn metrics_snapshot(&self, id: &str) -> Option<crate::registry::tool::MetricsSnapshot> {
        self.metrics.get(id).map(|m| m.snapshot())
    }

    /// All registered agent ids, sorted, for callers that want to iterate
    /// the whole catalog's metrics (e.g. a process-wide metrics report).
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Builds the adjacency list over all currently registered agents: an
    /// edge `a -> b` means `a` must run before `b`, from declared
    /// `dependency_hints.{upstream,downstream}` plus inferred edges where
    /// `b.consumes.required` intersects `a.produces`.
    pub fn build_dependency_graph(&self) -> HashMap<String, Vec<String>> {
        let defs: Vec<AgentDefinition> = self.definitions.iter().map(|e| e.value().clone()).collect();
        let mut graph: HashMap<String, Vec<String>> = defs.iter().map(|a| (a.id.clone(), Vec::new())).collect();

        for a in &defs {
            for upstream_id in &a.dependency_hints.upstream {
                if let Some(edges) = graph.get_mut(upstream_id) {
                    if !edges.contains(&a.id) {
                        edges.push(a.id.clone());
                    }
                }
            }
            for downstream_id in &a.dependency_hints.downstream {
                if let Some(edges) = graph.get_mut(&a.id) {
                    if !edges.contains(downstream_id) {
                        edges.push(downstream_id.clone());
                    }
                }
            }
        }

        for producer in &defs {
            for consumer in &defs {
                if producer.id == consumer.id {
                    continue;
                }
                let provides_something_required = consumer
                    .consumes
                    .required
                    .iter()
                    .any(|field| producer.produces.iter().any(|p| p == field));
                if provides_something_required {
                    if let Some(edges) = graph.get_mut(&producer.id) {
                        if !edges.contains(&consumer.id) {
                            edges.push(consumer.id.clone());
                        }
                    }
                }
            }
        }

        graph
    }

    pub fn detect_cycles(&self) -> Option<Vec<String>> {
        detect_cycles(&self.build_dependency_graph())
    }

    /// Topologically sorts `subset` (agent ids) respecting the full
    /// registry's dependency graph restricted to that subset; ties broken by
    /// `priority` (descending), then by id.
    pub fn topological_sort(&self, subset: &[String]) -> Result<Vec<String>, RegistryError> {
        let full_graph = self.build_dependency_graph();
        let subset_set: HashSet<&String> = subset.iter().collect();
        let mut graph: HashMap<String, Vec<String>> = HashMap::new();
        for id in subset {
            let edges = full_graph
                .get(id)
                .map(|e| e.iter().filter(|t| subset_set.contains(t)).cloned().collect())
                .unwrap_or_default();
            graph.insert(id.clone(), edges);
        }

        let mut in_degree: HashMap<String, usize> = subset.iter().map(|id| (id.clone(), 0)).collect();
        for edges in graph.values() {
            for target in edges {
                *in_degree.entry(target.clone()).or_insert(0) += 1;
            }
        }

        let priority_of = |id: &str| -> i32 { self.get(id).map(|a| a.priority).unwrap_or(0) };

        let mut ready: Vec<String> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort_by(|a, b| priority_of(b).cmp(&priority_of(a)).then_with(|| a.cmp(b)));

        let mut order = Vec::with_capacity(subset.len());
        let mut ready: std::collections::VecDeque<String> = ready.into();

        while let Some(id) = ready.pop_front() {
            order.push(id.clone());
            if let Some(edges) = graph.get(&id) {
                let mut newly_ready = Vec::new();
                for target in edges {
                    if let Some(deg) = in_degree.get_mut(target) {
                        *deg -= 1;
                        if *deg == 0 {
                            newly_ready.push(target.clone());
                        }
                    }
                }
                newly_ready.sort_by(|a, b| priority_of(b).cmp(&priority_of(a)).then_with(|| a.cmp(b)));
                let mut merged: Vec<String> = ready.into_iter().collect();
                merged.extend(newly_ready);
                merged.sort_by(|a, b| priority_of(b).cmp(&priority_of(a)).then_with(|| a.cmp(b)));
                ready = merged.into();
            }
        }

        if order.len() != subset.len() {
            return Err(RegistryError::InvalidDefinition(
                "cycle detected in requested subset".into(),
            ));
        }
        Ok(order)
    }
}

fn definitions_equal(a: &AgentDefinition, b: &AgentDefinition) -> bool {
    a.id == b.id
        && a.name == b.name
        && a.agent_type == b.agent_type
        && a.produces == b.produces
}

/// DFS colour-marking cycle detection: white (unvisited) / grey (on stack) /
/// black (done). Returns the cycle path (agent ids) if one exists.
fn detect_cycles(graph: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
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

        if let Some(edges) = graph.get(node) {
            for next in edges {
                match colour.get(next).copied().unwrap_or(Colour::White) {
                    Colour::White => {
                        if let Some(cycle) = visit(next, graph, colour, stack) {
                            return Some(cycle);
                        }
                    }
                    Colour::Grey => {
                        let start = stack.iter().position(|n| n == next).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(next.clone());
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
            if let Some(cycle) = visit(node, graph, &mut colour, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl AgentHandler for NoopHandler {
        async fn run(&self, _state: &State) -> Result<StatePatch, ExecutorError> {
            Ok(StatePatch::new())
        }
    }

    fn agent(id: &str, produces: Vec<&str>, requires: Vec<&str>) -> AgentDefinition {
        AgentDefinition {
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

    #[test]
    fn register_infers_edge_from_produces_consumes() {
        let reg = AgentRegistry::new();
        reg.register(agent("route_agent", vec!["route_data"], vec![])).unwrap();
        reg.register(agent("bunker_agent", vec!["bunker_analysis"], vec!["route_data"]))
            .unwrap();
        let graph = reg.build_dependency_graph();
        assert!(graph.get("route_agent").unwrap().contains(&"bunker_agent".to_string()));
    }

    #[test]
    fn cycle_registration_fails() {
        let reg = AgentRegistry::new();
        reg.register(agent("agent_a", vec!["field_b_consumer_output"], vec!["field_a"]))
            .unwrap();
        let err = reg
            .register(agent("agent_b", vec!["field_a"], vec!["field_b_consumer_output"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition(_)));
    }

    #[test]
    fn topological_sort_respects_dependencies() {
        let reg = AgentRegistry::new();
        reg.register(agent("route_agent", vec!["route_data"], vec![])).unwrap();
        reg.register(agent("bunker_agent", vec!["bunker_analysis"], vec!["route_data"]))
            .unwrap();
        reg.register(agent("finalize_agent", vec!["final_response"], vec!["bunker_analysis"]))
            .unwrap();

        let order = reg
            .topological_sort(&[
                "finalize_agent".to_string(),
                "route_agent".to_string(),
                "bunker_agent".to_string(),
            ])
            .unwrap();
        assert_eq!(order, vec!["route_agent", "bunker_agent", "finalize_agent"]);
    }

    #[test]
    fn detect_cycles_empty_for_acyclic_registry() {
        let reg = AgentRegistry::new();
        reg.register(agent("route_agent", vec!["route_data"], vec![])).unwrap();
        reg.register(agent("finalize_agent", vec!["final_response"], vec!["route_data"]))
            .unwrap();
        assert!(reg.detect_cycles().is_none());
    }

    #[test]
    fn intent_capability_resolution_unknown_is_empty() {
        let reg = AgentRegistry::new();
        reg.register_intent_mapping("plan_bunker", vec!["bunker_optimization".to_string()]);
        assert_eq!(
            reg.resolve_capabilities_for_intent("plan_bunker"),
            vec!["bunker_optimization".to_string()]
        );
        assert!(reg.resolve_capabilities_for_intent("unknown_intent").is_empty());
    }

    #[test]
    fn duplicate_id_with_identical_definition_is_noop() {
        let reg = AgentRegistry::new();
        reg.register(agent("route_agent", vec!["route_data"], vec![])).unwrap();
        reg.register(agent("route_agent", vec!["route_data"], vec![])).unwrap();
    }
}
