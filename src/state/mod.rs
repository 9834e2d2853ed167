//! Orchestration state: a schema-versioned bag of named fields flowing
//! through a plan's stages.
//!
//! Generalizes `loom::state::ReActState`'s fixed-field design (message
//! history plus a handful of ReAct-specific slots) to a domain-configurable
//! field bag, since this crate's state shape varies by workflow rather than
//! being fixed to one agent loop.

pub mod migrator;
pub mod schema;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CURRENT_SCHEMA_VERSION: &str = "2.0.0";

/// Well-known orchestration field names, stored as ordinary entries in
/// `State`'s field map rather than as separate struct fields, so the
/// schema/validator/migrator treat them uniformly with domain fields.
pub mod fields {
    pub const SCHEMA_VERSION: &str = "_schema_version";
    pub const NEXT_AGENT: &str = "next_agent";
    pub const EXECUTION_PLAN: &str = "execution_plan";
    pub const WORKFLOW_STAGE: &str = "workflow_stage";
    pub const REASONING_HISTORY: &str = "reasoning_history";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const NEEDS_CLARIFICATION: &str = "needs_clarification";
}

/// A partial state update: the fields an agent declares it owns, returned
/// from `AgentHandler::run` and merged into the shared `State` at a group
/// boundary.
pub type StatePatch = HashMap<String, Value>;

/// The orchestration state: a mapping from named fields to JSON values plus
/// a schema version tag, carried across an entire plan's execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct State(HashMap<String, Value>);

impl Deref for State {
    type Target = HashMap<String, Value>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for State {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl State {
    pub fn new() -> Self {
        let mut s = Self(HashMap::new());
        s.0.insert(
            fields::SCHEMA_VERSION.to_string(),
            Value::String(CURRENT_SCHEMA_VERSION.to_string()),
        );
        s
    }

    pub fn from_fields(fields: HashMap<String, Value>) -> Self {
        Self(fields)
    }

    pub fn into_fields(self) -> HashMap<String, Value> {
        self.0
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.0.get(fields::SCHEMA_VERSION).and_then(Value::as_str)
    }

    pub fn set_schema_version(&mut self, version: &str) {
        self.0.insert(
            fields::SCHEMA_VERSION.to_string(),
            Value::String(version.to_string()),
        );
    }

    pub fn next_agent(&self) -> Option<&str> {
        self.0.get(fields::NEXT_AGENT).and_then(Value::as_str)
    }

    pub fn set_next_agent(&mut self, agent_id: impl Into<String>) {
        self.0
            .insert(fields::NEXT_AGENT.to_string(), Value::String(agent_id.into()));
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.0.get(fields::CORRELATION_ID).and_then(Value::as_str)
    }

    pub fn needs_clarification(&self) -> bool {
        self.0
            .get(fields::NEEDS_CLARIFICATION)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Applies a patch on top of this state, returning the set of field
    /// names the patch touched (used by the executor's "undeclared write"
    /// warning and by delta computation).
    pub fn merge_patch(&mut self, patch: StatePatch) -> Vec<String> {
        let mut touched = Vec::with_capacity(patch.len());
        for (k, v) in patch {
            touched.push(k.clone());
            self.0.insert(k, v);
        }
        touched
    }

    /// Size in bytes of a field's serialized value, used by the validator
    /// and compressor to check against `max_size_bytes` / the inline
    /// threshold.
    pub fn field_size_bytes(&self, name: &str) -> Option<usize> {
        self.0.get(name).map(|v| serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_stamps_current_version() {
        let s = State::new();
        assert_eq!(s.schema_version(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn merge_patch_overwrites_and_reports_touched_fields() {
        let mut s = State::new();
        let mut patch = StatePatch::new();
        patch.insert("route_data".to_string(), serde_json::json!({"distance_nm": 5000}));
        let touched = s.merge_patch(patch);
        assert_eq!(touched, vec!["route_data".to_string()]);
        assert_eq!(s.get("route_data").unwrap()["distance_nm"], 5000);
    }

    #[test]
    fn needs_clarification_defaults_false() {
        let s = State::new();
        assert!(!s.needs_clarification());
    }
}
