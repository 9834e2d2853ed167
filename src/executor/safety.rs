//! Safety Validators: a small, declarative set of cross-cutting invariant
//! checks at routing decisions (spec.md §4.10).
//!
//! Grounded on `graphweave::graph::interrupt`'s trait-object-handler shape
//! (`InterruptHandler`), generalized from "the graph needs a human" to "the
//! routing decision needs a cheaper fix" via the `SafeNext` three-way enum
//! (spec.md §20 supplement, reusing `loom::graph::next::Next`'s
//! `Continue`/`Jump`/`End` shape).

use serde::{Deserialize, Serialize};

use crate::state::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct SafetyCheckOutcome {
    pub valid: bool,
    pub required_agent: Option<String>,
    pub reason: String,
    pub severity: Severity,
}

/// A declarative invariant: `applies_when` gates which `next_agent` values
/// trigger `check`.
pub struct SafetyValidator {
    pub name: String,
    pub applies_when: fn(&str) -> bool,
    pub check: fn(&State) -> SafetyCheckOutcome,
}

/// Generalization of `loom::graph::next::Next` for the safety validator's
/// soft-recovery path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeNext {
    AsPlanned,
    Reroute(String),
    Abort,
}

/// Returns the first critical failure among validators that apply to
/// `next_agent`, else `None`.
pub fn validate_all(validators: &[SafetyValidator], next_agent: &str, state: &State) -> Option<SafetyCheckOutcome> {
    validators
        .iter()
        .filter(|v| (v.applies_when)(next_agent))
        .map(|v| (v.check)(state))
        .find(|outcome| !outcome.valid && outcome.severity == Severity::Critical)
}

/// Returns `state.next_agent()` unless the first failing critical validator
/// overrides it with a required prerequisite agent, in which case that
/// agent is returned instead (soft recovery); a critical failure with no
/// `required_agent` aborts.
pub fn get_safe_next_agent(validators: &[SafetyValidator], state: &State) -> SafeNext {
    let Some(next_agent) = state.next_agent() else {
        return SafeNext::AsPlanned;
    };
    match validate_all(validators, next_agent, state) {
        None => SafeNext::AsPlanned,
        Some(outcome) => match outcome.required_agent {
            Some(required) => SafeNext::Reroute(required),
            None => SafeNext::Abort,
        },
    }
}

/// The two example validators named in spec.md §4.9/§4.10: routing to a
/// bunker stage requires route data; routing to vessel selection requires
/// either bunker analysis or a bunker-ports list.
pub fn default_safety_validators() -> Vec<SafetyValidator> {
    vec![
        SafetyValidator {
            name: "route_before_bunker".to_string(),
            applies_when: |next_agent| next_agent == "bunker_agent",
            check: |state| {
                if state.contains_key("route_data") {
                    SafetyCheckOutcome {
                        valid: true,
                        required_agent: None,
                        reason: "route_data present".to_string(),
                        severity: Severity::Info,
                    }
                } else {
                    SafetyCheckOutcome {
                        valid: false,
                        required_agent: Some("route_agent".to_string()),
                        reason: "routing to bunker stage requires route_data present".to_string(),
                        severity: Severity::Critical,
                    }
                }
            },
        },
        SafetyValidator {
            name: "bunker_data_before_vessel_selection".to_string(),
            applies_when: |next_agent| next_agent == "vessel_selection_agent",
            check: |state| {
                if state.contains_key("bunker_analysis") || state.contains_key("bunker_ports") {
                    SafetyCheckOutcome {
                        valid: true,
                        required_agent: None,
                        reason: "bunker_analysis or bunker_ports present".to_string(),
                        severity: Severity::Info,
                    }
                } else {
                    SafetyCheckOutcome {
                        valid: false,
                        required_agent: Some("bunker_agent".to_string()),
                        reason: "routing to vessel_selection requires bunker_analysis or bunker_ports".to_string(),
                        severity: Severity::Critical,
                    }
                }
            },
        },
    ]
}
