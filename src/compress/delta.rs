//! State Delta: minimal patch between two compressed states, used to avoid
//! writing a full snapshot on every checkpoint.
//!
//! No direct teacher analogue (the teacher always writes full checkpoints);
//! grounded on the same "before/after diff" shape
//! `graphweave::memory::checkpoint`'s `updated_channels` bookkeeping uses to
//! track which channels a step touched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::State;

/// A patch between a prior and new compressed state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateDelta {
    pub added: HashMap<String, Value>,
    pub removed: Vec<String>,
    pub changed: HashMap<String, Value>,
    pub savings_percent: f64,
}

/// Computes the minimal patch from `prior` to `new_state`, both assumed
/// already compressed, plus an estimated storage-savings percentage versus
/// writing `new_state` in full.
pub fn compute_delta(prior: &State, new_state: &State) -> StateDelta {
    let mut added = HashMap::new();
    let mut removed = Vec::new();
    let mut changed = HashMap::new();

    for (key, value) in new_state.iter() {
        match prior.get(key) {
            None => {
                added.insert(key.clone(), value.clone());
            }
            Some(prior_value) if prior_value != value => {
                changed.insert(key.clone(), value.clone());
            }
            _ => {}
        }
    }
    for key in prior.keys() {
        if !new_state.contains_key(key) {
            removed.push(key.clone());
        }
    }
    removed.sort();

    let full_size = serde_json::to_vec(&new_state.clone().into_fields())
        .map(|b| b.len())
        .unwrap_or(0);
    let delta_size = serde_json::to_vec(&(&added, &removed, &changed))
        .map(|b| b.len())
        .unwrap_or(0);
    let savings_percent = if full_size == 0 {
        0.0
    } else {
        ((full_size.saturating_sub(delta_size)) as f64 / full_size as f64) * 100.0
    };

    StateDelta {
        added,
        removed,
        changed,
        savings_percent,
    }
}

/// Reconstructs the full state by applying `delta` to `base` — the most
/// recent non-delta checkpoint of the same thread. Per design decision,
/// reconstruction always requires a base checkpoint; a delta alone is never
/// sufficient (see DESIGN.md open-question (b)).
pub fn apply_delta(base: &State, delta: &StateDelta) -> State {
    let mut result = base.clone();
    for key in &delta.removed {
        result.remove(key);
    }
    for (key, value) in &delta.added {
        result.insert(key.clone(), value.clone());
    }
    for (key, value) in &delta.changed {
        result.insert(key.clone(), value.clone());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_captures_added_removed_changed() {
        let mut prior = State::new();
        prior.insert("route_data".into(), serde_json::json!({"distance_nm": 100}));
        prior.insert("stale_field".into(), serde_json::json!(true));

        let mut new_state = State::new();
        new_state.insert("route_data".into(), serde_json::json!({"distance_nm": 200}));
        new_state.insert("bunker_analysis".into(), serde_json::json!({"best_option": "X"}));

        let delta = compute_delta(&prior, &new_state);
        assert!(delta.added.contains_key("bunker_analysis"));
        assert!(delta.changed.contains_key("route_data"));
        assert!(delta.removed.contains(&"stale_field".to_string()));
    }

    #[test]
    fn apply_delta_reconstructs_new_state_from_base() {
        let mut base = State::new();
        base.insert("route_data".into(), serde_json::json!({"distance_nm": 100}));
        base.insert("stale_field".into(), serde_json::json!(true));

        let mut new_state = State::new();
        new_state.insert("route_data".into(), serde_json::json!({"distance_nm": 200}));
        new_state.insert("bunker_analysis".into(), serde_json::json!({"best_option": "X"}));

        let delta = compute_delta(&base, &new_state);
        let reconstructed = apply_delta(&base, &delta);
        assert_eq!(reconstructed, new_state);
    }
}
