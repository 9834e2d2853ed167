//! State Migrator: ordered linear version-to-version migration steps plus
//! version auto-detection. The "ordered list of linear version steps" shape
//! spec.md calls for — no branching migration graph.

use crate::state::schema::{StateSchema, ValidationResult};
use crate::state::{fields, State};

/// One `(from, to)` migration step.
pub struct MigrationStep {
    pub from: String,
    pub to: String,
    pub migrate: fn(State) -> State,
}

/// Result of `Migrator::auto_migrate`.
#[derive(Debug)]
pub struct MigrationResult {
    pub migrated_state: State,
    pub from_version: String,
    pub to_version: String,
    pub changes: Vec<String>,
    pub validation: ValidationResult,
}

/// Sentinel fields used to detect version when `_schema_version` is absent,
/// in descending order of how recent the version they imply is.
const VERSION_SENTINELS: &[(&str, &str)] = &[("bunker_analysis", "1.0.0")];

pub struct Migrator {
    steps: Vec<MigrationStep>,
    current_version: String,
}

impl Migrator {
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            current_version: current_version.into(),
        }
    }

    pub fn with_step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Detects the state's version from an explicit `_schema_version` field,
    /// else from presence of sentinel fields, else assumes the oldest known
    /// version (the first step's `from`).
    pub fn detect_version(&self, state: &State) -> String {
        if let Some(v) = state.schema_version() {
            return v.to_string();
        }
        for (sentinel_field, version) in VERSION_SENTINELS {
            if state.contains_key(*sentinel_field) {
                return version.to_string();
            }
        }
        self.steps
            .first()
            .map(|s| s.from.clone())
            .unwrap_or_else(|| self.current_version.clone())
    }

    /// Applies migrations in sequence from the detected version to the
    /// current version. No-op (but still stamps `_schema_version`) when the
    /// state is already current.
    pub fn auto_migrate(&self, state: State, schema: &StateSchema) -> MigrationResult {
        let from_version = self.detect_version(&state);
        let mut current = state;
        let mut changes = Vec::new();

        if from_version == self.current_version {
            current.set_schema_version(&self.current_version);
            let validation = schema.validate(&current);
            return MigrationResult {
                migrated_state: current,
                from_version: from_version.clone(),
                to_version: self.current_version.clone(),
                changes,
                validation,
            };
        }

        let mut version_cursor = from_version.clone();
        loop {
            let Some(step) = self.steps.iter().find(|s| s.from == version_cursor) else {
                break;
            };
            current = (step.migrate)(current);
            changes.push(format!("{} -> {}", step.from, step.to));
            version_cursor = step.to.clone();
            if version_cursor == self.current_version {
                break;
            }
        }

        current.set_schema_version(&self.current_version);
        let validation = schema.validate(&current);
        MigrationResult {
            migrated_state: current,
            from_version,
            to_version: self.current_version.clone(),
            changes,
            validation,
        }
    }
}

/// Example migration: a 1.0.0 state had no `reasoning_history` field; 2.0.0
/// introduces it, defaulted to empty.
pub fn migrate_1_0_0_to_2_0_0(mut state: State) -> State {
    if !state.contains_key(fields::REASONING_HISTORY) {
        state.insert(fields::REASONING_HISTORY.to_string(), serde_json::json!([]));
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::schema::StateSchema;

    fn migrator() -> Migrator {
        Migrator::new("2.0.0").with_step(MigrationStep {
            from: "1.0.0".into(),
            to: "2.0.0".into(),
            migrate: migrate_1_0_0_to_2_0_0,
        })
    }

    #[test]
    fn auto_migrate_is_noop_on_current_version() {
        let m = migrator();
        let schema = StateSchema::new("2.0.0", vec![]);
        let state = State::new();
        let result = m.auto_migrate(state, &schema);
        assert_eq!(result.from_version, "2.0.0");
        assert!(result.changes.is_empty());
    }

    #[test]
    fn auto_migrate_detects_version_from_sentinel_and_applies_step() {
        let m = migrator();
        let schema = StateSchema::new("2.0.0", vec![]);
        let mut state = State::from_fields(Default::default());
        state.insert("bunker_analysis".into(), serde_json::json!({}));
        let result = m.auto_migrate(state, &schema);
        assert_eq!(result.from_version, "1.0.0");
        assert_eq!(result.to_version, "2.0.0");
        assert_eq!(result.changes, vec!["1.0.0 -> 2.0.0".to_string()]);
        assert!(result.migrated_state.contains_key("reasoning_history"));
    }

    #[test]
    fn migration_is_idempotent_when_reapplied_at_target_version() {
        let m = migrator();
        let schema = StateSchema::new("2.0.0", vec![]);
        let mut state = State::from_fields(Default::default());
        state.insert("bunker_analysis".into(), serde_json::json!({}));
        let once = m.auto_migrate(state, &schema).migrated_state;
        let twice = m.auto_migrate(once.clone(), &schema).migrated_state;
        assert_eq!(once, twice);
    }
}
