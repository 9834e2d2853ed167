//! State Schema & Validator: versioned field shape, per-field type/size
//! checks. Grounded on the same "declarative field list + validate()"
//! shape as the Tool/Agent registries' declarative records, applied to
//! state instead of capability metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::State;

/// The primitive/object type a field is declared to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Any => "any",
        }
    }
}

/// Semantic tag on a field: `referenceable` fields are eligible for
/// compression by the State Compressor; `sensitive` fields are excluded
/// from synthesis projections and logs (convention enforced by callers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldTag {
    Referenceable,
    Sensitive,
}

/// One declared field of the state schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub max_size_bytes: Option<usize>,
    pub tags: Vec<FieldTag>,
}

impl FieldSpec {
    pub fn is_referenceable(&self) -> bool {
        self.tags.contains(&FieldTag::Referenceable)
    }
}

/// The versioned state shape.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    pub version: String,
    pub fields: Vec<FieldSpec>,
}

/// Result of `StateSchema::validate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StateSchema {
    pub fn new(version: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            version: version.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validates `state` against this schema: missing required fields,
    /// type mismatches, and oversize payloads are errors; unknown fields
    /// present in state but not declared in the schema are warnings.
    pub fn validate(&self, state: &State) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for spec in &self.fields {
            match state.get(&spec.name) {
                None => {
                    if spec.required {
                        errors.push(format!("Missing required field {}", spec.name));
                    }
                }
                Some(value) => {
                    if !spec.field_type.matches(value) {
                        errors.push(format!(
                            "Invalid type for {}: expected {}",
                            spec.name,
                            spec.field_type.name()
                        ));
                    }
                    if let Some(max) = spec.max_size_bytes {
                        let size = serde_json::to_vec(value).map(|b| b.len()).unwrap_or(0);
                        if size > max {
                            errors.push(format!("{} exceeds max size {}", spec.name, max));
                        }
                    }
                }
            }
        }

        let declared: std::collections::HashSet<&str> =
            self.fields.iter().map(|f| f.name.as_str()).collect();
        for key in state.keys() {
            if key == crate::state::fields::SCHEMA_VERSION {
                continue;
            }
            if !declared.contains(key.as_str()) {
                warnings.push(format!("Undeclared field present in state: {key}"));
            }
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}
