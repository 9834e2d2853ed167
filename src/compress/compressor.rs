//! State Compressor: replaces oversized `referenceable` fields with a
//! reference string, deterministically and without any LLM call.
//!
//! Generalizes `loom::compress::compact_node::CompactNode` /
//! `graphweave::compress::compaction`'s "rewrite the conversation history
//! when it's too big" idea from "compact messages via LLM" to "replace any
//! oversized referenceable field with a Reference Store pointer" — a pure,
//! deterministic transform, using `loom::compress::config::CompactionConfig`
//! as the shape for this module's threshold config.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::schema::StateSchema;
use crate::state::State;
use crate::store::{create_reference, extract_reference_id, is_reference, ReferenceStore};

/// Threshold configuration, the same shape as `CompactionConfig`'s
/// size-trigger fields, scoped to this crate's single trigger (inline size).
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub inline_size_threshold_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            inline_size_threshold_bytes: 4096,
        }
    }
}

/// Stats returned alongside a compressed state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_size: usize,
    pub compressed_size: usize,
    pub saved_bytes: usize,
    pub references_created: usize,
    pub fields_referenced: Vec<String>,
}

/// Fields whose reference payloads were absent or expired on decompress.
#[derive(Debug, Clone, Default)]
pub struct DecompressionReport {
    pub missing_references: Vec<String>,
}

pub struct Compressor {
    store: Arc<dyn ReferenceStore>,
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(store: Arc<dyn ReferenceStore>, config: CompressionConfig) -> Self {
        Self { store, config }
    }

    /// Walks the top-level fields tagged `referenceable` in `schema`; any
    /// whose serialized size exceeds the inline threshold is moved to the
    /// Reference Store and replaced in place by its reference string.
    pub async fn compress(&self, state: &State, schema: &StateSchema) -> (State, CompressionStats) {
        let original_size = serialized_size(state);
        let mut compressed = state.clone();
        let mut fields_referenced = Vec::new();

        let referenceable_fields: Vec<String> = schema
            .fields
            .iter()
            .filter(|f| f.is_referenceable())
            .map(|f| f.name.clone())
            .collect();

        for field_name in &referenceable_fields {
            let Some(value) = compressed.get(field_name).cloned() else {
                continue;
            };
            if is_reference(value.as_str().unwrap_or("")) {
                continue;
            }
            let size = serde_json::to_vec(&value).map(|b| b.len()).unwrap_or(0);
            if size <= self.config.inline_size_threshold_bytes {
                continue;
            }
            match self.store.store(field_name, &value, None).await {
                Ok(reference_id) => {
                    compressed.insert(field_name.clone(), Value::String(create_reference(&reference_id)));
                    fields_referenced.push(field_name.clone());
                }
                Err(e) => {
                    tracing::warn!(field = %field_name, error = %e, "compression failed, storing field uncompressed");
                }
            }
        }

        let compressed_size = serialized_size(&compressed);
        let stats = CompressionStats {
            original_size,
            compressed_size,
            saved_bytes: original_size.saturating_sub(compressed_size),
            references_created: fields_referenced.len(),
            fields_referenced,
        };
        (compressed, stats)
    }

    /// Walks the same fields and resolves any `ref:<id>` string to its
    /// stored value. Missing references are reported but do not abort —
    /// the field is left as the reference string.
    pub async fn decompress(&self, state: &State) -> (State, DecompressionReport) {
        let mut decompressed = state.clone();
        let mut missing_references = Vec::new();

        let keys: Vec<String> = decompressed.keys().cloned().collect();
        for key in keys {
            let Some(Value::String(s)) = decompressed.get(&key) else {
                continue;
            };
            let Some(reference_id) = extract_reference_id(s) else {
                continue;
            };
            match self.store.retrieve(reference_id).await {
                Some(value) => {
                    decompressed.insert(key.clone(), value);
                }
                None => {
                    missing_references.push(key.clone());
                }
            }
        }

        (decompressed, DecompressionReport { missing_references })
    }
}

fn serialized_size(state: &State) -> usize {
    serde_json::to_vec(&state.clone().into_fields()).map(|b| b.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::schema::{FieldSpec, FieldTag, FieldType};
    use crate::store::InMemoryReferenceStore;
    use std::time::Duration;

    fn schema() -> StateSchema {
        StateSchema::new(
            "2.0.0",
            vec![FieldSpec {
                name: "route_data".into(),
                field_type: FieldType::Object,
                required: false,
                max_size_bytes: None,
                tags: vec![FieldTag::Referenceable],
            }],
        )
    }

    #[tokio::test]
    async fn small_field_stays_inline() {
        let store = Arc::new(InMemoryReferenceStore::new(Duration::from_secs(60)));
        let compressor = Compressor::new(store, CompressionConfig {
            inline_size_threshold_bytes: 4096,
        });
        let mut state = State::new();
        state.insert("route_data".into(), serde_json::json!({"distance_nm": 100}));
        let (compressed, stats) = compressor.compress(&state, &schema()).await;
        assert_eq!(stats.references_created, 0);
        assert_eq!(compressed.get("route_data"), state.get("route_data"));
    }

    #[tokio::test]
    async fn oversize_field_is_referenced_and_round_trips() {
        let store = Arc::new(InMemoryReferenceStore::new(Duration::from_secs(60)));
        let compressor = Compressor::new(store, CompressionConfig {
            inline_size_threshold_bytes: 16,
        });
        let mut state = State::new();
        let big_blob = "x".repeat(500);
        state.insert("route_data".into(), serde_json::json!({"blob": big_blob}));

        let (compressed, stats) = compressor.compress(&state, &schema()).await;
        assert_eq!(stats.references_created, 1);
        let ref_string = compressed.get("route_data").unwrap().as_str().unwrap();
        assert!(is_reference(ref_string));

        let (decompressed, report) = compressor.decompress(&compressed).await;
        assert!(report.missing_references.is_empty());
        assert_eq!(decompressed.get("route_data"), state.get("route_data"));
    }

    #[tokio::test]
    async fn missing_reference_is_reported_not_fatal() {
        let store = Arc::new(InMemoryReferenceStore::new(Duration::from_secs(60)));
        let compressor = Compressor::new(store, CompressionConfig::default());
        let mut state = State::new();
        state.insert("route_data".into(), serde_json::json!(create_reference("never-stored")));
        let (decompressed, report) = compressor.decompress(&state).await;
        assert_eq!(report.missing_references, vec!["route_data".to_string()]);
        assert_eq!(
            decompressed.get("route_data").unwrap().as_str().unwrap(),
            "ref:never-stored"
        );
    }
}
