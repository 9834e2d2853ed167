//! Reference Store: content-addressed object store for large sub-values,
//! with TTL eviction and dedup-by-hash.
//!
//! Grounded on `graphweave::memory::store`'s TTL-entry shape, generalized
//! from conversation-memory entries to arbitrary referenceable state
//! fields, and keyed by `sha2::Sha256` digest rather than a caller-supplied
//! id — `loom`'s checkpointer keys by UUID6, not content, so content
//! hashing is new here (the same crate `dashflow`'s workspace already
//! reaches for).

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CompressionError;

pub const REFERENCE_PREFIX: &str = "ref:";

/// A stored reference entry. `ref_count` is logical (bumped on a dedup hit)
/// and does not gate eviction — TTL alone governs lifetime.
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub reference_id: String,
    pub serialized_bytes: Vec<u8>,
    pub ttl_deadline: SystemTime,
    pub ref_count: u64,
    pub metadata: Option<Value>,
}

/// Pluggable backend for the Reference Store.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn store(&self, kind: &str, value: &Value, metadata: Option<Value>) -> Result<String, CompressionError>;
    async fn retrieve(&self, reference_id: &str) -> Option<Value>;
    async fn delete_expired(&self) -> usize;
}

fn content_hash(kind: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b":");
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `"ref:<id>"` wrapper, consumed by the State Compressor in place of an
/// oversized field's value.
pub fn create_reference(id: &str) -> String {
    format!("{REFERENCE_PREFIX}{id}")
}

pub fn is_reference(s: &str) -> bool {
    s.starts_with(REFERENCE_PREFIX)
}

pub fn extract_reference_id(s: &str) -> Option<&str> {
    s.strip_prefix(REFERENCE_PREFIX)
}

/// Default in-process backend. A `SqliteReferenceStore` (mirroring
/// `loom::memory::sqlite_store::SqliteStore`) can implement the same trait
/// for durable deployments without changing callers.
pub struct InMemoryReferenceStore {
    entries: DashMap<String, ReferenceEntry>,
    default_ttl: Duration,
}

impl InMemoryReferenceStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    async fn store(&self, kind: &str, value: &Value, metadata: Option<Value>) -> Result<String, CompressionError> {
        let serialized = serde_json::to_vec(value)
            .map_err(|e| CompressionError::CompressionFailed(e.to_string()))?;
        let reference_id = content_hash(kind, &serialized);

        if let Some(mut existing) = self.entries.get_mut(&reference_id) {
            existing.ref_count += 1;
            existing.ttl_deadline = SystemTime::now() + self.default_ttl;
            return Ok(reference_id);
        }

        self.entries.insert(
            reference_id.clone(),
            ReferenceEntry {
                reference_id: reference_id.clone(),
                serialized_bytes: serialized,
                ttl_deadline: SystemTime::now() + self.default_ttl,
                ref_count: 1,
                metadata,
            },
        );
        tracing::debug!(reference_id = %reference_id, kind, "reference stored");
        Ok(reference_id)
    }

    async fn retrieve(&self, reference_id: &str) -> Option<Value> {
        let entry = self.entries.get(reference_id)?;
        if entry.ttl_deadline < SystemTime::now() {
            drop(entry);
            self.entries.remove(reference_id);
            return None;
        }
        serde_json::from_slice(&entry.serialized_bytes).ok()
    }

    async fn delete_expired(&self) -> usize {
        let now = SystemTime::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.ttl_deadline < now)
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.entries.remove(id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_retrieve_roundtrip() {
        let store = InMemoryReferenceStore::new(Duration::from_secs(60));
        let value = serde_json::json!({"distance_nm": 8300});
        let id = store.store("route_data", &value, None).await.unwrap();
        let retrieved = store.retrieve(&id).await.unwrap();
        assert_eq!(retrieved, value);
    }

    #[tokio::test]
    async fn storing_equal_values_dedups_to_same_id() {
        let store = InMemoryReferenceStore::new(Duration::from_secs(60));
        let value = serde_json::json!({"distance_nm": 8300});
        let id1 = store.store("route_data", &value, None).await.unwrap();
        let id2 = store.store("route_data", &value, None).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn expired_reference_returns_none_on_retrieve() {
        let store = InMemoryReferenceStore::new(Duration::from_millis(10));
        let value = serde_json::json!({"x": 1});
        let id = store.store("x", &value, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.retrieve(&id).await.is_none());
    }

    #[test]
    fn reference_string_helpers_roundtrip() {
        let s = create_reference("abc123");
        assert!(is_reference(&s));
        assert_eq!(extract_reference_id(&s), Some("abc123"));
        assert!(!is_reference("abc123"));
    }
}
