//! The Checkpointer wrapper: retry, compression, delta, migration, and
//! validation wired around a concrete `CheckpointBackend`.
//!
//! No single teacher file provides this combination; it is grounded on the
//! *combination* of `loom::graph::retry::RetryPolicy` (retry/backoff) with
//! this crate's own State Compressor, State Delta, and Migrator modules, per
//! spec.md §4.6's per-`put`/`get` step list. Per DESIGN.md's open-question
//! decision, compression is part of this single wrapper contract rather
//! than a second co-existing wrapper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::checkpoint::backend::{CheckpointBackend, MemorySaver, SqliteSaver};
use crate::checkpoint::types::{Checkpoint, CheckpointListItem, CheckpointMetadata, RunnableConfig};
use crate::compress::{compute_delta, Compressor};
use crate::config::OrchestratorConfig;
use crate::error::CheckpointError;
use crate::state::migrator::Migrator;
use crate::state::schema::StateSchema;
use crate::state::State;

/// Rolling metrics the wrapper maintains across all `put`/`get` calls.
#[derive(Default)]
pub struct CheckpointMetrics {
    pub put_failures: AtomicU64,
    pub last_save_duration_ms: AtomicU64,
    pub last_save_size_bytes: AtomicU64,
}

impl CheckpointMetrics {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.put_failures.load(Ordering::Relaxed),
            self.last_save_duration_ms.load(Ordering::Relaxed),
            self.last_save_size_bytes.load(Ordering::Relaxed),
        )
    }
}

/// Selects a concrete backend: a durable KV if `checkpoint_backend_url` is
/// configured and opens successfully, otherwise falls back to in-memory per
/// spec.md §4.6's factory rule and §7's "persistence failures degrade to
/// in-memory" recovery rule.
pub fn select_backend(config: &OrchestratorConfig) -> Arc<dyn CheckpointBackend> {
    if let Some(url) = &config.checkpoint_backend_url {
        match SqliteSaver::open(url) {
            Ok(backend) => return Arc::new(backend),
            Err(e) => {
                tracing::warn!(error = %e, "durable checkpoint backend unavailable, falling back to in-memory");
            }
        }
    }
    Arc::new(MemorySaver::new())
}

pub struct Checkpointer {
    backend: Arc<dyn CheckpointBackend>,
    compressor: Compressor,
    schema: StateSchema,
    migrator: Migrator,
    config: OrchestratorConfig,
    metrics: CheckpointMetrics,
}

impl Checkpointer {
    pub fn new(
        backend: Arc<dyn CheckpointBackend>,
        compressor: Compressor,
        schema: StateSchema,
        migrator: Migrator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            compressor,
            schema,
            migrator,
            config,
            metrics: CheckpointMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &CheckpointMetrics {
        &self.metrics
    }

    /// Step 1 (prepare) + step 2 (retry) + step 3 (metrics) of spec.md
    /// §4.6's `put` wrapper.
    pub async fn put(
        &self,
        config: &RunnableConfig,
        mut state: State,
        prior_compressed: Option<&State>,
        metadata: CheckpointMetadata,
    ) -> Result<(), CheckpointError> {
        let start = SystemTime::now();

        let validation = self.schema.validate(&state);
        if !validation.valid {
            tracing::warn!(errors = ?validation.errors, "state failed schema validation before checkpoint; storing as-is");
        }

        state.set_schema_version(&self.migrator_current_version());
        let (compressed, stats) = self.compressor.compress(&state, &self.schema).await;

        let (is_delta, delta) = match prior_compressed {
            Some(prior) => {
                let computed = compute_delta(prior, &compressed);
                let use_delta = computed.savings_percent >= self.config.delta_savings_threshold_percent;
                if use_delta {
                    (true, Some(computed))
                } else {
                    (false, None)
                }
            }
            None => (false, None),
        };

        let size_bytes = if is_delta {
            serde_json::to_vec(&delta).map(|b| b.len()).unwrap_or(stats.compressed_size)
        } else {
            stats.compressed_size
        };

        let checkpoint = Checkpoint {
            thread_id: config.thread_id.clone(),
            checkpoint_id: Uuid::new_v4().to_string(),
            channel_values: if is_delta { State::new() } else { compressed },
            metadata,
            schema_version: self.migrator_current_version(),
            is_delta,
            delta,
            size_bytes,
            saved_at: start,
        };

        let mut last_error = None;
        for attempt in 0..self.config.max_checkpoint_attempts {
            match self.backend.put(config, checkpoint.clone()).await {
                Ok(()) => {
                    let duration_ms = start.elapsed().unwrap_or_default().as_millis() as u64;
                    self.metrics.last_save_duration_ms.store(duration_ms, Ordering::Relaxed);
                    self.metrics.last_save_size_bytes.store(size_bytes as u64, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "checkpoint put attempt failed");
                    last_error = Some(e);
                    tokio::time::sleep(self.config.retry_backoff * attempt.max(1)).await;
                }
            }
        }

        self.metrics.put_failures.fetch_add(1, Ordering::Relaxed);
        Err(CheckpointError::CheckpointPutFailed(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".into()),
        ))
    }

    /// Steps 1-4 of spec.md §4.6's `get`/`get_tuple` wrapper: apply delta
    /// (requires `base`, the most recent non-delta checkpoint of the same
    /// thread), decompress, migrate, validate (warnings only).
    pub async fn get(&self, config: &RunnableConfig, base: Option<&Checkpoint>) -> Result<Option<State>, CheckpointError> {
        let Some(checkpoint) = self.backend.get(config).await? else {
            return Ok(None);
        };

        if self.is_expired(&checkpoint) {
            return Ok(None);
        }

        let raw_state = if checkpoint.is_delta {
            let Some(delta) = &checkpoint.delta else {
                return Err(CheckpointError::Storage("delta flagged but no delta payload present".into()));
            };
            let Some(base_checkpoint) = base else {
                return Err(CheckpointError::CheckpointReadFailed(
                    "delta checkpoint requires a base checkpoint to reconstruct".into(),
                ));
            };
            crate::compress::apply_delta(&base_checkpoint.channel_values, delta)
        } else {
            checkpoint.channel_values.clone()
        };

        let (decompressed, report) = self.compressor.decompress(&raw_state).await;
        if !report.missing_references.is_empty() {
            tracing::warn!(fields = ?report.missing_references, "references missing on checkpoint read");
        }

        let migration = self.migrator.auto_migrate(decompressed, &self.schema);
        if !migration.validation.valid {
            tracing::warn!(errors = ?migration.validation.errors, "checkpoint failed validation on read");
        }

        Ok(Some(migration.migrated_state))
    }

    pub async fn list(&self, config: &RunnableConfig, limit: usize) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        self.backend.list(config, limit).await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError> {
        self.backend.delete_thread(thread_id).await
    }

    fn is_expired(&self, checkpoint: &Checkpoint) -> bool {
        checkpoint
            .saved_at
            .elapsed()
            .map(|elapsed| elapsed > self.config.checkpoint_ttl)
            .unwrap_or(false)
    }

    fn migrator_current_version(&self) -> String {
        crate::state::CURRENT_SCHEMA_VERSION.to_string()
    }
}
