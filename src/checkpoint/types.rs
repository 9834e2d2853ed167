//! Checkpoint record shapes, grounded on
//! `loom::memory::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource}`
//! and `loom::memory::config::RunnableConfig`'s `{thread_id, checkpoint_ns,
//! checkpoint_id}` addressing key, trimmed to the fields spec.md's data
//! model actually names.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::compress::StateDelta;
use crate::state::State;

/// `{thread_id, checkpoint_ns, checkpoint_id}` addressing key. `checkpoint_id`
/// is `None` to mean "the latest checkpoint for this thread".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnableConfig {
    pub thread_id: String,
    pub checkpoint_ns: String,
    pub checkpoint_id: Option<String>,
}

impl RunnableConfig {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
        }
    }
}

/// How a checkpoint came to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointSource {
    Input,
    Loop,
    Update,
    Fork,
}

impl Default for CheckpointSource {
    fn default() -> Self {
        CheckpointSource::Input
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    pub step: u64,
    pub created_at: SystemTime,
    pub parents: HashMap<String, String>,
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self {
            source: CheckpointSource::Input,
            step: 0,
            created_at: SystemTime::now(),
            parents: HashMap::new(),
        }
    }
}

/// A persisted snapshot of state at a thread boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub checkpoint_id: String,
    pub channel_values: State,
    pub metadata: CheckpointMetadata,
    pub schema_version: String,
    pub is_delta: bool,
    pub delta: Option<StateDelta>,
    pub size_bytes: usize,
    pub saved_at: SystemTime,
}

/// `(config, checkpoint)` pair returned by `get_tuple`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTuple {
    pub config: RunnableConfig,
    pub checkpoint: Checkpoint,
}

/// A lightweight entry returned by `list`, newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointListItem {
    pub checkpoint_id: String,
    pub saved_at: SystemTime,
    pub size_bytes: usize,
    pub is_delta: bool,
}
