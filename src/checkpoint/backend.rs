//! Concrete checkpoint backends, grounded on
//! `loom::memory::{memory_saver, sqlite_saver}` and the abstract contract in
//! `loom::memory::checkpointer::Checkpointer<S>`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::checkpoint::types::{Checkpoint, CheckpointListItem, CheckpointTuple, RunnableConfig};
use crate::error::CheckpointError;

/// The abstract contract every checkpoint backend implements: thread-scoped
/// save/load with a lazy, newest-first `list`.
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    async fn get(&self, config: &RunnableConfig) -> Result<Option<Checkpoint>, CheckpointError>;
    async fn get_tuple(&self, config: &RunnableConfig) -> Result<Option<CheckpointTuple>, CheckpointError>;
    async fn list(&self, config: &RunnableConfig, limit: usize) -> Result<Vec<CheckpointListItem>, CheckpointError>;
    async fn put(&self, config: &RunnableConfig, checkpoint: Checkpoint) -> Result<(), CheckpointError>;
    async fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError>;
}

/// In-memory backend: the default when no durable KV is configured, and the
/// degraded-mode fallback when durable setup fails.
pub struct MemorySaver {
    threads: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl Default for MemorySaver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySaver {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CheckpointBackend for MemorySaver {
    async fn get(&self, config: &RunnableConfig) -> Result<Option<Checkpoint>, CheckpointError> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        let threads = self.threads.lock().unwrap();
        let Some(checkpoints) = threads.get(&config.thread_id) else {
            return Ok(None);
        };
        let found = match &config.checkpoint_id {
            Some(id) => checkpoints.iter().rev().find(|c| &c.checkpoint_id == id).cloned(),
            None => checkpoints.last().cloned(),
        };
        Ok(found)
    }

    async fn get_tuple(&self, config: &RunnableConfig) -> Result<Option<CheckpointTuple>, CheckpointError> {
        Ok(self.get(config).await?.map(|checkpoint| CheckpointTuple {
            config: RunnableConfig {
                thread_id: config.thread_id.clone(),
                checkpoint_ns: config.checkpoint_ns.clone(),
                checkpoint_id: Some(checkpoint.checkpoint_id.clone()),
            },
            checkpoint,
        }))
    }

    async fn list(&self, config: &RunnableConfig, limit: usize) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        let threads = self.threads.lock().unwrap();
        let Some(checkpoints) = threads.get(&config.thread_id) else {
            return Ok(Vec::new());
        };
        let items = checkpoints
            .iter()
            .rev()
            .take(limit)
            .map(|c| CheckpointListItem {
                checkpoint_id: c.checkpoint_id.clone(),
                saved_at: c.saved_at,
                size_bytes: c.size_bytes,
                is_delta: c.is_delta,
            })
            .collect();
        Ok(items)
    }

    async fn put(&self, config: &RunnableConfig, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        let mut threads = self.threads.lock().unwrap();
        threads.entry(config.thread_id.clone()).or_default().push(checkpoint);
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let mut threads = self.threads.lock().unwrap();
        threads.remove(thread_id);
        Ok(())
    }
}

/// Durable backend selected by the factory when a durable KV URL is
/// configured. Schema mirrors `loom::memory::sqlite_saver::SqliteSaver`'s
/// `checkpoints` table, addressed by `(thread_id, checkpoint_ns,
/// checkpoint_id)` instead of channel-versioned rows, since this crate's
/// `Checkpoint` record is a single JSON blob rather than per-channel rows.
pub struct SqliteSaver {
    conn: Mutex<Connection>,
}

impl SqliteSaver {
    pub fn open(path: &str) -> Result<Self, CheckpointError> {
        let conn = Connection::open(path).map_err(|e| CheckpointError::Storage(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                checkpoint_ns TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                payload BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id)
            )",
            [],
        )
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl CheckpointBackend for SqliteSaver {
    async fn get(&self, config: &RunnableConfig) -> Result<Option<Checkpoint>, CheckpointError> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        let conn = self.conn.lock().unwrap();
        let payload: rusqlite::Result<Vec<u8>> = match &config.checkpoint_id {
            Some(id) => conn.query_row(
                "SELECT payload FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3",
                params![config.thread_id, config.checkpoint_ns, id],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT payload FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2
                 ORDER BY saved_at DESC LIMIT 1",
                params![config.thread_id, config.checkpoint_ns],
                |row| row.get(0),
            ),
        };
        match payload {
            Ok(bytes) => {
                let checkpoint: Checkpoint =
                    serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
                Ok(Some(checkpoint))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CheckpointError::Storage(e.to_string())),
        }
    }

    async fn get_tuple(&self, config: &RunnableConfig) -> Result<Option<CheckpointTuple>, CheckpointError> {
        Ok(self.get(config).await?.map(|checkpoint| CheckpointTuple {
            config: RunnableConfig {
                thread_id: config.thread_id.clone(),
                checkpoint_ns: config.checkpoint_ns.clone(),
                checkpoint_id: Some(checkpoint.checkpoint_id.clone()),
            },
            checkpoint,
        }))
    }

    async fn list(&self, config: &RunnableConfig, limit: usize) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT checkpoint_id, saved_at, size_bytes FROM checkpoints
                 WHERE thread_id = ?1 AND checkpoint_ns = ?2 ORDER BY saved_at DESC LIMIT ?3",
            )
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![config.thread_id, config.checkpoint_ns, limit as i64], |row| {
                let saved_at: String = row.get(1)?;
                Ok(CheckpointListItem {
                    checkpoint_id: row.get(0)?,
                    saved_at: parse_saved_at(&saved_at),
                    size_bytes: row.get::<_, i64>(2)? as usize,
                    is_delta: false,
                })
            })
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.map_err(|e| CheckpointError::Storage(e.to_string()))?);
        }
        Ok(items)
    }

    async fn put(&self, config: &RunnableConfig, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        let payload = serde_json::to_vec(&checkpoint).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let saved_at = chrono::DateTime::<chrono::Utc>::from(checkpoint.saved_at).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints (thread_id, checkpoint_ns, checkpoint_id, saved_at, payload, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                config.thread_id,
                config.checkpoint_ns,
                checkpoint.checkpoint_id,
                saved_at,
                payload,
                checkpoint.size_bytes as i64,
            ],
        )
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn parse_saved_at(s: &str) -> SystemTime {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc).into())
        .unwrap_or_else(|_| SystemTime::now())
}
