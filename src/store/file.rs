use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::models::{PartialStateUpdate, SessionState, SCHEMA_VERSION};

use super::{CheckpointMeta, CheckpointStore};

/// On-disk representation of a session's checkpoint chain. Grounded in
/// `orchestration_state.rs::save`/`load`: atomic write-temp-then-rename, a
/// `schema_version` field, and a `migrate` seam for future field changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    schema_version: u32,
    state: SessionState,
    next_nodes: HashSet<String>,
    history: Vec<CheckpointMeta>,
}

impl PersistedSession {
    fn migrate(self) -> Result<Self, StoreError> {
        // Only version 1 has ever existed; this is the seam a future field
        // addition would hook into, matching the teacher's stubbed migrate().
        if self.schema_version != SCHEMA_VERSION {
            tracing::warn!(
                "session schema version mismatch: {} vs {}; starting fresh is not attempted for file-backed sessions",
                self.schema_version,
                SCHEMA_VERSION
            );
        }
        Ok(self)
    }
}

/// File-backed checkpoint store: one JSON file per session under `root_dir`,
/// written atomically (temp file + rename). A process-local `RwLock` around
/// the directory path guards read-modify-write races within this process;
/// cross-process safety is the filesystem rename's job, same as the
/// teacher's single-process CLI usage.
pub struct FileCheckpointStore {
    root_dir: PathBuf,
    // Guards the read-modify-write cycle of `update` against concurrent
    // callers in this process; the teacher's equivalent is its SessionRegistry
    // mutex rather than a file lock, since it too assumes single-process use.
    write_lock: RwLock<()>,
}

impl FileCheckpointStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: RwLock::new(()),
        }
    }

    fn session_path(&self, task_id: &str) -> PathBuf {
        self.root_dir.join(format!("{task_id}.json"))
    }

    fn read(&self, task_id: &str) -> Result<PersistedSession, StoreError> {
        let path = self.session_path(task_id);
        if !path.exists() {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        let json = std::fs::read_to_string(&path)?;
        let persisted: PersistedSession = serde_json::from_str(&json)?;
        persisted.migrate()
    }

    fn write(&self, task_id: &str, persisted: &PersistedSession) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root_dir)?;
        let path = self.session_path(task_id);
        let tmp = self.root_dir.join(format!(".{task_id}.json.tmp"));
        let json = serde_json::to_string_pretty(persisted)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn create(&self, state: SessionState) -> Result<(), StoreError> {
        let _guard = self.write_lock.write().unwrap();
        let task_id = state.task_id.clone();
        if self.session_path(&task_id).exists() {
            return Ok(()); // idempotent: an existing session is left untouched
        }
        let persisted = PersistedSession {
            schema_version: SCHEMA_VERSION,
            state,
            next_nodes: HashSet::new(),
            history: vec![CheckpointMeta {
                checkpoint_id: uuid::Uuid::new_v4().to_string(),
                task_id,
                produced_by: None,
                created_at: Utc::now(),
            }],
        };
        self.write(&persisted.state.task_id.clone(), &persisted)
    }

    async fn get(&self, task_id: &str) -> Result<SessionState, StoreError> {
        let _guard = self.write_lock.read().unwrap();
        Ok(self.read(task_id)?.state)
    }

    async fn update(
        &self,
        task_id: &str,
        partial: PartialStateUpdate,
        as_node: Option<&str>,
    ) -> Result<String, StoreError> {
        let _guard = self.write_lock.write().unwrap();
        let mut persisted = self.read(task_id)?;
        partial.apply_to(&mut persisted.state);
        let checkpoint_id = uuid::Uuid::new_v4().to_string();
        persisted.history.push(CheckpointMeta {
            checkpoint_id: checkpoint_id.clone(),
            task_id: task_id.to_string(),
            produced_by: as_node.map(str::to_string),
            created_at: Utc::now(),
        });
        self.write(task_id, &persisted)?;
        Ok(checkpoint_id)
    }

    async fn list(&self, task_id: &str, limit: usize) -> Result<Vec<CheckpointMeta>, StoreError> {
        let _guard = self.write_lock.read().unwrap();
        let persisted = self.read(task_id)?;
        Ok(persisted.history.into_iter().rev().take(limit).collect())
    }

    async fn next_nodes(&self, task_id: &str) -> Result<HashSet<String>, StoreError> {
        let _guard = self.write_lock.read().unwrap();
        Ok(self.read(task_id)?.next_nodes)
    }

    async fn set_next_nodes(&self, task_id: &str, nodes: HashSet<String>) -> Result<(), StoreError> {
        let _guard = self.write_lock.write().unwrap();
        let mut persisted = self.read(task_id)?;
        persisted.next_nodes = nodes;
        self.write(task_id, &persisted)
    }
}
