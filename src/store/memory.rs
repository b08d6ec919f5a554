use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::StoreError;
use crate::models::{PartialStateUpdate, SessionState};

use super::{CheckpointMeta, CheckpointStore};

struct SessionEntry {
    state: SessionState,
    next_nodes: HashSet<String>,
    history: Vec<CheckpointMeta>,
}

/// Process-wide, in-memory checkpoint store. Grounded in the teacher's
/// `SessionRegistry` (`orchestrator/client.rs`): a `RwLock<HashMap<...>>`
/// guarding per-session state, each session additionally behind its own
/// `Mutex` so concurrent callers for *different* sessions never block each
/// other (§5: "different sessions are independent").
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionEntry>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, task_id: &str) -> Result<Arc<Mutex<SessionEntry>>, StoreError> {
        if let Some(e) = self.sessions.read().unwrap().get(task_id) {
            return Ok(Arc::clone(e));
        }
        Err(StoreError::NotFound(task_id.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create(&self, state: SessionState) -> Result<(), StoreError> {
        let task_id = state.task_id.clone();
        let mut map = self.sessions.write().unwrap();
        // Double-checked: another caller may have raced us to create the
        // same session.
        map.entry(task_id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(SessionEntry {
                state,
                next_nodes: HashSet::new(),
                history: vec![CheckpointMeta {
                    checkpoint_id: uuid::Uuid::new_v4().to_string(),
                    task_id,
                    produced_by: None,
                    created_at: Utc::now(),
                }],
            }))
        });
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<SessionState, StoreError> {
        let entry = self.entry(task_id)?;
        let guard = entry.lock().unwrap();
        Ok(guard.state.clone())
    }

    async fn update(
        &self,
        task_id: &str,
        partial: PartialStateUpdate,
        as_node: Option<&str>,
    ) -> Result<String, StoreError> {
        let entry = self.entry(task_id)?;
        let mut guard = entry.lock().unwrap();
        partial.apply_to(&mut guard.state);
        let checkpoint_id = uuid::Uuid::new_v4().to_string();
        guard.history.push(CheckpointMeta {
            checkpoint_id: checkpoint_id.clone(),
            task_id: task_id.to_string(),
            produced_by: as_node.map(str::to_string),
            created_at: Utc::now(),
        });
        Ok(checkpoint_id)
    }

    async fn list(&self, task_id: &str, limit: usize) -> Result<Vec<CheckpointMeta>, StoreError> {
        let entry = self.entry(task_id)?;
        let guard = entry.lock().unwrap();
        Ok(guard
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn next_nodes(&self, task_id: &str) -> Result<HashSet<String>, StoreError> {
        let entry = self.entry(task_id)?;
        let guard = entry.lock().unwrap();
        Ok(guard.next_nodes.clone())
    }

    async fn set_next_nodes(&self, task_id: &str, nodes: HashSet<String>) -> Result<(), StoreError> {
        let entry = self.entry(task_id)?;
        let mut guard = entry.lock().unwrap();
        guard.next_nodes = nodes;
        Ok(())
    }
}
