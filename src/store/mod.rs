//! State store & merge policy (C1, SPEC_FULL.md §4.1).
//!
//! A checkpoint is an immutable snapshot of [`SessionState`] tagged with the
//! node that produced it. The store only ever appends checkpoints; the
//! latest one plus the `next_nodes` set fully describes a session
//! (§4.1, Design Note "Pause/resume").

pub mod file;
pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::models::{PartialStateUpdate, SessionState};

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

/// Metadata about a single checkpoint, returned by [`CheckpointStore::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub checkpoint_id: String,
    pub task_id: String,
    /// Name of the node whose execution produced this checkpoint. `None` for
    /// the initial checkpoint created at session start.
    pub produced_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Create a brand-new session at its initial state. Errors if a session
    /// with this `task_id` already exists.
    async fn create(&self, state: SessionState) -> Result<(), StoreError>;

    /// Fetch the latest checkpointed state for a session.
    async fn get(&self, task_id: &str) -> Result<SessionState, StoreError>;

    /// Merge `partial` into the latest state per §4.1's field policies,
    /// persist a new checkpoint tagged `as_node`, and return its id. Crash-safe:
    /// either the whole checkpoint lands, or the prior one is still current
    /// (invariant 6, §3).
    async fn update(
        &self,
        task_id: &str,
        partial: PartialStateUpdate,
        as_node: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Checkpoint history, most recent first.
    async fn list(&self, task_id: &str, limit: usize) -> Result<Vec<CheckpointMeta>, StoreError>;

    /// The scheduler's `pending_next` set for this session — `{extractor}`
    /// while paused, empty once a turn reaches its terminal node.
    async fn next_nodes(&self, task_id: &str) -> Result<HashSet<String>, StoreError>;

    /// Record the scheduler's routing decision for the next `update`/resume.
    async fn set_next_nodes(&self, task_id: &str, nodes: HashSet<String>) -> Result<(), StoreError>;
}
