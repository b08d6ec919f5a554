//! The six agents (C5, SPEC_FULL.md §4.5): pure state transformations,
//! each an `async_trait` taking `&SessionState` and returning a
//! [`PartialStateUpdate`] — the same dependency-injection shape the teacher
//! uses for `GoosePlanner`/`GooseReviewer` wrapping a `goose::Agent`
//! (`phases/mod.rs`'s `Planner`/`Reviewer` traits), generalized from two
//! phases to six named nodes.

pub mod critic;
pub mod extractor;
pub mod planner;
pub mod reflection;
pub mod retriever;
pub mod writer;

pub use critic::{ClaimVerificationPipeline, Critic, DefaultCritic};
pub use extractor::{DefaultExtractor, Extractor};
pub use planner::{DefaultPlanner, Planner};
pub use reflection::{DefaultReflection, Reflection};
pub use retriever::{DefaultRetriever, Retriever};
pub use writer::{DefaultWriter, Writer};

use async_trait::async_trait;

use crate::errors::LmError;
use crate::models::{PartialStateUpdate, SessionState};

/// Failures an agent cannot recover from locally and must surface to the
/// scheduler/caller (§7: "recover locally whenever partial progress is
/// useful; surface otherwise").
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Lm(#[from] LmError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Common trait every agent implements; node-specific traits below are thin
/// wrappers so call sites read `planner.plan(&state)` rather than
/// `planner.run(&state)`.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError>;
}
