//! External collaborators the core treats as pluggable interfaces only (§6,
//! §1 "Out of scope"): scholarly search, full-text URL enrichment, and the
//! optional vector-store sidecar. No network implementation lives here —
//! each trait is backed by a mock in the test suite and the CLI demo's
//! offline mode, the same shape the teacher uses for `Planner`/`Reviewer`
//! (`phases/mod.rs`) wrapping an external `goose::Agent`.

pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::SourceUnavailable;
use crate::models::{PaperMetadata, SourceTag};

pub use mock::{MockFullTextAdapter, MockScholarSourceAdapter, MockVectorStoreAdapter};

/// `(keywords[], limit) → [PaperMetadata]` per source (§6).
#[async_trait]
pub trait ScholarSourceAdapter: Send + Sync {
    async fn search(&self, keywords: &[String], limit: usize) -> Result<Vec<PaperMetadata>, SourceUnavailable>;
}

/// Maps each configured source tag to its adapter. The retriever (C5.2)
/// dispatches per sub-question or per keyword against this registry and
/// dedups across sources itself; per-source dedup is the adapter's own
/// responsibility (§6).
#[derive(Default, Clone)]
pub struct ScholarSourceRegistry {
    adapters: HashMap<SourceTag, Arc<dyn ScholarSourceAdapter>>,
}

impl ScholarSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: SourceTag, adapter: Arc<dyn ScholarSourceAdapter>) -> Self {
        self.adapters.insert(source, adapter);
        self
    }

    pub fn get(&self, source: SourceTag) -> Option<Arc<dyn ScholarSourceAdapter>> {
        self.adapters.get(&source).cloned()
    }
}

/// `(papers[], concurrency) → papers[]` with `pdf_url` populated where
/// discoverable (§6). Shaped per-paper so the caller (extractor) drives the
/// `FULLTEXT_CONCURRENCY` bound itself via fan-out, the same way it drives
/// `LLM_CONCURRENCY` around per-paper LM calls; never overwrites a non-null
/// `pdf_url` — that merge rule lives in the extractor, not the adapter.
#[async_trait]
pub trait FullTextAdapter: Send + Sync {
    async fn discover_pdf_url(&self, paper: &PaperMetadata) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct VectorSearchHit {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Optional RAG sidecar seam (§6, §1 "Out of scope"). When absent, C7 falls
/// back to the paper's abstract (§4.7 step 3).
#[async_trait]
pub trait VectorStoreAdapter: Send + Sync {
    async fn ensure_collection(&self, name: &str) -> anyhow::Result<()>;
    async fn upsert(&self, chunks: &[String], embeddings: &[Vec<f32>]) -> anyhow::Result<Vec<String>>;
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter_paper_id: Option<&str>,
    ) -> anyhow::Result<Vec<VectorSearchHit>>;
    async fn delete_by_paper_id(&self, paper_id: &str) -> anyhow::Result<usize>;
}
