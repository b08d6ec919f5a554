//! In-process adapter fakes used by the test suite and the CLI demo's
//! offline mode — no external crate has precedent for "mock adapters" in
//! the teacher (it tests against real `goose` sessions), so these are
//! hand-rolled in the same spirit as [`crate::llm::MockLmBackend`].

use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::SourceUnavailable;
use crate::models::PaperMetadata;

use super::{FullTextAdapter, ScholarSourceAdapter, VectorSearchHit, VectorStoreAdapter};

/// Returns a fixed set of papers (optionally scripted to fail a number of
/// times first, to exercise the retriever's source-failure tracker).
pub struct MockScholarSourceAdapter {
    papers: Vec<PaperMetadata>,
    source_tag: String,
    fail_first_n: Mutex<u32>,
}

impl MockScholarSourceAdapter {
    pub fn new(source_tag: impl Into<String>, papers: Vec<PaperMetadata>) -> Self {
        Self {
            papers,
            source_tag: source_tag.into(),
            fail_first_n: Mutex::new(0),
        }
    }

    pub fn failing(source_tag: impl Into<String>, times: u32) -> Self {
        Self {
            papers: Vec::new(),
            source_tag: source_tag.into(),
            fail_first_n: Mutex::new(times),
        }
    }
}

#[async_trait]
impl ScholarSourceAdapter for MockScholarSourceAdapter {
    async fn search(&self, keywords: &[String], limit: usize) -> Result<Vec<PaperMetadata>, SourceUnavailable> {
        {
            let mut remaining = self.fail_first_n.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceUnavailable {
                    source_tag: self.source_tag.clone(),
                    detail: format!("mock failure (keywords: {keywords:?})"),
                });
            }
        }
        Ok(self.papers.iter().take(limit).cloned().collect())
    }
}

/// Deterministically "discovers" a pdf url for any paper handed to it.
pub struct MockFullTextAdapter;

#[async_trait]
impl FullTextAdapter for MockFullTextAdapter {
    async fn discover_pdf_url(&self, paper: &PaperMetadata) -> Option<String> {
        Some(format!("https://example.org/pdf/{}.pdf", paper.paper_id))
    }
}

/// Always reports high similarity for any filtered paper id, so callers can
/// exercise the vector-store branch of C7 deterministically.
pub struct MockVectorStoreAdapter;

#[async_trait]
impl VectorStoreAdapter for MockVectorStoreAdapter {
    async fn ensure_collection(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn upsert(&self, chunks: &[String], _embeddings: &[Vec<f32>]) -> anyhow::Result<Vec<String>> {
        Ok((0..chunks.len()).map(|i| format!("chunk-{i}")).collect())
    }

    async fn search(
        &self,
        _vector: &[f32],
        limit: usize,
        _score_threshold: Option<f32>,
        filter_paper_id: Option<&str>,
    ) -> anyhow::Result<Vec<VectorSearchHit>> {
        let paper_id = filter_paper_id.unwrap_or("unknown").to_string();
        Ok((0..limit.min(3))
            .map(|i| VectorSearchHit {
                id: format!("{paper_id}-chunk-{i}"),
                score: 0.9,
                payload: serde_json::json!({"paper_id": paper_id, "text": format!("mock chunk {i} for {paper_id}")}),
            })
            .collect())
    }

    async fn delete_by_paper_id(&self, _paper_id: &str) -> anyhow::Result<usize> {
        Ok(0)
    }
}
