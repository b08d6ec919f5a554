use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A scholarly source a retrieval adapter can be dispatched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    SemanticScholar,
    Arxiv,
    Pubmed,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::SemanticScholar => "semantic_scholar",
            SourceTag::Arxiv => "arxiv",
            SourceTag::Pubmed => "pubmed",
        }
    }
}

/// Eight optional slots of a paper's structured summary, filled in by the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StructuredContribution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub novelty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limitations: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub future_work: Option<String>,
}

impl StructuredContribution {
    pub fn is_empty(&self) -> bool {
        self.problem.is_none()
            && self.method.is_none()
            && self.novelty.is_none()
            && self.dataset.is_none()
            && self.baseline.is_none()
            && self.results.is_none()
            && self.limitations.is_none()
            && self.future_work.is_none()
    }
}

/// A paper returned by retrieval, carried through approval and extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub paper_id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    pub source: SourceTag,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub core_contribution: Option<String>,
    #[serde(default)]
    pub structured_contribution: Option<StructuredContribution>,
}

impl PaperMetadata {
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>, source: SourceTag) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: title.into(),
            authors: Vec::new(),
            year: None,
            abstract_text: None,
            url: None,
            pdf_url: None,
            source,
            is_approved: false,
            core_contribution: None,
            structured_contribution: None,
        }
    }

    /// Rough estimate of how many LM tokens this paper's textual fields would cost
    /// in a prompt, used by the writer's context budget (§4.5.4). Falls back to the
    /// same constant the original implementation uses when no textual content exists.
    pub fn estimated_context_tokens(&self) -> usize {
        const FALLBACK: usize = 180;
        let mut chars = self.title.len();
        if let Some(c) = &self.core_contribution {
            chars += c.len();
        }
        if let Some(sc) = &self.structured_contribution {
            for field in [
                &sc.problem,
                &sc.method,
                &sc.novelty,
                &sc.dataset,
                &sc.baseline,
                &sc.results,
                &sc.limitations,
                &sc.future_work,
            ] {
                if let Some(text) = field {
                    chars += text.len();
                }
            }
        }
        if let Some(a) = &self.abstract_text {
            chars += a.len().min(400);
        }
        if chars == 0 {
            FALLBACK
        } else {
            // ~4 chars/token, same heuristic ratio the original's character-based
            // estimator uses.
            (chars / 4).max(1)
        }
    }
}
