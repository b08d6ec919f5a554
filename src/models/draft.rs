use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Requested before section generation in outline mode (§4.5.4).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DraftOutline {
    pub title: String,
    pub section_titles: Vec<String>,
}

/// One section of the final draft. `content` carries `{cite:N}` placeholders
/// until normalization; `cited_paper_ids` is populated only after normalization
/// runs (once, at completion — §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSection {
    pub heading: String,
    pub content: String,
    #[serde(default)]
    pub cited_paper_ids: Vec<String>,
}

/// The final draft produced by the writer and checked by the critic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    pub sections: Vec<DraftSection>,
}

/// A single row of the opportunistic method-comparison table built from
/// `structured_contribution` fields across the selected papers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodComparisonEntry {
    pub paper_id: String,
    pub title: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub results: Option<String>,
}

/// Per-section LM output for the outline-mode parallel section generation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SectionDraft {
    pub content: String,
}

/// A complete single-call draft (retry mode and continuation mode).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FullDraft {
    pub title: String,
    pub sections: Vec<FullDraftSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FullDraftSection {
    pub heading: String,
    pub content: String,
}
