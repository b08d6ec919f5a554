use serde::{Deserialize, Serialize};

use super::draft::{Draft, DraftOutline, MethodComparisonEntry};
use super::message::Message;
use super::paper::PaperMetadata;
use super::plan::ResearchPlan;
use super::reflection::Reflection;
use super::verification::ClaimVerificationSummary;

/// `output_language` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLanguage {
    En,
    Zh,
}

/// Current schema version for checkpointed state (§4.1.1). Bump when a field
/// is added, removed, or reinterpreted.
pub const SCHEMA_VERSION: u32 = 1;

/// The checkpointed, versioned session object (§3 "Session state"). Every
/// field here carries a declared merge policy enforced by [`PartialStateUpdate::apply_to`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub schema_version: u32,
    pub task_id: String,
    pub user_query: String,
    pub output_language: OutputLanguage,
    pub search_sources: Vec<super::paper::SourceTag>,
    pub search_keywords: Vec<String>,
    pub research_plan: Option<ResearchPlan>,
    pub candidate_papers: Vec<PaperMetadata>,
    pub selected_papers: Vec<PaperMetadata>,
    pub approved_papers: Vec<PaperMetadata>,
    pub final_draft: Option<Draft>,
    pub draft_outline: Option<DraftOutline>,
    pub qa_errors: Vec<String>,
    pub retry_count: u32,
    pub reflection: Option<Reflection>,
    pub claim_verification: Option<ClaimVerificationSummary>,
    pub messages: Vec<Message>,
    pub logs: Vec<String>,
    pub agent_handoffs: Vec<String>,
    pub is_continuation: bool,
    pub model_id: Option<String>,
    /// Read-only snapshot of the cost ledger at last checkpoint (§3.1 supplement).
    #[serde(default)]
    pub cost_summary: Option<serde_json::Value>,
    /// Opportunistic, best-effort — never required by an invariant (§3.1 supplement).
    #[serde(default)]
    pub comparison_table: Option<Vec<MethodComparisonEntry>>,
}

impl SessionState {
    pub fn new(
        task_id: impl Into<String>,
        user_query: impl Into<String>,
        output_language: OutputLanguage,
        search_sources: Vec<super::paper::SourceTag>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            task_id: task_id.into(),
            user_query: user_query.into(),
            output_language,
            search_sources,
            search_keywords: Vec::new(),
            research_plan: None,
            candidate_papers: Vec::new(),
            selected_papers: Vec::new(),
            approved_papers: Vec::new(),
            final_draft: None,
            draft_outline: None,
            qa_errors: Vec::new(),
            retry_count: 0,
            reflection: None,
            claim_verification: None,
            messages: Vec::new(),
            logs: Vec::new(),
            agent_handoffs: Vec::new(),
            is_continuation: false,
            model_id: None,
            cost_summary: None,
            comparison_table: None,
        }
    }

    /// Citation-index range convention, standardized on `selected_papers`
    /// with a fallback to the approved subset of candidates when empty
    /// (Open Question ii, SPEC_FULL.md §9.1).
    pub fn citation_index_base(&self) -> &[PaperMetadata] {
        if !self.selected_papers.is_empty() {
            &self.selected_papers
        } else {
            &self.approved_papers
        }
    }
}

/// A node's return value: every field is `None` (unchanged) unless the node
/// actually writes it. [`apply_to`] interprets each `Some` per the field's
/// declared merge policy (§4.1): Replace (default), Append, or Increment.
#[derive(Debug, Clone, Default)]
pub struct PartialStateUpdate {
    pub user_query: Option<String>,
    pub search_keywords: Option<Vec<String>>,
    pub research_plan: Option<Option<ResearchPlan>>,
    pub candidate_papers: Option<Vec<PaperMetadata>>,
    pub selected_papers: Option<Vec<PaperMetadata>>,
    pub approved_papers: Option<Vec<PaperMetadata>>,
    pub final_draft: Option<Option<Draft>>,
    pub draft_outline: Option<Option<DraftOutline>>,
    pub qa_errors: Option<Vec<String>>,
    /// Authored explicitly by the critic; never auto-incremented by the store.
    pub retry_count_increment: Option<u32>,
    pub reflection: Option<Option<Reflection>>,
    pub claim_verification: Option<Option<ClaimVerificationSummary>>,
    /// Append-policy: new messages appended to the log.
    pub messages_append: Vec<Message>,
    /// Append-policy: new log lines appended.
    pub logs_append: Vec<String>,
    /// Append-policy.
    pub agent_handoffs_append: Vec<String>,
    pub is_continuation: Option<bool>,
    pub model_id: Option<Option<String>>,
    pub cost_summary: Option<Option<serde_json::Value>>,
    pub comparison_table: Option<Option<Vec<MethodComparisonEntry>>>,
}

impl PartialStateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(mut self, line: impl Into<String>) -> Self {
        self.logs_append.push(line.into());
        self
    }

    pub fn handoff(mut self, from: &str, to: &str) -> Self {
        self.agent_handoffs_append.push(format!("{from}→{to}"));
        self
    }

    /// Merge this partial update into `state`, enforcing each field's
    /// declared policy (C1 / §4.1). Returns the checkpoint's producing-node
    /// tag is handled by the caller (the scheduler), not here.
    pub fn apply_to(self, state: &mut SessionState) {
        if let Some(v) = self.user_query {
            state.user_query = v;
        }
        if let Some(v) = self.search_keywords {
            state.search_keywords = v;
        }
        if let Some(v) = self.research_plan {
            state.research_plan = v;
        }
        if let Some(v) = self.candidate_papers {
            state.candidate_papers = v;
        }
        if let Some(v) = self.selected_papers {
            state.selected_papers = v;
        }
        if let Some(v) = self.approved_papers {
            state.approved_papers = v;
        }
        if let Some(v) = self.final_draft {
            state.final_draft = v;
        }
        if let Some(v) = self.draft_outline {
            state.draft_outline = v;
        }
        if let Some(v) = self.qa_errors {
            state.qa_errors = v;
        }
        if let Some(inc) = self.retry_count_increment {
            state.retry_count = state.retry_count.saturating_add(inc);
        }
        if let Some(v) = self.reflection {
            state.reflection = v;
        }
        if let Some(v) = self.claim_verification {
            state.claim_verification = v;
        }
        state.messages.extend(self.messages_append);
        state.logs.extend(self.logs_append);
        state.agent_handoffs.extend(self.agent_handoffs_append);
        if let Some(v) = self.is_continuation {
            state.is_continuation = v;
        }
        if let Some(v) = self.model_id {
            state.model_id = v;
        }
        if let Some(v) = self.cost_summary {
            state.cost_summary = v;
        }
        if let Some(v) = self.comparison_table {
            state.comparison_table = v;
        }
    }
}
