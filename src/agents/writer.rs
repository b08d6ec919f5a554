//! Writer (C5.4, §4.5.4).

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LmAdapter};
use crate::models::{
    prioritize_by_subquestions, Draft, DraftOutline, DraftSection, FullDraft, MessageRole, PaperMetadata,
    PartialStateUpdate, SectionDraft, SessionState,
};
use crate::router::TaskType;

use super::{Agent, AgentError};

#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterMode {
    Outline,
    Retry,
    Continuation,
}

impl WriterMode {
    /// Retry takes precedence over continuation (Open Question i,
    /// SPEC_FULL.md §9.1): a QA-driven retry always uses the single-call
    /// branch, even on a continuation turn.
    fn select(state: &SessionState) -> Self {
        if !state.qa_errors.is_empty() {
            WriterMode::Retry
        } else if state.is_continuation {
            WriterMode::Continuation
        } else {
            WriterMode::Outline
        }
    }
}

static CITE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{cite:(\d+)\}").unwrap());

pub struct DefaultWriter {
    lm: Arc<LmAdapter>,
    context_max_papers: usize,
    context_overflow_warning_threshold: usize,
    context_token_budget: usize,
    max_conversation_turns: usize,
}

impl DefaultWriter {
    pub fn new(
        lm: Arc<LmAdapter>,
        context_max_papers: usize,
        context_overflow_warning_threshold: usize,
        context_token_budget: usize,
        max_conversation_turns: usize,
    ) -> Self {
        Self {
            lm,
            context_max_papers,
            context_overflow_warning_threshold,
            context_token_budget,
            max_conversation_turns,
        }
    }

    /// Draft-level token ceiling: `min(8000, 2000 + 300*n)` (§4.5.4).
    fn draft_max_tokens(n_papers: usize) -> u32 {
        (2000 + 300 * n_papers as u32).min(8000)
    }

    /// Section-level token ceiling: `min(4000, 1500 + 100*n)` (§4.5.4).
    fn section_max_tokens(n_papers: usize) -> u32 {
        (1500 + 100 * n_papers as u32).min(4000)
    }

    /// Builds the paper context block and returns `(text, included_count)`.
    /// Citation indices always refer to position within
    /// `state.citation_index_base()` (Open Question ii) even though the
    /// papers are re-ordered for presentation via the same reservation rule
    /// the extractor uses (§4.5.3 step 1, reused per §4.5.4).
    fn build_context(&self, state: &SessionState, logs: &mut Vec<String>) -> (String, usize) {
        let base = state.citation_index_base();
        if base.is_empty() {
            return (String::new(), 0);
        }
        if base.len() > self.context_overflow_warning_threshold {
            logs.push(format!(
                "writer: paper context ({} papers) exceeds overflow warning threshold {}",
                base.len(),
                self.context_overflow_warning_threshold
            ));
        }

        let index_of: std::collections::HashMap<&str, usize> =
            base.iter().enumerate().map(|(i, p)| (p.paper_id.as_str(), i + 1)).collect();

        let ordered: Vec<PaperMetadata> = match &state.research_plan {
            Some(plan) => prioritize_by_subquestions(base, plan),
            None => base.to_vec(),
        };

        let ordered = if ordered.len() > self.context_max_papers {
            logs.push(format!(
                "writer: truncating paper context from {} to context_max_papers={}",
                ordered.len(),
                self.context_max_papers
            ));
            ordered[..self.context_max_papers].to_vec()
        } else {
            ordered
        };

        let mut included = Vec::new();
        let mut budget = 0usize;
        for paper in &ordered {
            let tokens = paper.estimated_context_tokens();
            if !included.is_empty() && budget + tokens > self.context_token_budget {
                break;
            }
            budget += tokens;
            included.push(paper);
        }
        if included.len() < ordered.len() {
            logs.push(format!(
                "writer: context_token_budget={} limited paper context to {} of {} candidates",
                self.context_token_budget,
                included.len(),
                ordered.len()
            ));
        }

        let mut lines = Vec::new();
        for paper in &included {
            let idx = index_of.get(paper.paper_id.as_str()).copied().unwrap_or(0);
            let summary = paper
                .core_contribution
                .clone()
                .or_else(|| paper.abstract_text.clone())
                .unwrap_or_else(|| "(no summary available)".to_string());
            lines.push(format!("[{idx}] {} — {summary}", paper.title));
        }
        (lines.join("\n"), included.len())
    }

    fn conversation_context(&self, state: &SessionState) -> Option<String> {
        if state.messages.is_empty() {
            return None;
        }
        let window = 2 * self.max_conversation_turns;
        let recent = state.messages.iter().rev().take(window).collect::<Vec<_>>();
        let mut lines: Vec<String> = recent
            .into_iter()
            .rev()
            .map(|m| {
                let role = match m.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::System => "system",
                };
                format!("{role}: {}", m.content)
            })
            .collect();
        if lines.is_empty() {
            return None;
        }
        lines.insert(0, "Prior conversation context:".to_string());
        Some(lines.join("\n"))
    }

    fn qa_feedback(&self, state: &SessionState) -> String {
        if let Some(reflection) = &state.reflection {
            reflection
                .entries
                .iter()
                .filter(|e| e.fixable_by_writer)
                .map(|e| format!("- [{:?}] {} — fix: {}", e.error_category, e.error_detail, e.fix_strategy))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            state.qa_errors.iter().take(3).cloned().collect::<Vec<_>>().join("\n")
        }
    }

    fn scan_out_of_range_citations(content: &str, max_index: usize, logs: &mut Vec<String>) {
        for cap in CITE_RE.captures_iter(content) {
            if let Ok(n) = cap[1].parse::<usize>()
                && (n == 0 || n > max_index)
            {
                logs.push(format!("writer: citation index {n} out of range (1..={max_index})"));
            }
        }
    }

    async fn write_outline(&self, state: &SessionState, logs: &mut Vec<String>) -> Result<Draft, AgentError> {
        let (context, n_papers) = self.build_context(state, logs);
        let outline_system = format!(
            "You are writing a literature review. Based on the user's query and the candidate \
            papers below, propose a title and an ordered list of section titles.\n\nQuery: {}\n\n\
            Papers:\n{context}",
            state.user_query
        );
        let (outline, _usage) = self
            .lm
            .structured_completion::<DraftOutline>(CompletionRequest {
                messages: vec![
                    ChatMessage {
                        role: ChatRole::System,
                        content: outline_system,
                    },
                    ChatMessage {
                        role: ChatRole::User,
                        content: "Produce the outline.".to_string(),
                    },
                ],
                temperature: 0.4,
                max_tokens: Some(800),
                model_id: state.model_id.as_deref(),
                task_type: Some(TaskType::Writing),
                token_callback: None,
            })
            .await
            .map_err(AgentError::Lm)?;

        let section_max_tokens = Self::section_max_tokens(n_papers);
        let section_futures = outline.section_titles.iter().map(|heading| {
            let context = context.clone();
            let query = state.user_query.clone();
            let heading = heading.clone();
            let model_id = state.model_id.clone();
            async move {
                let system = format!(
                    "You are writing one section, \"{heading}\", of a literature review about: \
                    {query}\n\nCite supporting papers inline using {{cite:N}} where N is the \
                    bracketed index shown below.\n\nPapers:\n{context}"
                );
                let result = self
                    .lm
                    .structured_completion::<SectionDraft>(CompletionRequest {
                        messages: vec![
                            ChatMessage {
                                role: ChatRole::System,
                                content: system,
                            },
                            ChatMessage {
                                role: ChatRole::User,
                                content: format!("Write the \"{heading}\" section."),
                            },
                        ],
                        temperature: 0.6,
                        max_tokens: Some(section_max_tokens),
                        model_id: model_id.as_deref(),
                        task_type: Some(TaskType::Writing),
                        token_callback: None,
                    })
                    .await;
                (heading, result)
            }
        });

        let results = join_all(section_futures).await;
        let mut sections = Vec::new();
        for (heading, result) in results {
            let content = match result {
                Ok((section, _usage)) => section.content,
                Err(e) => {
                    logs.push(format!("writer: section \"{heading}\" generation failed: {e}"));
                    "[section generation failed]".to_string()
                }
            };
            sections.push(DraftSection {
                heading,
                content,
                cited_paper_ids: Vec::new(),
            });
        }

        Ok(Draft {
            title: outline.title,
            sections,
        })
    }

    async fn write_single_call(
        &self,
        state: &SessionState,
        mode: WriterMode,
        logs: &mut Vec<String>,
    ) -> Result<Draft, AgentError> {
        let (context, n_papers) = self.build_context(state, logs);
        let mut system = format!(
            "You are revising a literature review draft about: {}\n\nCite supporting papers \
            inline using {{cite:N}} where N is the bracketed index shown below.\n\nPapers:\n{context}",
            state.user_query
        );

        match mode {
            WriterMode::Retry => {
                let feedback = self.qa_feedback(state);
                system = format!(
                    "{system}\n\nThe previous draft failed review for these reasons; address them \
                    all:\n{feedback}"
                );
            }
            WriterMode::Continuation => {
                if let Some(prior) = &state.final_draft {
                    let prior_text = prior
                        .sections
                        .iter()
                        .map(|s| format!("## {}\n{}", s.heading, s.content))
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    system = format!("{system}\n\nPrior draft:\n{prior_text}");
                }
                if let Some(context) = self.conversation_context(state) {
                    system = format!("{system}\n\n{context}");
                }
            }
            WriterMode::Outline => unreachable!("write_single_call is never called in outline mode"),
        }

        let (full_draft, _usage) = self
            .lm
            .structured_completion::<FullDraft>(CompletionRequest {
                messages: vec![
                    ChatMessage {
                        role: ChatRole::System,
                        content: system,
                    },
                    ChatMessage {
                        role: ChatRole::User,
                        content: state.user_query.clone(),
                    },
                ],
                temperature: 0.5,
                max_tokens: Some(Self::draft_max_tokens(n_papers)),
                model_id: state.model_id.as_deref(),
                task_type: Some(TaskType::Writing),
                token_callback: None,
            })
            .await
            .map_err(AgentError::Lm)?;

        Ok(Draft {
            title: full_draft.title,
            sections: full_draft
                .sections
                .into_iter()
                .map(|s| DraftSection {
                    heading: s.heading,
                    content: s.content,
                    cited_paper_ids: Vec::new(),
                })
                .collect(),
        })
    }
}

#[async_trait]
impl Writer for DefaultWriter {
    async fn write(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        let mode = WriterMode::select(state);
        let mut logs = Vec::new();

        let draft = match mode {
            WriterMode::Outline => self.write_outline(state, &mut logs).await?,
            WriterMode::Retry | WriterMode::Continuation => self.write_single_call(state, mode, &mut logs).await?,
        };

        let max_index = state.citation_index_base().len();
        for section in &draft.sections {
            Self::scan_out_of_range_citations(&section.content, max_index, &mut logs);
        }

        let from = match mode {
            WriterMode::Outline => "extractor",
            WriterMode::Retry => "critic",
            WriterMode::Continuation => "continuation",
        };

        let mut update = PartialStateUpdate {
            final_draft: Some(Some(draft)),
            ..PartialStateUpdate::new()
        };
        for line in logs {
            update = update.log(line);
        }
        Ok(update.handoff(from, "writer"))
    }
}

#[async_trait]
impl Agent for DefaultWriter {
    async fn run(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        self.write(state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CostLedger, LmSemaphores, MockLmBackend};
    use crate::models::{OutputLanguage, SourceTag};
    use crate::router::{CostTier, ModelConfig, ModelRegistry};

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(ModelRegistry::new(vec![ModelConfig {
            model_id: "mock:model".into(),
            provider: "mock".into(),
            model_name: "mock-model".into(),
            api_base: None,
            api_key_env: None,
            supports_json_mode: true,
            supports_structured_output: true,
            supports_long_context: true,
            max_output_tokens: 8000,
            is_local: true,
            cost_tier: CostTier::Low,
            reasoning_score: 7.0,
            creativity_score: 7.0,
            latency_score: 7.0,
            enabled: true,
        }]))
    }

    fn selected_paper(id: &str, title: &str) -> PaperMetadata {
        let mut p = PaperMetadata::new(id, title, SourceTag::Arxiv);
        p.core_contribution = Some("does something useful".to_string());
        p
    }

    #[tokio::test]
    async fn outline_mode_writes_draft_with_sections() {
        let backend = Arc::new(MockLmBackend::with_fixed_response(
            r#"{"title": "A Survey", "section_titles": ["Intro", "Methods"]}"#.to_string(),
        ));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let writer = DefaultWriter::new(lm, 200, 100, 40_000, 5);
        let mut state = SessionState::new("t1", "transformers survey", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.selected_papers = vec![selected_paper("p1", "Attention Is All You Need")];

        // With a fixed mock response shared by both the outline and section
        // calls, section generation will fail to parse as `SectionDraft`
        // (missing `content`), so this exercises the placeholder fallback.
        let update = writer.write(&state).await.unwrap();
        let draft = update.final_draft.unwrap().unwrap();
        assert_eq!(draft.title, "A Survey");
        assert_eq!(draft.sections.len(), 2);
    }

    #[tokio::test]
    async fn retry_mode_is_selected_even_during_continuation() {
        let mut state = SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.is_continuation = true;
        state.qa_errors = vec!["citation 5 out of range".to_string()];
        assert_eq!(WriterMode::select(&state), WriterMode::Retry);
    }

    #[tokio::test]
    async fn continuation_mode_selected_without_qa_errors() {
        let mut state = SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.is_continuation = true;
        assert_eq!(WriterMode::select(&state), WriterMode::Continuation);
    }

    #[tokio::test]
    async fn single_call_retry_produces_draft_from_full_draft_schema() {
        let backend = Arc::new(MockLmBackend::with_fixed_response(
            r#"{"title": "Revised", "sections": [{"heading": "Intro", "content": "fixed content {cite:1}"}]}"#
                .to_string(),
        ));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let writer = DefaultWriter::new(lm, 200, 100, 40_000, 5);
        let mut state = SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.selected_papers = vec![selected_paper("p1", "Paper One")];
        state.qa_errors = vec!["missing citation".to_string()];

        let update = writer.write(&state).await.unwrap();
        let draft = update.final_draft.unwrap().unwrap();
        assert_eq!(draft.title, "Revised");
        assert_eq!(draft.sections[0].content, "fixed content {cite:1}");
    }

    #[tokio::test]
    async fn qa_feedback_without_reflection_is_bounded_to_first_three_errors() {
        let backend = Arc::new(MockLmBackend::with_fixed_response("{}".to_string()));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let writer = DefaultWriter::new(lm, 200, 100, 40_000, 5);
        let mut state = SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.qa_errors = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert_eq!(writer.qa_feedback(&state), "a\nb\nc");
    }

    #[test]
    fn draft_and_section_token_ceilings_respect_caps() {
        assert_eq!(DefaultWriter::draft_max_tokens(0), 2000);
        assert_eq!(DefaultWriter::draft_max_tokens(100), 8000);
        assert_eq!(DefaultWriter::section_max_tokens(0), 1500);
        assert_eq!(DefaultWriter::section_max_tokens(100), 4000);
    }
}
