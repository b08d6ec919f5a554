//! Extractor (C5.3, §4.5.3).

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::adapters::FullTextAdapter;
use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LmAdapter, LmSemaphores};
use crate::models::{prioritize_by_subquestions, PaperMetadata, PartialStateUpdate, SessionState, StructuredContribution};
use crate::router::TaskType;

use super::{Agent, AgentError};

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError>;
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CoreContributionResult {
    core_contribution: String,
}

pub struct DefaultExtractor {
    lm: Arc<LmAdapter>,
    fulltext: Option<Arc<dyn FullTextAdapter>>,
    semaphores: Arc<LmSemaphores>,
    context_max_papers: usize,
}

impl DefaultExtractor {
    pub fn new(
        lm: Arc<LmAdapter>,
        fulltext: Option<Arc<dyn FullTextAdapter>>,
        semaphores: Arc<LmSemaphores>,
        context_max_papers: usize,
    ) -> Self {
        Self {
            lm,
            fulltext,
            semaphores,
            context_max_papers,
        }
    }

    fn paper_prompt(paper: &PaperMetadata) -> String {
        let mut lines = vec![format!("Title: {}", paper.title)];
        if !paper.authors.is_empty() {
            lines.push(format!("Authors: {}", paper.authors.join(", ")));
        }
        if let Some(year) = paper.year {
            lines.push(format!("Year: {year}"));
        }
        if let Some(abstract_text) = &paper.abstract_text {
            lines.push(format!("Abstract: {abstract_text}"));
        }
        lines.join("\n")
    }

    /// Two concurrent LM calls — one for the prose `core_contribution`, one
    /// for the eight-field `structured_contribution` — awaited together
    /// fail-any, matching the original's `asyncio.gather(core_task,
    /// structured_task)` (§4.5.3 step 3). A failure in either call leaves
    /// that half of the paper's fields untouched; the other half still fills
    /// in if its own call succeeded.
    async fn extract_one(&self, paper: PaperMetadata) -> PaperMetadata {
        let core_system = "You are a research assistant. Summarize this paper's core \
            contribution in one or two sentences."
            .to_string();
        let structured_system = "You are a research assistant. Fill in as many of the \
            structured contribution fields (problem, method, novelty, dataset, baseline, \
            results, limitations, future_work) as the abstract supports, leaving the rest null."
            .to_string();
        let prompt = Self::paper_prompt(&paper);

        let core_call = self.lm.structured_completion::<CoreContributionResult>(CompletionRequest {
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: core_system,
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: prompt.clone(),
                },
            ],
            temperature: 0.2,
            max_tokens: Some(300),
            model_id: None,
            task_type: Some(TaskType::Extraction),
            token_callback: None,
        });
        let structured_call = self.lm.structured_completion::<StructuredContribution>(CompletionRequest {
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: structured_system,
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: Some(600),
            model_id: None,
            task_type: Some(TaskType::Extraction),
            token_callback: None,
        });

        let (core_result, structured_result) = futures::join!(core_call, structured_call);

        let mut paper = paper;
        if let Ok((core, _usage)) = core_result {
            paper.core_contribution = Some(core.core_contribution);
        }
        if let Ok((structured, _usage)) = structured_result
            && !structured.is_empty()
        {
            paper.structured_contribution = Some(structured);
        }
        paper
    }

    async fn enrich_fulltext(&self, paper: PaperMetadata, adapter: Arc<dyn FullTextAdapter>) -> PaperMetadata {
        if paper.pdf_url.is_some() {
            return paper;
        }
        let _permit = self.semaphores.fulltext.acquire().await.expect("semaphore never closed");
        let mut paper = paper;
        if let Some(url) = adapter.discover_pdf_url(&paper).await {
            paper.pdf_url = Some(url);
        }
        paper
    }
}

#[async_trait]
impl Extractor for DefaultExtractor {
    async fn extract(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        let approved: Vec<PaperMetadata> = state
            .candidate_papers
            .iter()
            .filter(|p| p.is_approved)
            .cloned()
            .collect();

        let mut logs = Vec::new();
        if approved.is_empty() {
            return Ok(PartialStateUpdate {
                approved_papers: Some(Vec::new()),
                selected_papers: Some(Vec::new()),
                ..PartialStateUpdate::new()
            }
            .log("extractor: no approved candidate papers")
            .handoff("retriever", "extractor"));
        }

        let prioritized = match &state.research_plan {
            Some(plan) => prioritize_by_subquestions(&approved, plan),
            None => approved.clone(),
        };

        let truncated = if prioritized.len() > self.context_max_papers {
            logs.push(format!(
                "extractor: truncating {} approved papers to context_max_papers={}",
                prioritized.len(),
                self.context_max_papers
            ));
            prioritized[..self.context_max_papers].to_vec()
        } else {
            prioritized
        };

        let extracted: Vec<PaperMetadata> =
            join_all(truncated.into_iter().map(|p| self.extract_one(p))).await;

        let extracted = if let Some(adapter) = &self.fulltext {
            join_all(
                extracted
                    .into_iter()
                    .map(|p| self.enrich_fulltext(p, Arc::clone(adapter))),
            )
            .await
        } else {
            extracted
        };

        let selected: Vec<PaperMetadata> = extracted
            .iter()
            .filter(|p| p.core_contribution.is_some())
            .cloned()
            .collect();

        logs.push(format!(
            "extractor: extracted {} of {} approved papers",
            selected.len(),
            extracted.len()
        ));

        // `approved_papers` is the *full* is_approved set (§4.5.3 step 6),
        // independent of the context_max_papers truncation applied above;
        // merge the per-paper extraction/enrichment results back in by id
        // so a truncated-out paper still surfaces with its original fields.
        let enriched_by_id: std::collections::HashMap<&str, &PaperMetadata> =
            extracted.iter().map(|p| (p.paper_id.as_str(), p)).collect();
        let approved_papers: Vec<PaperMetadata> = approved
            .into_iter()
            .map(|p| match enriched_by_id.get(p.paper_id.as_str()) {
                Some(enriched) => (*enriched).clone(),
                None => p,
            })
            .collect();

        let mut update = PartialStateUpdate {
            approved_papers: Some(approved_papers),
            selected_papers: Some(selected),
            ..PartialStateUpdate::new()
        };
        for line in logs {
            update = update.log(line);
        }
        Ok(update.handoff("retriever", "extractor"))
    }
}

#[async_trait]
impl Agent for DefaultExtractor {
    async fn run(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        self.extract(state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CostLedger, MockLmBackend};
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
            max_output_tokens: 4000,
            is_local: true,
            cost_tier: CostTier::Low,
            reasoning_score: 5.0,
            creativity_score: 5.0,
            latency_score: 5.0,
            enabled: true,
        }]))
    }

    fn approved_paper(id: &str) -> PaperMetadata {
        let mut p = PaperMetadata::new(id, format!("Title {id}"), SourceTag::Arxiv);
        p.is_approved = true;
        p
    }

    #[tokio::test]
    async fn extracts_approved_papers_and_fills_selected() {
        // Both the core and structured concurrent calls parse their own
        // fields out of this same fixed response, ignoring the other's.
        let backend = Arc::new(MockLmBackend::with_fixed_response(
            r#"{"core_contribution": "does X", "method": "Y"}"#.to_string(),
        ));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let extractor = DefaultExtractor::new(lm, None, Arc::new(LmSemaphores::new(2, 2, 3)), 200);
        let mut state = SessionState::new("t1", "query", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.candidate_papers = vec![approved_paper("p1"), approved_paper("p2")];

        let update = extractor.extract(&state).await.unwrap();
        let selected = update.selected_papers.unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].core_contribution.as_deref(), Some("does X"));
        assert_eq!(
            selected[0].structured_contribution.as_ref().and_then(|s| s.method.as_deref()),
            Some("Y")
        );
    }

    #[tokio::test]
    async fn no_approved_papers_yields_empty_update() {
        let backend = Arc::new(MockLmBackend::with_fixed_response("{}".to_string()));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let extractor = DefaultExtractor::new(lm, None, Arc::new(LmSemaphores::new(2, 2, 3)), 200);
        let mut state = SessionState::new("t1", "query", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.candidate_papers = vec![PaperMetadata::new("p1", "Unapproved", SourceTag::Arxiv)];

        let update = extractor.extract(&state).await.unwrap();
        assert_eq!(update.selected_papers, Some(Vec::new()));
        assert_eq!(update.approved_papers, Some(Vec::new()));
    }

    #[tokio::test]
    async fn fulltext_adapter_fills_missing_pdf_url_without_overwriting() {
        use crate::adapters::MockFullTextAdapter;
        let backend = Arc::new(MockLmBackend::with_fixed_response(
            r#"{"core_contribution": "does X", "structured_contribution": {}}"#.to_string(),
        ));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let extractor = DefaultExtractor::new(
            lm,
            Some(Arc::new(MockFullTextAdapter)),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            200,
        );
        let mut state = SessionState::new("t1", "query", OutputLanguage::En, vec![SourceTag::Arxiv]);
        let mut pre_filled = approved_paper("p1");
        pre_filled.pdf_url = Some("https://existing.example/p1.pdf".to_string());
        state.candidate_papers = vec![approved_paper("p2"), pre_filled];

        let update = extractor.extract(&state).await.unwrap();
        let approved = update.approved_papers.unwrap();
        let p1 = approved.iter().find(|p| p.paper_id == "p1").unwrap();
        let p2 = approved.iter().find(|p| p.paper_id == "p2").unwrap();
        assert_eq!(p1.pdf_url.as_deref(), Some("https://existing.example/p1.pdf"));
        assert_eq!(p2.pdf_url.as_deref(), Some("https://example.org/pdf/p2.pdf"));
    }
}
