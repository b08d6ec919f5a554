//! Reflection (C5.6, §4.5.6).

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LmAdapter};
use crate::models::{PartialStateUpdate, Reflection as ReflectionModel, SessionState};
use crate::router::TaskType;

use super::{Agent, AgentError};

#[async_trait]
pub trait Reflection: Send + Sync {
    async fn reflect(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError>;
}

pub struct DefaultReflection {
    lm: Arc<LmAdapter>,
}

impl DefaultReflection {
    pub fn new(lm: Arc<LmAdapter>) -> Self {
        Self { lm }
    }
}

#[async_trait]
impl Reflection for DefaultReflection {
    async fn reflect(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        if state.qa_errors.is_empty() {
            return Ok(PartialStateUpdate::new().log("reflection: no qa_errors, skipping"));
        }

        let system = "A literature review draft failed quality review. Categorize each failure \
            reason (citation_out_of_bounds, missing_citation, uncited_paper, low_entailment, or \
            structural), propose a concrete fix strategy for each, note whether the writer alone \
            can fix it (vs. needing fresh retrieval), and decide whether a retry is worthwhile."
            .to_string();
        let user = format!("Failure reasons:\n{}", state.qa_errors.join("\n"));

        let (reflection, _usage) = self
            .lm
            .structured_completion::<ReflectionModel>(CompletionRequest {
                messages: vec![
                    ChatMessage {
                        role: ChatRole::System,
                        content: system,
                    },
                    ChatMessage {
                        role: ChatRole::User,
                        content: user,
                    },
                ],
                temperature: 0.2,
                max_tokens: Some(1000),
                model_id: state.model_id.as_deref(),
                task_type: Some(TaskType::Reflection),
                token_callback: None,
            })
            .await
            .map_err(AgentError::Lm)?;

        Ok(PartialStateUpdate {
            reflection: Some(Some(reflection)),
            ..PartialStateUpdate::new()
        }
        .log("reflection: categorized qa failures")
        .handoff("critic", "reflection"))
    }
}

#[async_trait]
impl Agent for DefaultReflection {
    async fn run(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        self.reflect(state).await
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
            max_output_tokens: 4000,
            is_local: true,
            cost_tier: CostTier::Low,
            reasoning_score: 6.0,
            creativity_score: 6.0,
            latency_score: 6.0,
            enabled: true,
        }]))
    }

    #[tokio::test]
    async fn skips_when_no_qa_errors() {
        let backend = Arc::new(MockLmBackend::with_fixed_response("{}".to_string()));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let reflection = DefaultReflection::new(lm);
        let state = SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]);
        let update = reflection.reflect(&state).await.unwrap();
        assert_eq!(update.reflection, None);
    }

    #[tokio::test]
    async fn categorizes_qa_errors_into_reflection() {
        let backend = Arc::new(MockLmBackend::with_fixed_response(
            r#"{"entries": [{"error_category": "citation_out_of_bounds", "error_detail": "cite 5 invalid",
                "fix_strategy": "cite an in-range paper", "fixable_by_writer": true}],
                "should_retry": true, "retry_target": "writer", "summary": "fixable by writer"}"#
                .to_string(),
        ));
        let lm = Arc::new(LmAdapter::new(
            backend,
            registry(),
            Arc::new(LmSemaphores::new(2, 2, 3)),
            Arc::new(CostLedger::new()),
        ));
        let reflection = DefaultReflection::new(lm);
        let mut state = SessionState::new("t1", "q", OutputLanguage::En, vec![SourceTag::Arxiv]);
        state.qa_errors = vec!["citation_out_of_bounds: {cite:5} is outside 1..=1".to_string()];
        let update = reflection.reflect(&state).await.unwrap();
        let reflection = update.reflection.unwrap().unwrap();
        assert!(reflection.should_retry);
        assert_eq!(reflection.entries.len(), 1);
    }
}
