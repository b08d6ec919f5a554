//! Planner (C5.1, §4.5.1).

use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::{ChatMessage, ChatRole, CompletionRequest, LmAdapter};
use crate::models::{FlatKeywordList, MessageRole, PartialStateUpdate, ResearchPlan, SessionState};
use crate::router::TaskType;

use super::{Agent, AgentError};

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError>;
}

/// Minimum query length that triggers chain-of-thought decomposition
/// (§4.5.1) rather than a flat keyword request.
const SUBSTANTIAL_QUERY_MIN_LEN: usize = 10;

pub struct DefaultPlanner {
    lm: Arc<LmAdapter>,
    max_keywords: usize,
    max_conversation_turns: usize,
}

impl DefaultPlanner {
    pub fn new(lm: Arc<LmAdapter>, max_keywords: usize, max_conversation_turns: usize) -> Self {
        Self {
            lm,
            max_keywords,
            max_conversation_turns,
        }
    }

    fn conversation_context(&self, state: &SessionState) -> Option<String> {
        if !state.is_continuation || state.messages.is_empty() {
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
}

#[async_trait]
impl Planner for DefaultPlanner {
    async fn plan(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        let substantial = state.user_query.chars().count() >= SUBSTANTIAL_QUERY_MIN_LEN;

        if substantial && !state.is_continuation {
            let system = "You are a research planning assistant. Decompose the user's query \
                into focused sub-questions, each with its own keywords, a preferred scholarly \
                source, a 1-based priority, and an estimated paper count."
                .to_string();
            let (plan, _usage) = self
                .lm
                .structured_completion::<ResearchPlan>(CompletionRequest {
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
                    temperature: 0.3,
                    max_tokens: Some(2000),
                    model_id: state.model_id.as_deref(),
                    task_type: Some(TaskType::Planning),
                    token_callback: None,
                })
                .await
                .map_err(AgentError::Lm)?;

            let keywords = plan.flatten_keywords(self.max_keywords);
            Ok(PartialStateUpdate {
                search_keywords: Some(keywords),
                research_plan: Some(Some(plan)),
                ..PartialStateUpdate::new()
            }
            .log("planner: produced chain-of-thought research plan")
            .handoff("start", "planner"))
        } else {
            let mut system = "You are a research planning assistant. Extract a short list of \
                search keywords (at most a handful) that best capture the user's query."
                .to_string();
            if let Some(context) = self.conversation_context(state) {
                system = format!("{system}\n\n{context}");
            }
            let (flat, _usage) = self
                .lm
                .structured_completion::<FlatKeywordList>(CompletionRequest {
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
                    temperature: 0.3,
                    max_tokens: Some(500),
                    model_id: state.model_id.as_deref(),
                    task_type: Some(TaskType::Planning),
                    token_callback: None,
                })
                .await
                .map_err(AgentError::Lm)?;

            let keywords: Vec<String> = flat.keywords.into_iter().take(self.max_keywords).collect();
            Ok(PartialStateUpdate {
                search_keywords: Some(keywords),
                research_plan: Some(None),
                ..PartialStateUpdate::new()
            }
            .log("planner: produced flat keyword list")
            .handoff("start", "planner"))
        }
    }
}

#[async_trait]
impl Agent for DefaultPlanner {
    async fn run(&self, state: &SessionState) -> Result<PartialStateUpdate, AgentError> {
        self.plan(state).await
    }
}
