//! LM invocation adapter (C3, SPEC_FULL.md §4.3) and its wire backend
//! (§4.3.1).

pub mod backend_mock;
pub mod backend_reqwest;
pub mod client_cache;
pub mod cost;
pub mod schema_hint;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::errors::LmError;
use crate::router::{ModelRegistry, TaskType};

pub use backend_mock::MockLmBackend;
pub use backend_reqwest::ReqwestLmBackend;
pub use client_cache::LmClientCache;
pub use cost::CostLedger;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
    pub stream: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
}

/// Invoked once per streamed chunk when a per-invocation token callback is
/// in context (§4.3 "Streaming mode").
pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// The wire-level contract C3 speaks to an external LM backend (§6, §4.3.1).
/// Out of scope is any particular vendor's server; in scope is this trait
/// and the concrete `reqwest`-backed implementation of it.
#[async_trait]
pub trait LmBackend: Send + Sync {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, LmError>;

    async fn chat_completion_streaming(
        &self,
        request: ChatRequest,
        on_token: TokenCallback,
    ) -> Result<ChatResponse, LmError>;
}

/// Best-effort JSON repair for near-miss LM output: trims Markdown code
/// fences, and closes a trailing unterminated object/array/string. The
/// repair parser itself is an external collaborator (Design Note §9); this
/// is the crate's bundled default implementation of that seam.
pub fn repair_json(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let stripped = stripped.strip_suffix("```").unwrap_or(stripped).trim();

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(stripped) {
        return Some(v);
    }

    // Try closing unbalanced braces/brackets, the most common truncation
    // failure mode for streamed completions cut off mid-object.
    let mut depth_braces = 0i32;
    let mut depth_brackets = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for ch in stripped.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth_braces += 1,
            '}' if !in_string => depth_braces -= 1,
            '[' if !in_string => depth_brackets += 1,
            ']' if !in_string => depth_brackets -= 1,
            _ => {}
        }
    }
    let mut repaired = stripped.to_string();
    if in_string {
        repaired.push('"');
    }
    for _ in 0..depth_brackets.max(0) {
        repaired.push(']');
    }
    for _ in 0..depth_braces.max(0) {
        repaired.push('}');
    }
    serde_json::from_str::<serde_json::Value>(&repaired).ok()
}

/// Shared, global LM-concurrency permits (§5). One instance is constructed
/// per process and injected into every agent that calls the LM adapter.
pub struct LmSemaphores {
    pub llm: Arc<Semaphore>,
    pub claim_verification: Arc<Semaphore>,
    pub fulltext: Arc<Semaphore>,
}

impl LmSemaphores {
    pub fn new(llm_concurrency: usize, claim_verification_concurrency: usize, fulltext_concurrency: usize) -> Self {
        Self {
            llm: Arc::new(Semaphore::new(llm_concurrency)),
            claim_verification: Arc::new(Semaphore::new(claim_verification_concurrency)),
            fulltext: Arc::new(Semaphore::new(fulltext_concurrency)),
        }
    }
}

/// The C3 adapter: router-aware, schema-coached, retrying, cost-tracked.
pub struct LmAdapter {
    backend: Arc<dyn LmBackend>,
    registry: Arc<ModelRegistry>,
    semaphores: Arc<LmSemaphores>,
    cost_ledger: Arc<CostLedger>,
}

/// Everything `structured_completion` needs beyond the messages themselves.
pub struct CompletionRequest<'a> {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub model_id: Option<&'a str>,
    pub task_type: Option<TaskType>,
    pub token_callback: Option<TokenCallback>,
}

impl LmAdapter {
    pub fn new(
        backend: Arc<dyn LmBackend>,
        registry: Arc<ModelRegistry>,
        semaphores: Arc<LmSemaphores>,
        cost_ledger: Arc<CostLedger>,
    ) -> Self {
        Self {
            backend,
            registry,
            semaphores,
            cost_ledger,
        }
    }

    fn resolve_model(&self, model_id: Option<&str>, task_type: Option<TaskType>) -> Option<String> {
        if let Some(id) = model_id {
            return Some(id.to_string());
        }
        let task_type = task_type?;
        self.registry.select(task_type).map(|m| m.model_id.clone())
    }

    /// `structured_completion(messages, response_schema, temperature, max_tokens?, model_id?, task_type?)`
    /// (§4.3). Generic over the expected response shape `T`.
    pub async fn structured_completion<T>(&self, req: CompletionRequest<'_>) -> Result<(T, Usage), LmError>
    where
        T: for<'de> Deserialize<'de> + JsonSchema,
    {
        let model_id = self
            .resolve_model(req.model_id, req.task_type)
            .ok_or_else(|| LmError::Protocol("no model available for task".to_string()))?;
        let model_cfg = self.registry.get(&model_id);
        let model_name = model_cfg.map(|m| m.model_name.clone()).unwrap_or_else(|| model_id.clone());
        let json_mode = model_cfg.map(|m| m.supports_json_mode).unwrap_or(false);

        let schema_hint = schema_hint::build_schema_prompt::<T>();
        let mut messages = req.messages;
        if let Some(first) = messages.iter_mut().find(|m| matches!(m.role, ChatRole::System)) {
            first.content = format!("{}\n\n{}", first.content, schema_hint);
        } else {
            messages.insert(
                0,
                ChatMessage {
                    role: ChatRole::System,
                    content: schema_hint,
                },
            );
        }

        // The global LM permit is held across the full RPC including
        // streaming consumption (Design Note §9 "Cooperative concurrency").
        let _permit = self
            .semaphores
            .llm
            .acquire()
            .await
            .expect("semaphore never closed");

        let request = ChatRequest {
            model: model_name.clone(),
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            json_mode,
            stream: req.token_callback.is_some(),
        };

        let response = self.call_with_retry(request, req.token_callback).await?;

        self.cost_ledger.record(
            &model_name,
            req.task_type,
            response.usage.prompt_tokens.unwrap_or(0),
            response.usage.completion_tokens.unwrap_or(0),
        );

        let parsed = self.parse_and_validate::<T>(&response.content)?;
        Ok((parsed, response.usage))
    }

    fn parse_and_validate<T>(&self, raw: &str) -> Result<T, LmError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value: serde_json::Value = serde_json::from_str(raw)
            .ok()
            .or_else(|| repair_json(raw))
            .ok_or_else(|| LmError::Protocol(format!("could not parse LM output as JSON: {raw}")))?;

        if schema_hint::looks_like_schema_echo(&value) {
            return Err(LmError::ReturnedSchema);
        }

        serde_json::from_value::<T>(value)
            .map_err(|e| LmError::Protocol(format!("response did not match expected schema: {e}")))
    }

    /// Exponential backoff with jitter, at most 4 attempts (§4.3, §7).
    async fn call_with_retry(
        &self,
        request: ChatRequest,
        token_callback: Option<TokenCallback>,
    ) -> Result<ChatResponse, LmError> {
        const MAX_ATTEMPTS: u32 = 4;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = if let Some(cb) = &token_callback {
                self.backend
                    .chat_completion_streaming(request.clone(), Arc::clone(cb))
                    .await
            } else {
                self.backend.chat_completion(request.clone()).await
            };

            match result {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let base_ms = 200u64 * 2u64.pow(attempt - 1);
                    let jitter_ms = rand::thread_rng().gen_range(0..base_ms.max(1));
                    tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Clone for ChatRequest {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            messages: self.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_mode: self.json_mode,
            stream: self.stream,
        }
    }
}
