//! Concrete `LmBackend` speaking the OpenAI-compatible chat-completion wire
//! protocol (§6, SPEC_FULL.md §4.3.1): request
//! `{model, messages, temperature, max_tokens, response_format?, stream?, stream_options?}`,
//! response either a single `{choices[0].message.content, usage}` object or
//! an SSE stream of chunks each carrying `choices[0].delta.content` with a
//! final usage frame when `include_usage=true`.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::errors::LmError;

use super::{ChatMessage, ChatRequest, ChatResponse, ChatRole, LmBackend, TokenCallback, Usage};

pub struct ReqwestLmBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ReqwestLmBackend {
    pub fn new(api_key: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client builds with static TLS config");
        Self {
            client,
            api_key,
            base_url,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn role_str(role: &ChatRole) -> &'static str {
        match role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|m: &ChatMessage| json!({"role": Self::role_str(&m.role), "content": m.content}))
            .collect();
        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    fn classify_status(status: reqwest::StatusCode) -> Option<LmError> {
        if status.as_u16() == 429 || status.is_server_error() {
            Some(LmError::Transient(format!("HTTP {status}")))
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessagePayload,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    content: String,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LmBackend for ReqwestLmBackend {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, LmError> {
        let body = self.body(&request, false);
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    LmError::Transient(e.to_string())
                } else {
                    LmError::Request(e)
                }
            })?;

        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        if !resp.status().is_success() {
            return Err(LmError::Protocol(format!("HTTP {}", resp.status())));
        }

        let parsed: CompletionResponse = resp.json().await.map_err(LmError::Request)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            usage: Usage {
                prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
                completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
            },
        })
    }

    async fn chat_completion_streaming(
        &self,
        request: ChatRequest,
        on_token: TokenCallback,
    ) -> Result<ChatResponse, LmError> {
        let body = self.body(&request, true);
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    LmError::Transient(e.to_string())
                } else {
                    LmError::Request(e)
                }
            })?;

        if let Some(err) = Self::classify_status(resp.status()) {
            return Err(err);
        }
        if !resp.status().is_success() {
            return Err(LmError::Protocol(format!("HTTP {}", resp.status())));
        }

        let mut stream = resp.bytes_stream().eventsource();
        let mut full = String::new();
        let mut usage = Usage::default();

        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| LmError::Transient(e.to_string()))?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: StreamChunk = match serde_json::from_str(&event.data) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if let Some(choice) = chunk.choices.into_iter().next()
                && let Some(delta) = choice.delta.content
            {
                on_token(&delta);
                full.push_str(&delta);
            }
            if let Some(u) = chunk.usage {
                usage.prompt_tokens = u.prompt_tokens;
                usage.completion_tokens = u.completion_tokens;
            }
        }

        Ok(ChatResponse { content: full, usage })
    }
}
