//! Offline backend used by the test suite and the CLI demo's offline mode.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::LmError;

use super::{ChatRequest, ChatResponse, LmBackend, TokenCallback, Usage};

enum Behavior {
    Fixed(String),
    /// Queue of responses, consumed in order, to script a multi-call agent.
    Queue(Mutex<Vec<String>>),
    /// Always fails with a transient error, to exercise the retry loop.
    AlwaysTransient,
}

pub struct MockLmBackend {
    behavior: Behavior,
}

impl MockLmBackend {
    pub fn with_fixed_response(content: String) -> Self {
        Self {
            behavior: Behavior::Fixed(content),
        }
    }

    pub fn with_queue(responses: Vec<String>) -> Self {
        Self {
            behavior: Behavior::Queue(Mutex::new(responses)),
        }
    }

    pub fn always_transient() -> Self {
        Self {
            behavior: Behavior::AlwaysTransient,
        }
    }

    fn next_content(&self) -> Result<String, LmError> {
        match &self.behavior {
            Behavior::Fixed(s) => Ok(s.clone()),
            Behavior::Queue(q) => {
                let mut guard = q.lock().unwrap();
                if guard.is_empty() {
                    Err(LmError::Protocol("mock queue exhausted".to_string()))
                } else {
                    Ok(guard.remove(0))
                }
            }
            Behavior::AlwaysTransient => Err(LmError::Transient("mock transient failure".to_string())),
        }
    }
}

#[async_trait]
impl LmBackend for MockLmBackend {
    async fn chat_completion(&self, _request: ChatRequest) -> Result<ChatResponse, LmError> {
        let content = self.next_content()?;
        Ok(ChatResponse {
            content,
            usage: Usage {
                prompt_tokens: Some(100),
                completion_tokens: Some(50),
            },
        })
    }

    async fn chat_completion_streaming(
        &self,
        _request: ChatRequest,
        on_token: TokenCallback,
    ) -> Result<ChatResponse, LmError> {
        let content = self.next_content()?;
        for ch in content.chars() {
            on_token(&ch.to_string());
        }
        Ok(ChatResponse {
            content,
            usage: Usage {
                prompt_tokens: Some(100),
                completion_tokens: Some(50),
            },
        })
    }
}
