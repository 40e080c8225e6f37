//! Mock LLM backend for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this content
    Content(String),
    /// Fail with this error
    Error(LlmError),
    /// Sleep, then return the content (exercises timeouts)
    Delayed(Duration, String),
}

/// Mock backend for testing.
///
/// Replies are served from a script in order; once it runs dry every call
/// gets the default response.
pub struct MockBackend {
    model_id: String,
    available: AtomicBool,
    default_response: String,
    script: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicU32,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            available: AtomicBool::new(true),
            default_response: "Mock response".to_string(),
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Set the response used when the script is empty.
    pub fn with_response(mut self, content: impl Into<String>) -> Self {
        self.default_response = content.into();
        self
    }

    /// Queue scripted replies.
    pub fn with_script(mut self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.script.get_mut().extend(replies);
        self
    }

    /// Queue `count` copies of `error` ahead of the default response.
    pub fn failing(self, count: usize, error: LlmError) -> Self {
        self.with_script(std::iter::repeat(MockReply::Error(error)).take(count))
    }

    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Number of times `complete` was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub async fn prompts(&self) -> Vec<CompletionRequest> {
        self.prompts.lock().await.clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(LlmError::Unavailable("Mock backend disabled".to_string()));
        }

        // Estimate token counts
        let prompt_tokens: u32 = request
            .messages
            .iter()
            .map(|m| m.content.len() as u32 / 4)
            .sum();
        self.prompts.lock().await.push(request);

        let reply = self.script.lock().await.pop_front();
        let content = match reply {
            Some(MockReply::Content(content)) => content,
            Some(MockReply::Error(e)) => return Err(e),
            Some(MockReply::Delayed(delay, content)) => {
                tokio::time::sleep(delay).await;
                content
            }
            None => self.default_response.clone(),
        };

        Ok(CompletionResponse {
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens,
                completion_tokens: content.len() as u32 / 4,
            },
            content,
        })
    }
}
