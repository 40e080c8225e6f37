//! The evaluation service seam.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::backend::{FinishReason, LlmBackend};
use crate::error::EvaluatorError;
use crate::parse::{parse_evaluation, EvaluationResult};
use crate::request::EvaluationRequest;

/// Scores one submission. One call is one attempt; retrying is the
/// caller's business.
#[async_trait]
pub trait EvaluationService: Send + Sync {
    fn id(&self) -> &str;

    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, EvaluatorError>;
}

/// Evaluation through a chat-completion model.
pub struct LlmEvaluator {
    backend: Arc<dyn LlmBackend>,
    max_tokens: u32,
    temperature: f32,
}

impl LlmEvaluator {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            max_tokens: 1024,
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl EvaluationService for LlmEvaluator {
    fn id(&self) -> &str {
        self.backend.id()
    }

    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, EvaluatorError> {
        let completion = request.to_completion(self.max_tokens, self.temperature);
        let response = self.backend.complete(completion).await?;

        debug!(
            request_id = %request.request_id,
            hash = %request.submission_hash,
            tokens = response.usage.total(),
            truncated = response.finish_reason == FinishReason::Length,
            "Evaluator responded"
        );

        Ok(parse_evaluation(&response.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[tokio::test]
    async fn test_llm_evaluator_parses_reply() {
        let backend = Arc::new(MockBackend::default().with_response(
            r#"{"coherence": 8500, "density": 9000, "novelty": 8000, "metals": ["gold"]}"#,
        ));
        let evaluator = LlmEvaluator::new(backend.clone());

        let request = EvaluationRequest::new("h1", "Paper A", "scientific", "text");
        let result = evaluator.evaluate(&request).await.unwrap();

        assert!(result.is_success());
        let prompts = backend.prompts().await;
        assert!(prompts[0].json_output);
        assert!(prompts[0].messages[0].content.contains("Paper A"));
    }

    #[tokio::test]
    async fn test_llm_evaluator_surfaces_parse_failure() {
        let backend = Arc::new(MockBackend::default().with_response("no idea"));
        let evaluator = LlmEvaluator::new(backend);

        let request = EvaluationRequest::new("h1", "t", "c", "text");
        let result = evaluator.evaluate(&request).await.unwrap();
        assert!(matches!(result, EvaluationResult::ParseFailure { .. }));
    }
}
