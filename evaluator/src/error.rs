//! Error types for evaluation and similarity calls

use thiserror::Error;

use crate::backend::LlmError;

#[derive(Error, Debug, Clone)]
pub enum EvaluatorError {
    #[error("Evaluation timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Backend error: {0}")]
    Backend(#[from] LlmError),

    #[error("Evaluation parse error: {reason}")]
    Parse { reason: String, raw_text: String },

    /// Retry budget spent, or a non-retryable error was hit.
    #[error("Evaluation failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl EvaluatorError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EvaluatorError::Timeout { .. } | EvaluatorError::Parse { .. } => true,
            EvaluatorError::Backend(e) => !matches!(e, LlmError::RequestFailed(_)),
            EvaluatorError::Exhausted { .. } => false,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum SimilarityError {
    #[error("Similarity query timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Similarity transport error: {0}")]
    Transport(String),

    #[error("Invalid similarity response: {0}")]
    InvalidResponse(String),
}
