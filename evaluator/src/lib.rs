//! PoC Evaluator - scoring and similarity collaborators
//!
//! Provides the outbound side of evaluation:
//! - Trait-based LLM backends (OpenAI-compatible, mock)
//! - Structured-reply parsing with fallback extraction
//! - Retry policy with bounded exponential backoff and per-attempt timeout
//! - Audit trail of every evaluator attempt
//! - Similarity ranking (lexical in-process, or a remote HTTP service)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │          EvaluationClient            │
//! │   (timeout, RetryPolicy, audit)      │
//! └─────────────────┬────────────────────┘
//!                   │
//!                   ▼
//!        ┌─────────────────────┐        ┌─────────────────────┐
//!        │ EvaluationService   │        │ SimilarityService   │
//!        │ (LlmEvaluator)      │        │ (Lexical / Http)    │
//!        └──────────┬──────────┘        └─────────────────────┘
//!                   │
//!                   ▼
//!        ┌─────────────────────┐
//!        │ LlmBackend          │
//!        │ (OpenAI / Mock)     │
//!        └─────────────────────┘
//! ```

pub mod audit;
pub mod backend;
pub mod client;
pub mod error;
pub mod parse;
pub mod request;
pub mod retry;
pub mod service;
pub mod similarity;

// Re-export main types for convenience
pub use audit::{AttemptOutcome, AuditEntry, AuditStats, EvaluationAudit};
pub use backend::{LlmBackend, LlmError, MockBackend, MockReply, OpenAiBackend};
pub use client::{EvaluationClient, EvaluationSuccess, DEFAULT_EVALUATION_TIMEOUT};
pub use error::{EvaluatorError, SimilarityError};
pub use parse::{parse_evaluation, EvaluationResult};
pub use request::{EvaluationRequest, EVALUATION_SYSTEM_PROMPT};
pub use retry::RetryPolicy;
pub use service::{EvaluationService, LlmEvaluator};
pub use similarity::{
    CorpusDocument, HttpSimilarity, LexicalSimilarity, SimilarityMatch, SimilarityService,
};
