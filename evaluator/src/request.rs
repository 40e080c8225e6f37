//! Evaluation requests and prompt assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use poc_archive::SubmissionRecord;

use crate::backend::CompletionRequest;

/// Instructions sent with every evaluation.
pub const EVALUATION_SYSTEM_PROMPT: &str = "\
You evaluate written contributions for the Proof-of-Contribution protocol.
Score the submission on three dimensions, each an integer from 0 to 10000:
- coherence: internal consistency and clarity of argument
- density: information per word, absence of filler
- novelty: ideas not already common knowledge
Award zero or more metals:
- gold: discovery of new knowledge
- silver: application of existing knowledge
- copper: alignment and support work
Reply with a single JSON object and nothing else:
{\"coherence\": <int>, \"density\": <int>, \"novelty\": <int>, \"metals\": [\"gold\"|\"silver\"|\"copper\", ...], \"rationale\": \"<short explanation>\"}";

/// One call to the evaluation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Unique per request, shared by all retry attempts
    pub request_id: String,
    pub submission_hash: String,
    pub title: String,
    pub category: String,
    pub text: String,
    pub requested_at: DateTime<Utc>,
}

impl EvaluationRequest {
    pub fn new(
        submission_hash: impl Into<String>,
        title: impl Into<String>,
        category: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            submission_hash: submission_hash.into(),
            title: title.into(),
            category: category.into(),
            text: text.into(),
            requested_at: Utc::now(),
        }
    }

    /// Build a request from an archived record.
    pub fn from_record(record: &SubmissionRecord) -> Self {
        Self::new(
            record.hash.clone(),
            record.title.clone(),
            record.category.clone(),
            record.text.clone(),
        )
    }

    /// User message carrying the submission.
    pub fn user_prompt(&self) -> String {
        format!(
            "Title: {}\nCategory: {}\n\n--- SUBMISSION ---\n{}\n--- END SUBMISSION ---",
            self.title, self.category, self.text
        )
    }

    /// Chat completion asking for a JSON verdict.
    pub fn to_completion(&self, max_tokens: u32, temperature: f32) -> CompletionRequest {
        CompletionRequest::user(self.user_prompt())
            .with_system(EVALUATION_SYSTEM_PROMPT)
            .with_max_tokens(max_tokens)
            .with_temperature(temperature)
            .with_json_output()
    }
}
