//! Retrying, time-bounded evaluation client.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use poc_archive::{Metal, Scores};

use crate::audit::{AttemptOutcome, AuditEntry, EvaluationAudit};
use crate::error::EvaluatorError;
use crate::parse::EvaluationResult;
use crate::request::EvaluationRequest;
use crate::retry::RetryPolicy;
use crate::service::EvaluationService;

/// Default per-attempt timeout.
pub const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_secs(30);

/// A parsed verdict and how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSuccess {
    pub request_id: String,
    pub scores: Scores,
    pub metals: BTreeSet<Metal>,
    pub rationale: Option<String>,
    pub attempts: u32,
}

/// Wraps an `EvaluationService` with a timeout, a retry policy and an
/// audit trail.
pub struct EvaluationClient {
    service: Arc<dyn EvaluationService>,
    policy: RetryPolicy,
    timeout: Duration,
    audit: Arc<EvaluationAudit>,
}

impl EvaluationClient {
    pub fn new(service: Arc<dyn EvaluationService>, policy: RetryPolicy) -> Self {
        Self {
            service,
            policy,
            timeout: DEFAULT_EVALUATION_TIMEOUT,
            audit: Arc::new(EvaluationAudit::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_audit(mut self, audit: Arc<EvaluationAudit>) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit(&self) -> &Arc<EvaluationAudit> {
        &self.audit
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Evaluate with retries.
    ///
    /// Timeouts, transport errors and unparseable replies are retried with
    /// backoff. Any failure that ends the loop is reported as
    /// `EvaluatorError::Exhausted` carrying the attempt count.
    pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationSuccess, EvaluatorError> {
        let max_attempts = self.policy.attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let started_at = Utc::now();
            let start = Instant::now();

            let result = match tokio::time::timeout(self.timeout, self.service.evaluate(request)).await {
                Err(_) => Err(EvaluatorError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }),
                Ok(Ok(EvaluationResult::Success {
                    scores,
                    metals,
                    rationale,
                })) => Ok(EvaluationSuccess {
                    request_id: request.request_id.clone(),
                    scores,
                    metals,
                    rationale,
                    attempts: attempt,
                }),
                Ok(Ok(EvaluationResult::ParseFailure { raw_text, reason })) => {
                    Err(EvaluatorError::Parse { reason, raw_text })
                }
                Ok(Err(e)) => Err(e),
            };

            let outcome = match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(EvaluatorError::Timeout { .. }) => AttemptOutcome::Timeout,
                Err(EvaluatorError::Parse { .. }) => AttemptOutcome::ParseFailure,
                Err(_) => AttemptOutcome::BackendError,
            };
            self.audit
                .record(AuditEntry {
                    entry_id: uuid::Uuid::new_v4().to_string(),
                    request_id: request.request_id.clone(),
                    submission_hash: request.submission_hash.clone(),
                    attempt,
                    service_id: self.service.id().to_string(),
                    outcome,
                    error: result.as_ref().err().map(|e| e.to_string()),
                    started_at,
                    duration_ms: start.elapsed().as_millis() as u64,
                })
                .await;

            match result {
                Ok(success) => {
                    info!(
                        request_id = %request.request_id,
                        hash = %request.submission_hash,
                        attempts = attempt,
                        "Evaluation succeeded"
                    );
                    return Ok(success);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(
                        hash = %request.submission_hash,
                        attempt = attempt,
                        error = %e,
                        "Evaluation failed with non-retryable error"
                    );
                    return Err(EvaluatorError::Exhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        hash = %request.submission_hash,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "Evaluation attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_after(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        Err(EvaluatorError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
