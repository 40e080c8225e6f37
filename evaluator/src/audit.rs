//! Audit trail of evaluator attempts.
//!
//! Every call to the evaluation service is logged, including retries, so an
//! operator can see why a submission ended up EVALUATION_FAILED.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Maximum entries in the audit log before pruning.
const MAX_AUDIT_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    ParseFailure,
    Timeout,
    BackendError,
}

/// One evaluator attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub entry_id: String,
    /// Shared by all attempts of one evaluation
    pub request_id: String,
    pub submission_hash: String,
    /// 1-based
    pub attempt: u32,
    pub service_id: String,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub avg_duration_ms: u64,
}

/// Bounded, newest-first log of evaluator attempts.
pub struct EvaluationAudit {
    entries: Arc<RwLock<VecDeque<AuditEntry>>>,
    max_entries: usize,
}

impl EvaluationAudit {
    pub fn new() -> Self {
        Self::with_max_entries(MAX_AUDIT_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries,
        }
    }

    pub async fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.write().await;
        entries.push_front(entry);

        // Prune if over limit
        while entries.len() > self.max_entries {
            entries.pop_back();
        }
    }

    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries.iter().take(limit).cloned().collect()
    }

    /// Attempts for one submission, newest first.
    pub async fn for_submission(&self, submission_hash: &str) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.submission_hash == submission_hash)
            .cloned()
            .collect()
    }

    pub async fn for_request(&self, request_id: &str) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> AuditStats {
        let entries = self.entries.read().await;

        let total = entries.len();
        let successes = entries
            .iter()
            .filter(|e| e.outcome == AttemptOutcome::Success)
            .count();
        let avg_duration_ms = if total > 0 {
            entries.iter().map(|e| e.duration_ms).sum::<u64>() / total as u64
        } else {
            0
        };

        AuditStats {
            total,
            successes,
            failures: total - successes,
            avg_duration_ms,
        }
    }
}

impl Default for EvaluationAudit {
    fn default() -> Self {
        Self::new()
    }
}
