//! Evaluation orchestration.
//!
//! Per-submission state machine:
//!
//! ```text
//! SUBMITTED ──redundancy check──► UNQUALIFIED (RedundantSubmission)
//!     │
//!     ▼
//! EVALUATING ──evaluator──► QUALIFIED ──► TokenLedger::allocate
//!     │                 └─► UNQUALIFIED (BelowThreshold / NoPermittedMetals)
//!     └── retries spent ──► EVALUATION_FAILED
//! ```
//!
//! The redundancy check compares a submission only with records registered
//! before it (every status), and always runs before the evaluator is called.
//! A record found in EVALUATING is resumed without repeating the check.
//!
//! Dropping an `evaluate` future leaves the record at most EVALUATING. The
//! commit phase (QUALIFIED transition and allocation) runs on its own task
//! and finishes even if the caller goes away.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use poc_archive::{
    CachedSimilarity, ContributionArchive, Epoch, EvaluationOutcome, Metal, OutcomeReason,
    RecordFilter, Scores, SubmissionRecord, SubmissionStatus,
};
use poc_evaluator::{
    CorpusDocument, EvaluationClient, EvaluationRequest, EvaluatorError, SimilarityError,
    SimilarityService,
};
use poc_ledger::{AllocationRequest, EpochSchedule, LedgerError, TokenAllocation, TokenLedger};

use crate::config::RedundancyConfig;
use crate::error::EngineError;

/// Final result of one `evaluate` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Qualified and paid
    Qualified {
        record: SubmissionRecord,
        allocation: TokenAllocation,
    },
    /// Qualified, but the ledger refused the allocation (epoch cap)
    QualifiedUnpaid {
        record: SubmissionRecord,
        error: String,
    },
    Unqualified {
        record: SubmissionRecord,
        reason: OutcomeReason,
    },
    /// Evaluator never produced a usable verdict
    Failed {
        record: SubmissionRecord,
        attempts: u32,
        last_error: String,
    },
}

impl Verdict {
    pub fn record(&self) -> &SubmissionRecord {
        match self {
            Verdict::Qualified { record, .. }
            | Verdict::QualifiedUnpaid { record, .. }
            | Verdict::Unqualified { record, .. }
            | Verdict::Failed { record, .. } => record,
        }
    }
}

/// How scores and awarded metals map onto the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Qualified {
        epoch: Epoch,
        metals: BTreeSet<Metal>,
    },
    BelowThreshold {
        density: u32,
    },
    NoPermittedMetals {
        epoch: Epoch,
        awarded: BTreeSet<Metal>,
    },
}

/// Resolve the epoch from density (highest threshold first) and keep only
/// the awarded metals that epoch permits. Dropped metals are never moved
/// to another epoch.
pub fn classify(schedule: &EpochSchedule, scores: &Scores, awarded: &BTreeSet<Metal>) -> Classification {
    let Some(policy) = schedule.resolve(scores.density) else {
        return Classification::BelowThreshold {
            density: scores.density,
        };
    };

    let metals: BTreeSet<Metal> = awarded
        .iter()
        .copied()
        .filter(|m| policy.permits(*m))
        .collect();

    if metals.is_empty() {
        Classification::NoPermittedMetals {
            epoch: policy.epoch,
            awarded: awarded.clone(),
        }
    } else {
        Classification::Qualified {
            epoch: policy.epoch,
            metals,
        }
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// QUALIFIED records inspected
    pub checked: usize,
    /// Newly paid in this pass
    pub allocated: Vec<String>,
    /// Still unpaid, with the ledger's reason
    pub unpaid: Vec<(String, String)>,
}

/// Drives submissions through redundancy check, evaluation and allocation.
pub struct EvaluationOrchestrator {
    archive: Arc<ContributionArchive>,
    ledger: Arc<TokenLedger>,
    evaluator: Arc<EvaluationClient>,
    similarity: Arc<dyn SimilarityService>,
    redundancy: RedundancyConfig,
    similarity_timeout: Duration,
}

impl EvaluationOrchestrator {
    pub fn new(
        archive: Arc<ContributionArchive>,
        ledger: Arc<TokenLedger>,
        evaluator: Arc<EvaluationClient>,
        similarity: Arc<dyn SimilarityService>,
    ) -> Self {
        Self {
            archive,
            ledger,
            evaluator,
            similarity,
            redundancy: RedundancyConfig::default(),
            similarity_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_redundancy(mut self, redundancy: RedundancyConfig) -> Self {
        self.redundancy = redundancy;
        self
    }

    pub fn with_similarity_timeout(mut self, timeout: Duration) -> Self {
        self.similarity_timeout = timeout;
        self
    }

    /// Hand a DRAFT (or EVALUATION_FAILED) record in for evaluation.
    pub async fn submit(&self, hash: &str) -> Result<SubmissionRecord, EngineError> {
        Ok(self
            .archive
            .transition_status(hash, SubmissionStatus::Submitted)
            .await?)
    }

    /// Evaluate a SUBMITTED record, or resume one left in EVALUATING.
    pub async fn evaluate(&self, hash: &str) -> Result<Verdict, EngineError> {
        let record = self.archive.get(hash).await?;

        let record = match record.status {
            SubmissionStatus::Submitted => match self.check_redundancy(record).await? {
                Ok(evaluating) => evaluating,
                Err(verdict) => return Ok(verdict),
            },
            SubmissionStatus::Evaluating => {
                debug!(hash = %hash, "Resuming evaluation");
                record
            }
            status => {
                return Err(EngineError::NotEvaluable {
                    hash: hash.to_string(),
                    status,
                })
            }
        };

        let request = EvaluationRequest::from_record(&record);
        let success = match self.evaluator.evaluate(&request).await {
            Ok(success) => success,
            Err(e) => return self.fail(record, e).await,
        };
        let attempts = record.evaluation_attempts + success.attempts;

        let mut outcome = EvaluationOutcome::new()
            .with_scores(success.scores)
            .with_attempts(attempts);
        if let Some(rationale) = success.rationale {
            outcome = outcome.with_rationale(rationale);
        }

        match classify(self.ledger.schedule(), &success.scores, &success.metals) {
            Classification::Qualified { epoch, metals } => {
                let outcome = outcome.with_epoch(epoch).with_metals(metals);
                let archive = self.archive.clone();
                let ledger = self.ledger.clone();
                let hash = hash.to_string();

                tokio::spawn(async move { commit(&archive, &ledger, &hash, outcome).await })
                    .await
                    .map_err(|e| EngineError::Commit(e.to_string()))?
            }
            Classification::BelowThreshold { density } => {
                let reason = OutcomeReason::BelowThreshold { density };
                self.unqualify(hash, outcome, reason).await
            }
            Classification::NoPermittedMetals { epoch, awarded } => {
                let reason = OutcomeReason::NoPermittedMetals {
                    epoch,
                    awarded: awarded.into_iter().collect(),
                };
                self.unqualify(hash, outcome.with_epoch(epoch), reason).await
            }
        }
    }

    /// Compare against every earlier record.
    ///
    /// `Ok(record)` is the record now in EVALUATING; `Err(verdict)` means it
    /// was redundant and is now UNQUALIFIED.
    async fn check_redundancy(
        &self,
        record: SubmissionRecord,
    ) -> Result<Result<SubmissionRecord, Verdict>, EngineError> {
        let corpus: Vec<CorpusDocument> = self
            .archive
            .find_similar_candidates(Some(record.sequence))
            .await
            .into_iter()
            .map(|c| CorpusDocument::new(c.hash, c.text))
            .collect();

        let matches = if corpus.is_empty() {
            Vec::new()
        } else {
            tokio::time::timeout(
                self.similarity_timeout,
                self.similarity.rank(&record.text, &corpus),
            )
            .await
            .map_err(|_| SimilarityError::Timeout {
                after_ms: self.similarity_timeout.as_millis() as u64,
            })??
        };

        let cache: Vec<CachedSimilarity> = matches
            .iter()
            .take(self.redundancy.cache_top_k)
            .map(|m| CachedSimilarity {
                hash: m.hash.clone(),
                similarity: m.similarity,
            })
            .collect();

        if let Some(best) = matches.first() {
            if best.similarity >= self.redundancy.threshold {
                let reason = OutcomeReason::RedundantSubmission {
                    similarity: best.similarity,
                    matched_hash: best.hash.clone(),
                };
                info!(
                    hash = %record.hash,
                    matched = %best.hash,
                    similarity = best.similarity,
                    "Rejected redundant submission"
                );
                let record = self
                    .archive
                    .record_outcome(
                        &record.hash,
                        SubmissionStatus::Unqualified,
                        EvaluationOutcome::new()
                            .with_reason(reason.clone())
                            .with_similarity_cache(cache),
                    )
                    .await?;
                return Ok(Err(Verdict::Unqualified { record, reason }));
            }
        }

        let record = self
            .archive
            .record_outcome(
                &record.hash,
                SubmissionStatus::Evaluating,
                EvaluationOutcome::new().with_similarity_cache(cache),
            )
            .await?;
        Ok(Ok(record))
    }

    async fn fail(&self, record: SubmissionRecord, error: EvaluatorError) -> Result<Verdict, EngineError> {
        let (attempts, last_error) = match error {
            EvaluatorError::Exhausted {
                attempts,
                last_error,
            } => (attempts, last_error),
            other => (1, other.to_string()),
        };
        let total_attempts = record.evaluation_attempts + attempts;

        warn!(
            hash = %record.hash,
            attempts = attempts,
            error = %last_error,
            "Evaluation failed"
        );

        let record = self
            .archive
            .record_outcome(
                &record.hash,
                SubmissionStatus::EvaluationFailed,
                EvaluationOutcome::new()
                    .with_attempts(total_attempts)
                    .with_reason(OutcomeReason::EvaluationFailed {
                        attempts,
                        last_error: last_error.clone(),
                    }),
            )
            .await?;

        Ok(Verdict::Failed {
            record,
            attempts,
            last_error,
        })
    }

    async fn unqualify(
        &self,
        hash: &str,
        outcome: EvaluationOutcome,
        reason: OutcomeReason,
    ) -> Result<Verdict, EngineError> {
        let record = self
            .archive
            .record_outcome(
                hash,
                SubmissionStatus::Unqualified,
                outcome.with_reason(reason.clone()),
            )
            .await?;
        info!(hash = %hash, reason = ?reason, "Submission unqualified");
        Ok(Verdict::Unqualified { record, reason })
    }

    /// Pay every QUALIFIED record that has no allocation yet.
    ///
    /// Covers a crash between the QUALIFIED transition and the ledger write.
    pub async fn reconcile_allocations(&self) -> Result<ReconcileReport, EngineError> {
        let qualified = self
            .archive
            .query(&RecordFilter::all().with_status(SubmissionStatus::Qualified))
            .await;

        let mut report = ReconcileReport {
            checked: qualified.len(),
            ..Default::default()
        };

        for record in qualified {
            if self.ledger.get_allocation(&record.hash).await.is_some() {
                continue;
            }
            let hash = record.hash.clone();
            match allocate_for(&self.archive, &self.ledger, record).await? {
                Verdict::Qualified { .. } => report.allocated.push(hash),
                Verdict::QualifiedUnpaid { error, .. } => report.unpaid.push((hash, error)),
                _ => {}
            }
        }

        info!(
            checked = report.checked,
            allocated = report.allocated.len(),
            unpaid = report.unpaid.len(),
            "Reconciled allocations"
        );
        Ok(report)
    }
}

/// QUALIFIED transition followed by allocation.
async fn commit(
    archive: &ContributionArchive,
    ledger: &TokenLedger,
    hash: &str,
    outcome: EvaluationOutcome,
) -> Result<Verdict, EngineError> {
    let record = archive
        .record_outcome(hash, SubmissionStatus::Qualified, outcome)
        .await?;
    info!(
        hash = %hash,
        epoch = ?record.epoch,
        poc_score = ?record.poc_score,
        "Submission qualified"
    );
    allocate_for(archive, ledger, record).await
}

async fn allocate_for(
    archive: &ContributionArchive,
    ledger: &TokenLedger,
    record: SubmissionRecord,
) -> Result<Verdict, EngineError> {
    let inconsistent = |reason: &str| EngineError::Inconsistent {
        hash: record.hash.clone(),
        reason: reason.to_string(),
    };
    let request = AllocationRequest {
        submission_hash: record.hash.clone(),
        contributor_id: record.contributor_id.clone(),
        metals: record.metals.clone(),
        scores: record.scores.ok_or_else(|| inconsistent("qualified without scores"))?,
        epoch: record.epoch.ok_or_else(|| inconsistent("qualified without epoch"))?,
    };

    match ledger.allocate(request).await {
        Ok(allocation) => Ok(Verdict::Qualified { record, allocation }),
        Err(LedgerError::AlreadyAllocated(hash)) => match ledger.get_allocation(&hash).await {
            Some(allocation) => Ok(Verdict::Qualified { record, allocation }),
            None => Err(LedgerError::AlreadyAllocated(hash).into()),
        },
        Err(LedgerError::EpochCapExceeded {
            epoch,
            metal,
            requested,
            remaining,
        }) => {
            warn!(
                hash = %record.hash,
                epoch = %epoch,
                metal = ?metal,
                requested = requested,
                remaining = remaining,
                "Qualified submission left unpaid: epoch cap exceeded"
            );
            let error = LedgerError::EpochCapExceeded {
                epoch,
                metal,
                requested,
                remaining,
            }
            .to_string();
            let record = archive
                .annotate(
                    &record.hash,
                    OutcomeReason::EpochCapExceeded {
                        epoch,
                        metal,
                        requested,
                        remaining,
                    },
                )
                .await?;
            Ok(Verdict::QualifiedUnpaid { record, error })
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metals(list: &[Metal]) -> BTreeSet<Metal> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_classify_scenario_founder_gold() {
        let scores = Scores::new(8500, 9000, 8000).unwrap();
        let result = classify(&EpochSchedule::default(), &scores, &metals(&[Metal::Gold]));
        assert_eq!(
            result,
            Classification::Qualified {
                epoch: Epoch::Founder,
                metals: metals(&[Metal::Gold])
            }
        );
    }

    #[test]
    fn test_classify_drops_unpermitted_metals() {
        let scores = Scores::new(8000, 8500, 8000).unwrap();
        let result = classify(
            &EpochSchedule::default(),
            &scores,
            &metals(&[Metal::Gold, Metal::Copper]),
        );
        assert_eq!(
            result,
            Classification::Qualified {
                epoch: Epoch::Founder,
                metals: metals(&[Metal::Gold])
            }
        );
    }

    #[test]
    fn test_classify_no_permitted_metals_is_not_upgraded() {
        // Copper alone in Founder must not fall through to Pioneer
        let scores = Scores::new(8000, 8500, 8000).unwrap();
        let result = classify(&EpochSchedule::default(), &scores, &metals(&[Metal::Copper]));
        assert_eq!(
            result,
            Classification::NoPermittedMetals {
                epoch: Epoch::Founder,
                awarded: metals(&[Metal::Copper])
            }
        );
    }

    #[test]
    fn test_classify_below_every_threshold() {
        let scores = Scores::new(9000, 3999, 9000).unwrap();
        let result = classify(&EpochSchedule::default(), &scores, &metals(&[Metal::Gold]));
        assert_eq!(result, Classification::BelowThreshold { density: 3999 });
    }

    #[test]
    fn test_classify_empty_award() {
        let scores = Scores::new(9000, 9000, 9000).unwrap();
        let result = classify(&EpochSchedule::default(), &scores, &BTreeSet::new());
        assert!(matches!(result, Classification::NoPermittedMetals { .. }));
    }
}
