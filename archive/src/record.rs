//! Submission records and the annotations written by evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{Epoch, Metal, Scores, SubmissionStatus};

/// Caller-supplied metadata for a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMetadata {
    /// Human-readable title
    pub title: String,
    /// Who submitted it
    pub contributor_id: String,
    /// Contribution category (free-form, e.g. "scientific")
    pub category: String,
}

impl SubmissionMetadata {
    /// Create metadata.
    pub fn new(
        title: impl Into<String>,
        contributor_id: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            contributor_id: contributor_id.into(),
            category: category.into(),
        }
    }
}

/// Similarity to an earlier record, captured during the redundancy check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSimilarity {
    /// Hash of the earlier record
    pub hash: String,
    /// Similarity in `[0, 1]`
    pub similarity: f64,
}

/// Why a record ended where it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeReason {
    /// Near-duplicate of an earlier archived submission
    RedundantSubmission { similarity: f64, matched_hash: String },
    /// Density below every epoch threshold
    BelowThreshold { density: u32 },
    /// None of the awarded metals is permitted in the resolved epoch
    NoPermittedMetals { epoch: Epoch, awarded: Vec<Metal> },
    /// Evaluator budget exhausted
    EvaluationFailed { attempts: u32, last_error: String },
    /// Qualified but the epoch could not cover the reward
    EpochCapExceeded {
        epoch: Epoch,
        /// Exhausted tier pool; absent when the epoch total ran out
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metal: Option<Metal>,
        requested: u64,
        remaining: u64,
    },
}

/// Maps a normalized-content hash to the first submission that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIndexEntry {
    pub content_hash: String,
    pub first_hash: String,
    pub registered_at: DateTime<Utc>,
}

/// A stored submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Primary key
    pub hash: String,
    /// Persisted insertion sequence (registry order)
    pub sequence: u64,
    pub title: String,
    pub contributor_id: String,
    pub category: String,
    /// Raw submitted text
    pub text: String,
    /// Hash of the normalized text
    pub content_hash: String,
    pub status: SubmissionStatus,
    /// Metals awarded (after epoch filtering)
    #[serde(default)]
    pub metals: BTreeSet<Metal>,
    #[serde(default)]
    pub scores: Option<Scores>,
    #[serde(default)]
    pub poc_score: Option<u32>,
    #[serde(default)]
    pub epoch: Option<Epoch>,
    /// Evaluator free-text rationale
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub outcome: Option<OutcomeReason>,
    /// Top matches against earlier records
    #[serde(default)]
    pub similarity_cache: Vec<CachedSimilarity>,
    #[serde(default)]
    pub evaluation_attempts: u32,
    /// Newer submission that replaced this one
    #[serde(default)]
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionRecord {
    /// Cached similarity to `other`, if the redundancy check saw it.
    pub fn cached_similarity(&self, other: &str) -> Option<f64> {
        self.similarity_cache
            .iter()
            .find(|entry| entry.hash == other)
            .map(|entry| entry.similarity)
    }
}

/// Annotations applied together with a status transition.
///
/// `None` fields leave the record untouched.
#[derive(Debug, Clone, Default)]
pub struct EvaluationOutcome {
    pub scores: Option<Scores>,
    pub poc_score: Option<u32>,
    pub epoch: Option<Epoch>,
    pub metals: Option<BTreeSet<Metal>>,
    pub rationale: Option<String>,
    pub reason: Option<OutcomeReason>,
    pub similarity_cache: Option<Vec<CachedSimilarity>>,
    pub attempts: Option<u32>,
}

impl EvaluationOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach scores and the derived PoC score.
    pub fn with_scores(mut self, scores: Scores) -> Self {
        self.poc_score = Some(scores.poc_score());
        self.scores = Some(scores);
        self
    }

    pub fn with_epoch(mut self, epoch: Epoch) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn with_metals(mut self, metals: BTreeSet<Metal>) -> Self {
        self.metals = Some(metals);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_reason(mut self, reason: OutcomeReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_similarity_cache(mut self, cache: Vec<CachedSimilarity>) -> Self {
        self.similarity_cache = Some(cache);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Write the annotations into `record`.
    pub(crate) fn apply(self, record: &mut SubmissionRecord) {
        if let Some(scores) = self.scores {
            record.scores = Some(scores);
        }
        if let Some(poc) = self.poc_score {
            record.poc_score = Some(poc);
        }
        if let Some(epoch) = self.epoch {
            record.epoch = Some(epoch);
        }
        if let Some(metals) = self.metals {
            record.metals = metals;
        }
        if let Some(rationale) = self.rationale {
            record.rationale = Some(rationale);
        }
        if let Some(reason) = self.reason {
            record.outcome = Some(reason);
        }
        if let Some(cache) = self.similarity_cache {
            record.similarity_cache = cache;
        }
        if let Some(attempts) = self.attempts {
            record.evaluation_attempts = attempts;
        }
    }
}
