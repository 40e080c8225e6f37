//! Error types for the engine

use thiserror::Error;

use poc_archive::{ArchiveError, SubmissionStatus};
use poc_evaluator::{EvaluatorError, SimilarityError};
use poc_ledger::LedgerError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Evaluator error: {0}")]
    Evaluator(#[from] EvaluatorError),

    /// Redundancy check could not run; the record stays SUBMITTED.
    #[error("Similarity error: {0}")]
    Similarity(#[from] SimilarityError),

    #[error("Submission {hash} is {status}, expected SUBMITTED or EVALUATING")]
    NotEvaluable {
        hash: String,
        status: SubmissionStatus,
    },

    /// Record fields disagree with its status.
    #[error("Inconsistent record {hash}: {reason}")]
    Inconsistent { hash: String, reason: String },

    #[error("Commit task failed: {0}")]
    Commit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
