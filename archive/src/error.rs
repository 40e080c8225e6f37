//! Error types for the archive

use thiserror::Error;

use crate::snapshot::SnapshotError;
use crate::types::SubmissionStatus;

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Normalized content already registered; not fatal.
    #[error("Duplicate submission: content {content_hash} first registered as {first_hash}")]
    DuplicateSubmission {
        first_hash: String,
        content_hash: String,
    },

    #[error("Submission not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for {hash}: {from} -> {to}")]
    InvalidTransition {
        hash: String,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error("Submission content is empty")]
    EmptyContent,

    /// Fatal: recover from the last durable snapshot.
    #[error("Persistence corruption: {0}")]
    PersistenceCorruption(#[from] SnapshotError),
}
