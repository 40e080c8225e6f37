//! Contribution Archive
//!
//! Permanent, append-mostly store of contribution submissions:
//! - Records keyed by submission hash (payload + metadata)
//! - Content index from normalized-text hash to the first submission that
//!   carried it (first-writer-wins deduplication)
//! - Status lifecycle enforcement for every mutation
//! - Insertion-ordered registry view backed by a persisted sequence number
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         ContributionArchive             │
//! │  store / transition / query / get       │
//! └────────────────┬────────────────────────┘
//!                  │
//!      ┌───────────┴───────────┐
//!      ▼                       ▼
//! ┌─────────────┐       ┌─────────────┐
//! │  Records    │       │  Content    │
//! │ (by hash,   │       │  Index      │
//! │  by seq)    │       │ (dedup)     │
//! └─────────────┘       └─────────────┘
//!                  │
//!                  ▼
//!          ┌──────────────┐
//!          │ SnapshotFile │  write-tmp-then-rename
//!          └──────────────┘
//! ```

pub mod archive;
pub mod error;
pub mod hashing;
pub mod query;
pub mod record;
pub mod snapshot;
pub mod types;

// Re-export main types for convenience
pub use archive::{ArchiveStats, Candidate, ContributionArchive, ARCHIVE_SCHEMA_VERSION};
pub use error::ArchiveError;
pub use hashing::{content_hash, normalize_content, submission_hash};
pub use query::{QueryOrder, RecordFilter};
pub use record::{
    CachedSimilarity, ContentIndexEntry, EvaluationOutcome, OutcomeReason, SubmissionMetadata,
    SubmissionRecord,
};
pub use snapshot::{SnapshotError, SnapshotFile};
pub use types::*;
