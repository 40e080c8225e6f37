//! Error types for the ledger

use thiserror::Error;

use poc_archive::{Epoch, Metal, SnapshotError};

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Idempotent no-op: the submission was already paid.
    #[error("Allocation already exists for {0}")]
    AlreadyAllocated(String),

    /// Economic scarcity condition; needs operator attention.
    ///
    /// `metal` names the exhausted tier pool, `None` means the epoch total.
    #[error(
        "Epoch {epoch} cap exceeded{}: requested {requested}, remaining {remaining}",
        pool_label(.metal)
    )]
    EpochCapExceeded {
        epoch: Epoch,
        metal: Option<Metal>,
        requested: u64,
        remaining: u64,
    },

    #[error("No metals to allocate for {0}")]
    NoMetals(String),

    #[error("Metal {metal} not permitted in epoch {epoch}")]
    MetalNotPermitted { metal: Metal, epoch: Epoch },

    #[error("Epoch not configured: {0}")]
    UnknownEpoch(Epoch),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Stored ledger was written under a different schedule.
    #[error("Schedule mismatch: {0}")]
    ScheduleMismatch(String),

    /// Fatal: recover from the last durable snapshot.
    #[error("Persistence corruption: {0}")]
    PersistenceCorruption(#[from] SnapshotError),

    /// Totals recomputed from allocations disagree with stored balances.
    #[error("Ledger verification failed: {0}")]
    VerificationFailed(String),
}

fn pool_label(metal: &Option<Metal>) -> String {
    match metal {
        Some(metal) => format!(" in the {metal} pool"),
        None => String::new(),
    }
}
