//! Token Ledger
//!
//! Epoch-partitioned distribution of a fixed token supply:
//! - Per-epoch capacity split into per-metal tier pools, one writer per epoch
//! - Tier multipliers (Gold > Silver > Copper)
//! - Exactly-once allocation per submission hash
//! - Per-contributor running totals
//! - Durable, versioned `ledger.json` snapshot verified on load

pub mod allocation;
pub mod error;
pub mod ledger;
pub mod schedule;

// Re-export main types for convenience
pub use allocation::{AllocationRequest, MetalGrant, TokenAllocation};
pub use error::LedgerError;
pub use ledger::{ContributorStats, EpochStats, TierStats, TokenLedger, LEDGER_SCHEMA_VERSION};
pub use schedule::{
    EpochPolicy, EpochSchedule, TierMultipliers, TierShares, BPS_SCALE, DEFAULT_TOTAL_SUPPLY,
};
