//! Allocation records and reward pricing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use poc_archive::{Epoch, Metal, Scores, SCORE_MAX};

use crate::schedule::{TierMultipliers, BPS_SCALE};

/// Request to pay out a qualified submission.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub submission_hash: String,
    pub contributor_id: String,
    pub metals: BTreeSet<Metal>,
    pub scores: Scores,
    pub epoch: Epoch,
}

/// Reward for one awarded metal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetalGrant {
    pub metal: Metal,
    pub multiplier_bps: u32,
    pub reward: u64,
}

/// An immutable payout record. At most one exists per submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAllocation {
    pub submission_hash: String,
    /// Ledger-wide allocation order
    pub sequence: u64,
    pub contributor_id: String,
    pub epoch: Epoch,
    pub poc_score: u32,
    pub scores: Scores,
    pub grants: Vec<MetalGrant>,
    pub total_reward: u64,
    pub allocated_at: DateTime<Utc>,
}

/// `(poc / SCORE_MAX) * remaining * (multiplier / BPS_SCALE)`, truncated.
pub fn metal_reward(poc_score: u32, remaining: u64, multiplier_bps: u32) -> u64 {
    let numerator = remaining as u128 * poc_score as u128 * multiplier_bps as u128;
    let denominator = SCORE_MAX as u128 * BPS_SCALE as u128;
    (numerator / denominator) as u64
}

/// Price every metal against its own tier pool's pre-allocation balance.
///
/// A metal missing from `tier_remaining` has an empty pool.
pub fn price_grants(
    metals: &BTreeSet<Metal>,
    poc_score: u32,
    tier_remaining: &BTreeMap<Metal, u64>,
    multipliers: &TierMultipliers,
) -> Vec<MetalGrant> {
    metals
        .iter()
        .map(|&metal| {
            let multiplier_bps = multipliers.for_metal(metal);
            let remaining = tier_remaining.get(&metal).copied().unwrap_or(0);
            MetalGrant {
                metal,
                multiplier_bps,
                reward: metal_reward(poc_score, remaining, multiplier_bps),
            }
        })
        .collect()
}
