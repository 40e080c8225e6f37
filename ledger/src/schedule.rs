//! Epoch schedule: capacities, density thresholds, permitted metals,
//! tier pools and tier multipliers.
//!
//! Each epoch's capacity is split into one pool per permitted metal,
//! weighted by [`TierShares`]. A grant for a metal is priced against and
//! drawn from that metal's pool only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use poc_archive::{Epoch, Metal};

use crate::error::LedgerError;

/// Basis-point scale (1.0 == 10_000).
pub const BPS_SCALE: u32 = 10_000;

/// Global token supply in base units.
pub const DEFAULT_TOTAL_SUPPLY: u64 = 90_000_000_000_000;

/// Reward multiplier per metal tier, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMultipliers {
    pub gold_bps: u32,
    pub silver_bps: u32,
    pub copper_bps: u32,
}

impl Default for TierMultipliers {
    fn default() -> Self {
        Self {
            gold_bps: 10_000,
            silver_bps: 8_000,
            copper_bps: 6_000,
        }
    }
}

impl TierMultipliers {
    pub fn for_metal(&self, metal: Metal) -> u32 {
        match metal {
            Metal::Gold => self.gold_bps,
            Metal::Silver => self.silver_bps,
            Metal::Copper => self.copper_bps,
        }
    }
}

/// Relative weight of each metal's pool inside an epoch, in basis points.
///
/// Only the weights of an epoch's permitted metals take part in its split,
/// so an epoch permitting only copper hands copper the whole capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierShares {
    pub gold_bps: u32,
    pub silver_bps: u32,
    pub copper_bps: u32,
}

impl Default for TierShares {
    fn default() -> Self {
        Self {
            gold_bps: 5_000,
            silver_bps: 3_000,
            copper_bps: 2_000,
        }
    }
}

impl TierShares {
    pub fn for_metal(&self, metal: Metal) -> u32 {
        match metal {
            Metal::Gold => self.gold_bps,
            Metal::Silver => self.silver_bps,
            Metal::Copper => self.copper_bps,
        }
    }
}

/// One epoch's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochPolicy {
    pub epoch: Epoch,
    /// Share of the total supply, in basis points
    pub share_bps: u32,
    /// Minimum density for a submission to land in this epoch
    pub density_threshold: u32,
    /// Metals this epoch may award
    pub permitted_metals: BTreeSet<Metal>,
}

impl EpochPolicy {
    pub fn new(
        epoch: Epoch,
        share_bps: u32,
        density_threshold: u32,
        permitted_metals: impl IntoIterator<Item = Metal>,
    ) -> Self {
        Self {
            epoch,
            share_bps,
            density_threshold,
            permitted_metals: permitted_metals.into_iter().collect(),
        }
    }

    pub fn permits(&self, metal: Metal) -> bool {
        self.permitted_metals.contains(&metal)
    }
}

/// The complete distribution schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSchedule {
    pub total_supply: u64,
    pub epochs: Vec<EpochPolicy>,
    #[serde(default)]
    pub multipliers: TierMultipliers,
    #[serde(default)]
    pub tier_shares: TierShares,
}

impl Default for EpochSchedule {
    fn default() -> Self {
        use Metal::*;
        Self {
            total_supply: DEFAULT_TOTAL_SUPPLY,
            epochs: vec![
                EpochPolicy::new(Epoch::Founder, 5_000, 8_000, [Gold, Silver]),
                EpochPolicy::new(Epoch::Pioneer, 2_500, 6_000, [Gold, Silver, Copper]),
                EpochPolicy::new(Epoch::Community, 1_250, 5_000, [Silver, Copper]),
                EpochPolicy::new(Epoch::Ecosystem, 1_250, 4_000, [Copper]),
            ],
            multipliers: TierMultipliers::default(),
            tier_shares: TierShares::default(),
        }
    }
}

impl EpochSchedule {
    /// Check the schedule is internally consistent.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let invalid = |reason: String| Err(LedgerError::InvalidSchedule(reason));

        for epoch in Epoch::ALL {
            let count = self.epochs.iter().filter(|p| p.epoch == epoch).count();
            if count != 1 {
                return invalid(format!("epoch {epoch} configured {count} times"));
            }
        }

        let shares: u64 = self.epochs.iter().map(|p| p.share_bps as u64).sum();
        if shares > BPS_SCALE as u64 {
            return invalid(format!("epoch shares sum to {shares} bps (max {BPS_SCALE})"));
        }

        if let Some(policy) = self
            .epochs
            .iter()
            .find(|p| p.density_threshold > poc_archive::SCORE_MAX)
        {
            return invalid(format!(
                "epoch {} threshold {} exceeds {}",
                policy.epoch,
                policy.density_threshold,
                poc_archive::SCORE_MAX
            ));
        }

        let m = self.multipliers;
        if !(m.gold_bps > m.silver_bps && m.silver_bps > m.copper_bps) {
            return invalid(format!(
                "multipliers must satisfy gold > silver > copper, got {}/{}/{}",
                m.gold_bps, m.silver_bps, m.copper_bps
            ));
        }

        for policy in &self.epochs {
            if policy.permitted_metals.is_empty() {
                return invalid(format!("epoch {} permits no metals", policy.epoch));
            }
            if let Some(metal) = policy
                .permitted_metals
                .iter()
                .find(|m| self.tier_shares.for_metal(**m) == 0)
            {
                return invalid(format!(
                    "epoch {} permits {metal} but its tier share is zero",
                    policy.epoch
                ));
            }
        }

        Ok(())
    }

    /// Policy for `epoch`.
    pub fn policy(&self, epoch: Epoch) -> Option<&EpochPolicy> {
        self.epochs.iter().find(|p| p.epoch == epoch)
    }

    /// Capacity of `epoch` in base units.
    pub fn capacity(&self, epoch: Epoch) -> u64 {
        self.policy(epoch)
            .map(|p| (self.total_supply as u128 * p.share_bps as u128 / BPS_SCALE as u128) as u64)
            .unwrap_or(0)
    }

    /// Capacity of `metal`'s pool inside `epoch`, zero when not permitted.
    ///
    /// Pools are floored, so they never sum past the epoch capacity.
    pub fn tier_capacity(&self, epoch: Epoch, metal: Metal) -> u64 {
        let Some(policy) = self.policy(epoch) else {
            return 0;
        };
        if !policy.permits(metal) {
            return 0;
        }
        let weight: u128 = policy
            .permitted_metals
            .iter()
            .map(|m| self.tier_shares.for_metal(*m) as u128)
            .sum();
        if weight == 0 {
            return 0;
        }
        (self.capacity(epoch) as u128 * self.tier_shares.for_metal(metal) as u128 / weight) as u64
    }

    /// Policies from the highest threshold to the lowest.
    ///
    /// Equal thresholds keep the higher-ranked epoch first.
    pub fn threshold_ladder(&self) -> Vec<&EpochPolicy> {
        let mut ladder: Vec<&EpochPolicy> = self.epochs.iter().collect();
        ladder.sort_by(|a, b| {
            b.density_threshold
                .cmp(&a.density_threshold)
                .then(a.epoch.cmp(&b.epoch))
        });
        ladder
    }

    /// First epoch on the ladder whose threshold `density` meets.
    pub fn resolve(&self, density: u32) -> Option<&EpochPolicy> {
        self.threshold_ladder()
            .into_iter()
            .find(|p| density >= p.density_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_is_valid() {
        let schedule = EpochSchedule::default();
        schedule.validate().unwrap();
        assert_eq!(schedule.capacity(Epoch::Founder), 45_000_000_000_000);
        assert_eq!(schedule.capacity(Epoch::Ecosystem), 11_250_000_000_000);
    }

    #[test]
    fn test_tier_capacities_split_each_epoch() {
        let schedule = EpochSchedule::default();
        // Founder: gold 5 : silver 3 of 45T
        assert_eq!(schedule.tier_capacity(Epoch::Founder, Metal::Gold), 28_125_000_000_000);
        assert_eq!(schedule.tier_capacity(Epoch::Founder, Metal::Silver), 16_875_000_000_000);
        assert_eq!(schedule.tier_capacity(Epoch::Founder, Metal::Copper), 0);
        // Ecosystem: copper alone takes the epoch
        assert_eq!(schedule.tier_capacity(Epoch::Ecosystem, Metal::Copper), 11_250_000_000_000);

        for policy in &schedule.epochs {
            let pooled: u64 = policy
                .permitted_metals
                .iter()
                .map(|m| schedule.tier_capacity(policy.epoch, *m))
                .sum();
            assert!(pooled <= schedule.capacity(policy.epoch));
        }
    }

    #[test]
    fn test_validate_rejects_zero_share_for_permitted_metal() {
        let mut schedule = EpochSchedule::default();
        schedule.tier_shares.copper_bps = 0;
        assert!(matches!(
            schedule.validate(),
            Err(LedgerError::InvalidSchedule(ref reason)) if reason.contains("tier share")
        ));
    }

    #[test]
    fn test_resolve_picks_highest_met_threshold() {
        let schedule = EpochSchedule::default();
        assert_eq!(schedule.resolve(9000).unwrap().epoch, Epoch::Founder);
        assert_eq!(schedule.resolve(8000).unwrap().epoch, Epoch::Founder);
        assert_eq!(schedule.resolve(7999).unwrap().epoch, Epoch::Pioneer);
        assert_eq!(schedule.resolve(5000).unwrap().epoch, Epoch::Community);
        assert_eq!(schedule.resolve(4000).unwrap().epoch, Epoch::Ecosystem);
        assert!(schedule.resolve(3999).is_none());
    }

    #[test]
    fn test_equal_thresholds_prefer_higher_epoch() {
        let mut schedule = EpochSchedule::default();
        for policy in &mut schedule.epochs {
            if policy.epoch == Epoch::Community {
                policy.density_threshold = 6_000;
            }
        }
        assert_eq!(schedule.resolve(6500).unwrap().epoch, Epoch::Pioneer);
    }

    #[test]
    fn test_validate_rejects_bad_multipliers() {
        let mut schedule = EpochSchedule::default();
        schedule.multipliers.silver_bps = schedule.multipliers.gold_bps;
        assert!(matches!(
            schedule.validate(),
            Err(LedgerError::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_validate_rejects_oversubscribed_supply() {
        let mut schedule = EpochSchedule::default();
        schedule.epochs[0].share_bps = 9_000;
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_epoch() {
        let mut schedule = EpochSchedule::default();
        schedule.epochs.pop();
        assert!(schedule.validate().is_err());
    }
}
