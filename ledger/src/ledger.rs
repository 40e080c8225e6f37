//! The token ledger.
//!
//! Locking, outermost first:
//! 1. `in_flight` reservation for the submission hash (exactly-once)
//! 2. the epoch's writer mutex (balance check-then-deduct)
//! 3. the persistence mutex (commit + durable save, rollback on failure)
//!
//! The book itself sits behind an `RwLock` that is only held for short
//! reads and in-memory commits.
//!
//! Each epoch balance carries one pool per permitted metal. A grant draws
//! only from its metal's pool; the epoch total still caps the sum.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use poc_archive::{Epoch, Metal, SnapshotError, SnapshotFile};

use crate::allocation::{price_grants, AllocationRequest, TokenAllocation};
use crate::error::LedgerError;
use crate::schedule::EpochSchedule;

/// Current on-disk schema version of `ledger.json`.
///
/// Version 2 added per-metal tier pools.
pub const LEDGER_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TierBalance {
    metal: Metal,
    capacity: u64,
    distributed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EpochBalance {
    epoch: Epoch,
    capacity: u64,
    distributed: u64,
    allocation_count: u64,
    /// One pool per permitted metal, in tier order
    tiers: Vec<TierBalance>,
}

impl EpochBalance {
    fn tier(&self, metal: Metal) -> Option<&TierBalance> {
        self.tiers.iter().find(|t| t.metal == metal)
    }

    fn tier_mut(&mut self, metal: Metal) -> Option<&mut TierBalance> {
        self.tiers.iter_mut().find(|t| t.metal == metal)
    }
}

/// Read-only view of one metal's pool inside an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub metal: Metal,
    pub capacity: u64,
    pub distributed: u64,
    pub remaining: u64,
}

/// Read-only view of one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpochStats {
    pub epoch: Epoch,
    pub capacity: u64,
    pub distributed: u64,
    pub remaining: u64,
    pub allocation_count: u64,
    pub tiers: Vec<TierStats>,
}

impl EpochStats {
    /// Pool stats for `metal`, if the epoch permits it.
    pub fn tier(&self, metal: Metal) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.metal == metal)
    }
}

impl From<&EpochBalance> for EpochStats {
    fn from(balance: &EpochBalance) -> Self {
        Self {
            epoch: balance.epoch,
            capacity: balance.capacity,
            distributed: balance.distributed,
            remaining: balance.capacity - balance.distributed,
            allocation_count: balance.allocation_count,
            tiers: balance
                .tiers
                .iter()
                .map(|t| TierStats {
                    metal: t.metal,
                    capacity: t.capacity,
                    distributed: t.distributed,
                    remaining: t.capacity - t.distributed,
                })
                .collect(),
        }
    }
}

/// Running totals for one contributor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorStats {
    pub contributor_id: String,
    pub balance: u64,
    pub count: u64,
}

#[derive(Debug, Deserialize)]
struct LedgerSnapshot {
    #[allow(dead_code)]
    schema_version: u32,
    total_supply: u64,
    next_sequence: u64,
    epochs: Vec<EpochBalance>,
    allocations: Vec<TokenAllocation>,
    contributors: Vec<ContributorStats>,
}

#[derive(Debug, Serialize)]
struct LedgerSnapshotRef<'a> {
    schema_version: u32,
    total_supply: u64,
    next_sequence: u64,
    epochs: Vec<&'a EpochBalance>,
    allocations: Vec<&'a TokenAllocation>,
    contributors: Vec<&'a ContributorStats>,
}

#[derive(Debug, Default)]
struct Book {
    next_sequence: u64,
    balances: BTreeMap<Epoch, EpochBalance>,
    allocations: HashMap<String, TokenAllocation>,
    contributors: BTreeMap<String, ContributorStats>,
}

impl Book {
    fn new(schedule: &EpochSchedule) -> Self {
        let balances = schedule
            .epochs
            .iter()
            .map(|policy| {
                (
                    policy.epoch,
                    EpochBalance {
                        epoch: policy.epoch,
                        capacity: schedule.capacity(policy.epoch),
                        distributed: 0,
                        allocation_count: 0,
                        tiers: policy
                            .permitted_metals
                            .iter()
                            .map(|&metal| TierBalance {
                                metal,
                                capacity: schedule.tier_capacity(policy.epoch, metal),
                                distributed: 0,
                            })
                            .collect(),
                    },
                )
            })
            .collect();

        Self {
            balances,
            ..Default::default()
        }
    }

    fn from_snapshot(snapshot: LedgerSnapshot, schedule: &EpochSchedule) -> Result<Self, LedgerError> {
        if snapshot.total_supply != schedule.total_supply {
            return Err(LedgerError::ScheduleMismatch(format!(
                "stored supply {} != configured {}",
                snapshot.total_supply, schedule.total_supply
            )));
        }

        let mut book = Book {
            next_sequence: snapshot.next_sequence,
            ..Default::default()
        };

        for balance in snapshot.epochs {
            let configured = schedule.capacity(balance.epoch);
            if balance.capacity != configured {
                return Err(LedgerError::ScheduleMismatch(format!(
                    "epoch {} stored capacity {} != configured {}",
                    balance.epoch, balance.capacity, configured
                )));
            }
            let stored: Vec<(Metal, u64)> = balance.tiers.iter().map(|t| (t.metal, t.capacity)).collect();
            let expected: Vec<(Metal, u64)> = schedule
                .policy(balance.epoch)
                .map(|policy| {
                    policy
                        .permitted_metals
                        .iter()
                        .map(|&metal| (metal, schedule.tier_capacity(balance.epoch, metal)))
                        .collect()
                })
                .unwrap_or_default();
            if stored != expected {
                return Err(LedgerError::ScheduleMismatch(format!(
                    "epoch {} stored tier pools {:?} != configured {:?}",
                    balance.epoch, stored, expected
                )));
            }
            book.balances.insert(balance.epoch, balance);
        }
        for policy in &schedule.epochs {
            if !book.balances.contains_key(&policy.epoch) {
                return Err(LedgerError::ScheduleMismatch(format!(
                    "epoch {} missing from stored ledger",
                    policy.epoch
                )));
            }
        }

        for allocation in snapshot.allocations {
            book.allocations
                .insert(allocation.submission_hash.clone(), allocation);
        }
        for contributor in snapshot.contributors {
            book.contributors
                .insert(contributor.contributor_id.clone(), contributor);
        }

        Ok(book)
    }

    fn to_snapshot(&self, total_supply: u64) -> LedgerSnapshotRef<'_> {
        let mut allocations: Vec<&TokenAllocation> = self.allocations.values().collect();
        allocations.sort_by_key(|a| a.sequence);

        LedgerSnapshotRef {
            schema_version: LEDGER_SCHEMA_VERSION,
            total_supply,
            next_sequence: self.next_sequence,
            epochs: self.balances.values().collect(),
            allocations,
            contributors: self.contributors.values().collect(),
        }
    }

    fn commit(&mut self, allocation: &TokenAllocation) {
        if let Some(balance) = self.balances.get_mut(&allocation.epoch) {
            balance.distributed += allocation.total_reward;
            balance.allocation_count += 1;
            for grant in &allocation.grants {
                if let Some(tier) = balance.tier_mut(grant.metal) {
                    tier.distributed += grant.reward;
                }
            }
        }
        let contributor = self
            .contributors
            .entry(allocation.contributor_id.clone())
            .or_insert_with(|| ContributorStats {
                contributor_id: allocation.contributor_id.clone(),
                ..Default::default()
            });
        contributor.balance += allocation.total_reward;
        contributor.count += 1;

        self.next_sequence = self.next_sequence.max(allocation.sequence + 1);
        self.allocations
            .insert(allocation.submission_hash.clone(), allocation.clone());
    }

    fn revert(&mut self, allocation: &TokenAllocation) {
        if self.allocations.remove(&allocation.submission_hash).is_none() {
            return;
        }
        if let Some(balance) = self.balances.get_mut(&allocation.epoch) {
            balance.distributed -= allocation.total_reward;
            balance.allocation_count -= 1;
            for grant in &allocation.grants {
                if let Some(tier) = balance.tier_mut(grant.metal) {
                    tier.distributed -= grant.reward;
                }
            }
        }
        if let Some(contributor) = self.contributors.get_mut(&allocation.contributor_id) {
            contributor.balance -= allocation.total_reward;
            contributor.count -= 1;
            if contributor.count == 0 {
                self.contributors.remove(&allocation.contributor_id);
            }
        }
        // Commits are serialized by the persistence lock, so this was the last one
        if self.next_sequence == allocation.sequence + 1 {
            self.next_sequence = allocation.sequence;
        }
    }

    /// Recompute every aggregate from the allocation list.
    fn verify(&self) -> Result<(), String> {
        let mut distributed: BTreeMap<Epoch, (u64, u64)> = BTreeMap::new();
        let mut pooled: BTreeMap<(Epoch, Metal), u64> = BTreeMap::new();
        let mut contributors: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
        let mut sequences = std::collections::HashSet::new();

        for allocation in self.allocations.values() {
            let granted: u64 = allocation.grants.iter().map(|g| g.reward).sum();
            if granted != allocation.total_reward {
                return Err(format!(
                    "allocation {} grants sum {} != total {}",
                    allocation.submission_hash, granted, allocation.total_reward
                ));
            }
            if allocation.sequence >= self.next_sequence || !sequences.insert(allocation.sequence) {
                return Err(format!(
                    "allocation {} has invalid sequence {}",
                    allocation.submission_hash, allocation.sequence
                ));
            }
            let epoch = distributed.entry(allocation.epoch).or_default();
            epoch.0 += allocation.total_reward;
            epoch.1 += 1;
            for grant in &allocation.grants {
                *pooled.entry((allocation.epoch, grant.metal)).or_default() += grant.reward;
            }
            let contributor = contributors
                .entry(allocation.contributor_id.as_str())
                .or_default();
            contributor.0 += allocation.total_reward;
            contributor.1 += 1;
        }

        for balance in self.balances.values() {
            let (sum, count) = distributed.get(&balance.epoch).copied().unwrap_or_default();
            if sum != balance.distributed || count != balance.allocation_count {
                return Err(format!(
                    "epoch {} records {} / {} allocations but allocations sum to {} / {}",
                    balance.epoch, balance.distributed, balance.allocation_count, sum, count
                ));
            }
            if balance.distributed > balance.capacity {
                return Err(format!(
                    "epoch {} distributed {} beyond capacity {}",
                    balance.epoch, balance.distributed, balance.capacity
                ));
            }
            for tier in &balance.tiers {
                let sum = pooled.get(&(balance.epoch, tier.metal)).copied().unwrap_or_default();
                if sum != tier.distributed {
                    return Err(format!(
                        "epoch {} {} pool records {} but grants sum to {}",
                        balance.epoch, tier.metal, tier.distributed, sum
                    ));
                }
                if tier.distributed > tier.capacity {
                    return Err(format!(
                        "epoch {} {} pool distributed {} beyond capacity {}",
                        balance.epoch, tier.metal, tier.distributed, tier.capacity
                    ));
                }
            }
        }
        if let Some((epoch, metal)) = pooled.keys().find(|(epoch, metal)| {
            self.balances
                .get(epoch)
                .map_or(true, |balance| balance.tier(*metal).is_none())
        }) {
            return Err(format!("grant from {metal} pool not configured in epoch {epoch}"));
        }
        if distributed.keys().any(|epoch| !self.balances.contains_key(epoch)) {
            return Err("allocation in unconfigured epoch".to_string());
        }

        if contributors.len() != self.contributors.len() {
            return Err(format!(
                "{} contributors recorded but {} found in allocations",
                self.contributors.len(),
                contributors.len()
            ));
        }
        for stats in self.contributors.values() {
            let (balance, count) = contributors
                .get(stats.contributor_id.as_str())
                .copied()
                .unwrap_or_default();
            if balance != stats.balance || count != stats.count {
                return Err(format!(
                    "contributor {} totals {} / {} disagree with allocations {} / {}",
                    stats.contributor_id, stats.balance, stats.count, balance, count
                ));
            }
        }

        Ok(())
    }
}

/// Removes the in-flight reservation when the allocation attempt ends,
/// including when the future is dropped.
struct Reservation<'a> {
    in_flight: &'a DashMap<String, ()>,
    hash: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.hash);
    }
}

/// Epoch-partitioned token ledger.
pub struct TokenLedger {
    schedule: EpochSchedule,
    book: RwLock<Book>,
    /// Serializes writers of one epoch's balance.
    epoch_writers: BTreeMap<Epoch, Mutex<()>>,
    in_flight: DashMap<String, ()>,
    /// `None` keeps the ledger purely in memory
    persistence: Mutex<Option<SnapshotFile>>,
}

impl TokenLedger {
    fn with_book(schedule: EpochSchedule, book: Book, file: Option<SnapshotFile>) -> Self {
        let epoch_writers = schedule
            .epochs
            .iter()
            .map(|policy| (policy.epoch, Mutex::new(())))
            .collect();

        Self {
            schedule,
            book: RwLock::new(book),
            epoch_writers,
            in_flight: DashMap::new(),
            persistence: Mutex::new(file),
        }
    }

    /// Open (or create) a ledger backed by the snapshot at `path`.
    ///
    /// A stored ledger must match `schedule` and pass verification.
    pub async fn open<P: AsRef<Path>>(path: P, schedule: EpochSchedule) -> Result<Self, LedgerError> {
        schedule.validate()?;

        let file = SnapshotFile::new(path);
        let book = match file.load::<LedgerSnapshot>(LEDGER_SCHEMA_VERSION).await? {
            Some(snapshot) => {
                let book = Book::from_snapshot(snapshot, &schedule)?;
                book.verify().map_err(|reason| {
                    LedgerError::PersistenceCorruption(SnapshotError::Corrupt {
                        path: file.path().to_path_buf(),
                        reason,
                    })
                })?;
                book
            }
            None => Book::new(&schedule),
        };

        info!(
            path = %file.path().display(),
            allocations = book.allocations.len(),
            "Opened token ledger"
        );

        Ok(Self::with_book(schedule, book, Some(file)))
    }

    /// Create a ledger that never touches disk (for tests).
    pub fn in_memory(schedule: EpochSchedule) -> Result<Self, LedgerError> {
        schedule.validate()?;
        let book = Book::new(&schedule);
        Ok(Self::with_book(schedule, book, None))
    }

    pub fn schedule(&self) -> &EpochSchedule {
        &self.schedule
    }

    /// Pay out a qualified submission exactly once.
    ///
    /// Every awarded metal is priced against its own tier pool's remaining
    /// balance before this allocation. Each grant is checked against its
    /// pool and the sum against the epoch remainder; everything is deducted
    /// in one step, or nothing happens.
    ///
    /// If the caller drops this future mid-save, the allocation stays
    /// committed in memory and reaches disk with the next save.
    pub async fn allocate(&self, request: AllocationRequest) -> Result<TokenAllocation, LedgerError> {
        let hash = request.submission_hash.clone();
        let epoch = request.epoch;

        let policy = self
            .schedule
            .policy(epoch)
            .ok_or(LedgerError::UnknownEpoch(epoch))?;
        if request.metals.is_empty() {
            return Err(LedgerError::NoMetals(hash));
        }
        if let Some(&metal) = request.metals.iter().find(|m| !policy.permits(**m)) {
            return Err(LedgerError::MetalNotPermitted { metal, epoch });
        }

        let _reservation = match self.in_flight.entry(hash.clone()) {
            Entry::Occupied(_) => {
                debug!(hash = %hash, "Allocation already in flight");
                return Err(LedgerError::AlreadyAllocated(hash));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Reservation {
                    in_flight: &self.in_flight,
                    hash: hash.clone(),
                }
            }
        };

        if self.book.read().await.allocations.contains_key(&hash) {
            debug!(hash = %hash, "Allocation already recorded");
            return Err(LedgerError::AlreadyAllocated(hash));
        }

        let writer = self
            .epoch_writers
            .get(&epoch)
            .ok_or(LedgerError::UnknownEpoch(epoch))?;
        let _epoch_guard = writer.lock().await;

        let (remaining, tier_remaining) = {
            let book = self.book.read().await;
            let balance = book
                .balances
                .get(&epoch)
                .ok_or(LedgerError::UnknownEpoch(epoch))?;
            let tiers: BTreeMap<Metal, u64> = balance
                .tiers
                .iter()
                .map(|t| (t.metal, t.capacity - t.distributed))
                .collect();
            (balance.capacity - balance.distributed, tiers)
        };

        let poc_score = request.scores.poc_score();
        let grants = price_grants(
            &request.metals,
            poc_score,
            &tier_remaining,
            &self.schedule.multipliers,
        );
        let total_reward: u64 = grants.iter().map(|g| g.reward).sum();

        let refusal = grants
            .iter()
            .find_map(|grant| {
                let pool = tier_remaining.get(&grant.metal).copied().unwrap_or(0);
                (pool == 0 || grant.reward > pool).then_some((Some(grant.metal), grant.reward, pool))
            })
            .or_else(|| {
                (remaining == 0 || total_reward > remaining).then_some((None, total_reward, remaining))
            });
        if let Some((metal, requested, remaining)) = refusal {
            warn!(
                hash = %hash,
                epoch = %epoch,
                metal = ?metal,
                requested = requested,
                remaining = remaining,
                "Epoch cap exceeded, allocation refused"
            );
            return Err(LedgerError::EpochCapExceeded {
                epoch,
                metal,
                requested,
                remaining,
            });
        }

        let persistence = self.persistence.lock().await;

        let allocation = {
            let mut book = self.book.write().await;
            let allocation = TokenAllocation {
                submission_hash: hash.clone(),
                sequence: book.next_sequence,
                contributor_id: request.contributor_id,
                epoch,
                poc_score,
                scores: request.scores,
                grants,
                total_reward,
                allocated_at: Utc::now(),
            };
            book.commit(&allocation);
            allocation
        };

        if let Some(file) = persistence.as_ref() {
            let saved = {
                let book = self.book.read().await;
                file.save(&book.to_snapshot(self.schedule.total_supply)).await
            };
            if let Err(e) = saved {
                error!(hash = %hash, error = %e, "Failed to persist allocation, rolling back");
                self.book.write().await.revert(&allocation);
                return Err(e.into());
            }
        }
        drop(persistence);

        info!(
            hash = %hash,
            epoch = %epoch,
            contributor = %allocation.contributor_id,
            poc_score = poc_score,
            reward = allocation.total_reward,
            "Allocated tokens"
        );
        Ok(allocation)
    }

    /// Distributed and remaining amounts for `epoch`.
    pub async fn get_epoch_stats(&self, epoch: Epoch) -> Result<EpochStats, LedgerError> {
        self.book
            .read()
            .await
            .balances
            .get(&epoch)
            .map(EpochStats::from)
            .ok_or(LedgerError::UnknownEpoch(epoch))
    }

    /// Stats for every epoch, in rank order.
    pub async fn all_epoch_stats(&self) -> Vec<EpochStats> {
        self.book
            .read()
            .await
            .balances
            .values()
            .map(EpochStats::from)
            .collect()
    }

    /// Running totals for `contributor_id` (zero if never paid).
    pub async fn get_contributor_stats(&self, contributor_id: &str) -> ContributorStats {
        self.book
            .read()
            .await
            .contributors
            .get(contributor_id)
            .cloned()
            .unwrap_or_else(|| ContributorStats {
                contributor_id: contributor_id.to_string(),
                ..Default::default()
            })
    }

    pub async fn get_allocation(&self, hash: &str) -> Option<TokenAllocation> {
        self.book.read().await.allocations.get(hash).cloned()
    }

    /// Allocations made in `epoch`, oldest first.
    pub async fn allocations_for_epoch(&self, epoch: Epoch) -> Vec<TokenAllocation> {
        let book = self.book.read().await;
        let mut allocations: Vec<TokenAllocation> = book
            .allocations
            .values()
            .filter(|a| a.epoch == epoch)
            .cloned()
            .collect();
        allocations.sort_by_key(|a| a.sequence);
        allocations
    }

    pub async fn allocation_count(&self) -> usize {
        self.book.read().await.allocations.len()
    }

    /// Recompute all aggregates from the allocation list.
    pub async fn verify(&self) -> Result<(), LedgerError> {
        self.book
            .read()
            .await
            .verify()
            .map_err(LedgerError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poc_archive::{Metal, Scores};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn request(hash: &str, metals: &[Metal], scores: Scores, epoch: Epoch) -> AllocationRequest {
        AllocationRequest {
            submission_hash: hash.to_string(),
            contributor_id: "alice".to_string(),
            metals: metals.iter().copied().collect::<BTreeSet<_>>(),
            scores,
            epoch,
        }
    }

    fn scenario_scores() -> Scores {
        Scores::new(8500, 9000, 8000).unwrap()
    }

    #[tokio::test]
    async fn test_allocate_scenario_reward() {
        let ledger = TokenLedger::in_memory(EpochSchedule::default()).unwrap();
        let allocation = ledger
            .allocate(request("h1", &[Metal::Gold], scenario_scores(), Epoch::Founder))
            .await
            .unwrap();

        assert_eq!(allocation.poc_score, 6120);
        assert_eq!(allocation.total_reward, 17_212_500_000_000);
        assert_eq!(allocation.grants[0].multiplier_bps, 10_000);

        let stats = ledger.get_epoch_stats(Epoch::Founder).await.unwrap();
        assert_eq!(stats.distributed, 17_212_500_000_000);
        assert_eq!(stats.remaining, 45_000_000_000_000 - 17_212_500_000_000);
        let gold = stats.tier(Metal::Gold).unwrap();
        assert_eq!(gold.remaining, 28_125_000_000_000 - 17_212_500_000_000);
        assert_eq!(stats.tier(Metal::Silver).unwrap().distributed, 0);

        let alice = ledger.get_contributor_stats("alice").await;
        assert_eq!(alice.balance, 17_212_500_000_000);
        assert_eq!(alice.count, 1);
    }

    #[tokio::test]
    async fn test_gold_and_silver_draw_from_their_own_pools() {
        let ledger = TokenLedger::in_memory(EpochSchedule::default()).unwrap();
        let allocation = ledger
            .allocate(request(
                "h1",
                &[Metal::Gold, Metal::Silver],
                scenario_scores(),
                Epoch::Founder,
            ))
            .await
            .unwrap();

        // gold: 28.125T * 0.612; silver: 16.875T * 0.612 * 0.8
        assert_eq!(allocation.grants[0].reward, 17_212_500_000_000);
        assert_eq!(allocation.grants[1].reward, 8_262_000_000_000);
        assert_eq!(allocation.total_reward, 25_474_500_000_000);

        let stats = ledger.get_epoch_stats(Epoch::Founder).await.unwrap();
        assert_eq!(stats.distributed, 25_474_500_000_000);
        assert_eq!(stats.tier(Metal::Gold).unwrap().distributed, 17_212_500_000_000);
        assert_eq!(stats.tier(Metal::Silver).unwrap().distributed, 8_262_000_000_000);
        ledger.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_allocate_is_already_allocated() {
        let ledger = TokenLedger::in_memory(EpochSchedule::default()).unwrap();
        ledger
            .allocate(request("h1", &[Metal::Gold], scenario_scores(), Epoch::Founder))
            .await
            .unwrap();
        let before = ledger.get_epoch_stats(Epoch::Founder).await.unwrap();

        let err = ledger
            .allocate(request("h1", &[Metal::Gold], scenario_scores(), Epoch::Founder))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyAllocated(ref h) if h == "h1"));

        let after = ledger.get_epoch_stats(Epoch::Founder).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(ledger.allocation_count().await, 1);
    }

    #[tokio::test]
    async fn test_cap_exceeded_has_no_side_effect() {
        let ledger = TokenLedger::in_memory(EpochSchedule::default()).unwrap();
        // A perfect score at gold empties the Founder gold pool
        let perfect = Scores::new(10_000, 10_000, 10_000).unwrap();
        let first = ledger
            .allocate(request("h0", &[Metal::Gold], perfect, Epoch::Founder))
            .await
            .unwrap();
        assert_eq!(first.total_reward, 28_125_000_000_000);
        let before = ledger.get_epoch_stats(Epoch::Founder).await.unwrap();

        let err = ledger
            .allocate(request("h1", &[Metal::Gold, Metal::Silver], perfect, Epoch::Founder))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::EpochCapExceeded {
                epoch: Epoch::Founder,
                metal: Some(Metal::Gold),
                remaining: 0,
                ..
            }
        ));

        // The silver pool was untouched by the refused request
        let after = ledger.get_epoch_stats(Epoch::Founder).await.unwrap();
        assert_eq!(before, after);
        assert!(ledger.get_allocation("h1").await.is_none());
        assert_eq!(ledger.get_contributor_stats("alice").await.count, 1);

        // Refusal does not burn the hash
        let silver = ledger
            .allocate(request("h1", &[Metal::Silver], perfect, Epoch::Founder))
            .await
            .unwrap();
        assert_eq!(silver.total_reward, 13_500_000_000_000);
        ledger.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_metal_outside_epoch_rejected() {
        let ledger = TokenLedger::in_memory(EpochSchedule::default()).unwrap();
        let err = ledger
            .allocate(request("h1", &[Metal::Copper], scenario_scores(), Epoch::Founder))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::MetalNotPermitted {
                metal: Metal::Copper,
                epoch: Epoch::Founder
            }
        ));
    }

    #[tokio::test]
    async fn test_no_metals_rejected() {
        let ledger = TokenLedger::in_memory(EpochSchedule::default()).unwrap();
        let err = ledger
            .allocate(request("h1", &[], scenario_scores(), Epoch::Founder))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoMetals(_)));
    }

    #[tokio::test]
    async fn test_concurrent_same_hash_allocates_once() {
        let ledger = Arc::new(TokenLedger::in_memory(EpochSchedule::default()).unwrap());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .allocate(request("same", &[Metal::Gold], scenario_scores(), Epoch::Founder))
                    .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::AlreadyAllocated(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(ledger.allocation_count().await, 1);
        ledger.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_allocations_respect_cap() {
        let ledger = Arc::new(TokenLedger::in_memory(EpochSchedule::default()).unwrap());
        // PoC 3185: each allocation takes about a third of the gold pool
        // and a quarter of the silver pool
        let scores = Scores::new(7_000, 6_500, 7_000).unwrap();
        let mut handles = Vec::new();
        for n in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .allocate(request(
                        &format!("h{n}"),
                        &[Metal::Gold, Metal::Silver],
                        scores,
                        Epoch::Pioneer,
                    ))
                    .await
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        let stats = ledger.get_epoch_stats(Epoch::Pioneer).await.unwrap();
        let sum: u64 = ledger
            .allocations_for_epoch(Epoch::Pioneer)
            .await
            .iter()
            .map(|a| a.total_reward)
            .sum();
        assert_eq!(sum, stats.distributed);
        assert!(stats.distributed <= stats.capacity);
        for tier in &stats.tiers {
            assert!(tier.distributed <= tier.capacity);
        }
        ledger.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_allocations_for_epoch_ordered() {
        let ledger = TokenLedger::in_memory(EpochSchedule::default()).unwrap();
        let scores = Scores::new(5_000, 6_500, 5_000).unwrap();
        for hash in ["c", "a", "b"] {
            ledger
                .allocate(request(hash, &[Metal::Copper], scores, Epoch::Pioneer))
                .await
                .unwrap();
        }
        let order: Vec<String> = ledger
            .allocations_for_epoch(Epoch::Pioneer)
            .await
            .into_iter()
            .map(|a| a.submission_hash)
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
