//! The contribution archive.
//!
//! All state sits behind one async mutex, so the content-hash check and the
//! insert that follows it form a single critical section. Every mutation is
//! persisted before the lock is released; a failed save rolls the in-memory
//! change back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ArchiveError;
use crate::hashing::{content_hash, normalize_content, submission_hash};
use crate::query::{QueryOrder, RecordFilter};
use crate::record::{
    ContentIndexEntry, EvaluationOutcome, OutcomeReason, SubmissionMetadata, SubmissionRecord,
};
use crate::snapshot::{SnapshotError, SnapshotFile};
use crate::types::SubmissionStatus;

/// Current on-disk schema version of `archive.json`.
pub const ARCHIVE_SCHEMA_VERSION: u32 = 1;

/// On-disk layout (owned, for loading).
#[derive(Debug, Deserialize)]
struct ArchiveSnapshot {
    #[allow(dead_code)]
    schema_version: u32,
    next_sequence: u64,
    records: Vec<SubmissionRecord>,
    content_index: Vec<ContentIndexEntry>,
}

/// On-disk layout (borrowed, for saving).
#[derive(Debug, Serialize)]
struct ArchiveSnapshotRef<'a> {
    schema_version: u32,
    next_sequence: u64,
    records: Vec<&'a SubmissionRecord>,
    content_index: Vec<&'a ContentIndexEntry>,
}

#[derive(Debug, Default)]
struct ArchiveState {
    next_sequence: u64,
    records: HashMap<String, SubmissionRecord>,
    /// sequence -> submission hash
    order: BTreeMap<u64, String>,
    content_index: HashMap<String, ContentIndexEntry>,
}

impl ArchiveState {
    fn from_snapshot(snapshot: ArchiveSnapshot, path: &Path) -> Result<Self, SnapshotError> {
        let corrupt = |reason: String| SnapshotError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let mut state = ArchiveState {
            next_sequence: snapshot.next_sequence,
            ..Default::default()
        };

        for record in snapshot.records {
            if record.sequence >= snapshot.next_sequence {
                return Err(corrupt(format!(
                    "record {} has sequence {} beyond next_sequence {}",
                    record.hash, record.sequence, snapshot.next_sequence
                )));
            }
            if state.order.insert(record.sequence, record.hash.clone()).is_some() {
                return Err(corrupt(format!("duplicate sequence {}", record.sequence)));
            }
            if state.records.insert(record.hash.clone(), record).is_some() {
                return Err(corrupt("duplicate submission hash".to_string()));
            }
        }

        for entry in snapshot.content_index {
            let first = state.records.get(&entry.first_hash).ok_or_else(|| {
                corrupt(format!(
                    "content index points at unknown record {}",
                    entry.first_hash
                ))
            })?;
            if first.content_hash != entry.content_hash {
                return Err(corrupt(format!(
                    "content index entry {} disagrees with record {}",
                    entry.content_hash, entry.first_hash
                )));
            }
            state.content_index.insert(entry.content_hash.clone(), entry);
        }

        if state.content_index.len() != state.records.len() {
            return Err(corrupt(format!(
                "{} records but {} content index entries",
                state.records.len(),
                state.content_index.len()
            )));
        }

        Ok(state)
    }

    fn to_snapshot(&self) -> ArchiveSnapshotRef<'_> {
        let records = self
            .order
            .values()
            .filter_map(|hash| self.records.get(hash))
            .collect();
        let mut content_index: Vec<&ContentIndexEntry> = self.content_index.values().collect();
        content_index.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));

        ArchiveSnapshotRef {
            schema_version: ARCHIVE_SCHEMA_VERSION,
            next_sequence: self.next_sequence,
            records,
            content_index,
        }
    }

    fn ordered(&self) -> impl DoubleEndedIterator<Item = &SubmissionRecord> {
        self.order.values().filter_map(|hash| self.records.get(hash))
    }
}

/// A record's text, exposed for the external similarity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub hash: String,
    pub sequence: u64,
    pub status: SubmissionStatus,
    pub text: String,
}

/// Record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub total: usize,
    pub by_status: BTreeMap<SubmissionStatus, usize>,
}

/// Permanent store of every submission ever made.
pub struct ContributionArchive {
    state: Mutex<ArchiveState>,
    /// `None` keeps the archive purely in memory
    snapshot: Option<SnapshotFile>,
}

impl ContributionArchive {
    /// Open (or create) an archive backed by the snapshot at `path`.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let file = SnapshotFile::new(path);
        let state = match file.load::<ArchiveSnapshot>(ARCHIVE_SCHEMA_VERSION).await? {
            Some(snapshot) => ArchiveState::from_snapshot(snapshot, file.path())?,
            None => ArchiveState::default(),
        };

        info!(
            path = %file.path().display(),
            records = state.records.len(),
            next_sequence = state.next_sequence,
            "Opened contribution archive"
        );

        Ok(Self {
            state: Mutex::new(state),
            snapshot: Some(file),
        })
    }

    /// Create an archive that never touches disk (for tests).
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(ArchiveState::default()),
            snapshot: None,
        }
    }

    /// Location of the backing snapshot, if any.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot.as_ref().map(|file| file.path().to_path_buf())
    }

    async fn persist(&self, state: &ArchiveState) -> Result<(), ArchiveError> {
        if let Some(file) = &self.snapshot {
            file.save(&state.to_snapshot()).await?;
        }
        Ok(())
    }

    /// Store a new submission as DRAFT and return its hash.
    ///
    /// Fails with `DuplicateSubmission` when the normalized content was
    /// already registered, naming the first submission that carried it.
    pub async fn store(
        &self,
        payload: &str,
        metadata: SubmissionMetadata,
    ) -> Result<String, ArchiveError> {
        if normalize_content(payload).is_empty() {
            return Err(ArchiveError::EmptyContent);
        }

        let content_hash = content_hash(payload);
        let hash = submission_hash(payload, &metadata);

        let mut state = self.state.lock().await;

        if let Some(entry) = state.content_index.get(&content_hash) {
            debug!(
                content_hash = %content_hash,
                first_hash = %entry.first_hash,
                "Rejected duplicate content"
            );
            return Err(ArchiveError::DuplicateSubmission {
                first_hash: entry.first_hash.clone(),
                content_hash,
            });
        }
        // The submission hash covers the payload, so a clash here implies
        // identical content and was already caught above.
        if let Some(existing) = state.records.get(&hash) {
            return Err(ArchiveError::DuplicateSubmission {
                first_hash: existing.hash.clone(),
                content_hash,
            });
        }

        let now = Utc::now();
        let sequence = state.next_sequence;
        let record = SubmissionRecord {
            hash: hash.clone(),
            sequence,
            title: metadata.title,
            contributor_id: metadata.contributor_id,
            category: metadata.category,
            text: payload.to_string(),
            content_hash: content_hash.clone(),
            status: SubmissionStatus::Draft,
            metals: Default::default(),
            scores: None,
            poc_score: None,
            epoch: None,
            rationale: None,
            outcome: None,
            similarity_cache: Vec::new(),
            evaluation_attempts: 0,
            superseded_by: None,
            created_at: now,
            updated_at: now,
        };
        let contributor = record.contributor_id.clone();

        state.next_sequence += 1;
        state.order.insert(sequence, hash.clone());
        state.records.insert(hash.clone(), record);
        state.content_index.insert(
            content_hash.clone(),
            ContentIndexEntry {
                content_hash: content_hash.clone(),
                first_hash: hash.clone(),
                registered_at: now,
            },
        );

        if let Err(e) = self.persist(&state).await {
            warn!(hash = %hash, error = %e, "Rolling back unsaved submission");
            state.content_index.remove(&content_hash);
            state.records.remove(&hash);
            state.order.remove(&sequence);
            state.next_sequence = sequence;
            return Err(e);
        }

        info!(
            hash = %hash,
            sequence = sequence,
            contributor = %contributor,
            "Stored submission"
        );
        Ok(hash)
    }

    /// Apply `mutate` to one record and persist, restoring it on failure.
    async fn update_record<F>(&self, hash: &str, mutate: F) -> Result<SubmissionRecord, ArchiveError>
    where
        F: FnOnce(&mut SubmissionRecord) -> Result<(), ArchiveError>,
    {
        let mut state = self.state.lock().await;

        let record = state
            .records
            .get_mut(hash)
            .ok_or_else(|| ArchiveError::NotFound(hash.to_string()))?;
        let previous = record.clone();
        mutate(record)?;
        record.updated_at = Utc::now();
        let updated = record.clone();

        if let Err(e) = self.persist(&state).await {
            warn!(hash = %hash, error = %e, "Rolling back unsaved record update");
            state.records.insert(hash.to_string(), previous);
            return Err(e);
        }

        Ok(updated)
    }

    /// Move a record along the lifecycle graph.
    pub async fn transition_status(
        &self,
        hash: &str,
        new_status: SubmissionStatus,
    ) -> Result<SubmissionRecord, ArchiveError> {
        self.record_outcome(hash, new_status, EvaluationOutcome::default())
            .await
    }

    /// Transition and store evaluation annotations in one durable write.
    pub async fn record_outcome(
        &self,
        hash: &str,
        new_status: SubmissionStatus,
        outcome: EvaluationOutcome,
    ) -> Result<SubmissionRecord, ArchiveError> {
        let record = self
            .update_record(hash, |record| {
                check_transition(record, new_status)?;
                record.status = new_status;
                outcome.apply(record);
                Ok(())
            })
            .await?;

        info!(hash = %hash, status = %new_status, "Transitioned submission");
        Ok(record)
    }

    /// Attach an outcome reason without changing status.
    pub async fn annotate(
        &self,
        hash: &str,
        reason: OutcomeReason,
    ) -> Result<SubmissionRecord, ArchiveError> {
        self.update_record(hash, |record| {
            record.outcome = Some(reason);
            Ok(())
        })
        .await
    }

    /// Mark `old_hash` as replaced by `new_hash`.
    pub async fn supersede(
        &self,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<SubmissionRecord, ArchiveError> {
        if old_hash == new_hash {
            return Err(ArchiveError::InvalidTransition {
                hash: old_hash.to_string(),
                from: self.get(old_hash).await?.status,
                to: SubmissionStatus::Superseded,
            });
        }
        if !self.contains(new_hash).await {
            return Err(ArchiveError::NotFound(new_hash.to_string()));
        }

        let record = self
            .update_record(old_hash, |record| {
                check_transition(record, SubmissionStatus::Superseded)?;
                record.status = SubmissionStatus::Superseded;
                record.superseded_by = Some(new_hash.to_string());
                Ok(())
            })
            .await?;

        info!(old = %old_hash, new = %new_hash, "Superseded submission");
        Ok(record)
    }

    /// Get a record by submission hash.
    pub async fn get(&self, hash: &str) -> Result<SubmissionRecord, ArchiveError> {
        self.state
            .lock()
            .await
            .records
            .get(hash)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(hash.to_string()))
    }

    pub async fn contains(&self, hash: &str) -> bool {
        self.state.lock().await.records.contains_key(hash)
    }

    /// First submission registered for the normalized form of `text`.
    pub async fn first_for_content(&self, text: &str) -> Option<String> {
        let key = content_hash(text);
        self.state
            .lock()
            .await
            .content_index
            .get(&key)
            .map(|entry| entry.first_hash.clone())
    }

    /// Records matching `filter`, in the requested registry order.
    pub async fn query(&self, filter: &RecordFilter) -> Vec<SubmissionRecord> {
        let state = self.state.lock().await;
        let matching = |record: &&SubmissionRecord| filter.matches(record);
        let limit = filter.limit.unwrap_or(usize::MAX);

        match filter.order {
            QueryOrder::Insertion => state
                .ordered()
                .filter(matching)
                .skip(filter.offset)
                .take(limit)
                .cloned()
                .collect(),
            QueryOrder::ReverseInsertion => state
                .ordered()
                .rev()
                .filter(matching)
                .skip(filter.offset)
                .take(limit)
                .cloned()
                .collect(),
        }
    }

    /// Position of `hash` in the insertion-ordered registry.
    pub async fn registry_index(&self, hash: &str) -> Result<usize, ArchiveError> {
        let state = self.state.lock().await;
        let record = state
            .records
            .get(hash)
            .ok_or_else(|| ArchiveError::NotFound(hash.to_string()))?;
        Ok(state.order.range(..record.sequence).count())
    }

    /// Stored text of every record (all statuses), in registry order.
    ///
    /// With `before_sequence`, only records registered earlier are returned.
    pub async fn find_similar_candidates(&self, before_sequence: Option<u64>) -> Vec<Candidate> {
        let state = self.state.lock().await;
        let upper = before_sequence.unwrap_or(u64::MAX);
        state
            .order
            .range(..upper)
            .filter_map(|(_, hash)| state.records.get(hash))
            .map(|record| Candidate {
                hash: record.hash.clone(),
                sequence: record.sequence,
                status: record.status,
                text: record.text.clone(),
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn stats(&self) -> ArchiveStats {
        let state = self.state.lock().await;
        let mut stats = ArchiveStats {
            total: state.records.len(),
            ..Default::default()
        };
        for record in state.records.values() {
            *stats.by_status.entry(record.status).or_insert(0) += 1;
        }
        stats
    }
}

fn check_transition(
    record: &SubmissionRecord,
    to: SubmissionStatus,
) -> Result<(), ArchiveError> {
    if record.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(ArchiveError::InvalidTransition {
            hash: record.hash.clone(),
            from: record.status,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Epoch, Metal, Scores};

    fn meta(title: &str) -> SubmissionMetadata {
        SubmissionMetadata::new(title, "alice", "scientific")
    }

    #[tokio::test]
    async fn test_store_creates_draft() {
        let archive = ContributionArchive::in_memory();
        let hash = archive.store("Paper A", meta("A")).await.unwrap();

        let record = archive.get(&hash).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Draft);
        assert_eq!(record.sequence, 0);
        assert!(record.scores.is_none());
        assert!(record.metals.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_content_returns_first_hash() {
        let archive = ContributionArchive::in_memory();
        let first = archive.store("Paper A", meta("A")).await.unwrap();

        let err = archive
            .store("  paper   A ", meta("A again"))
            .await
            .unwrap_err();
        match err {
            ArchiveError::DuplicateSubmission { first_hash, .. } => assert_eq!(first_hash, first),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(archive.count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let archive = ContributionArchive::in_memory();
        let err = archive.store(" \n\t ", meta("blank")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::EmptyContent));
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let archive = ContributionArchive::in_memory();
        let hash = archive.store("Paper A", meta("A")).await.unwrap();

        let err = archive
            .transition_status(&hash, SubmissionStatus::Qualified)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::InvalidTransition {
                from: SubmissionStatus::Draft,
                to: SubmissionStatus::Qualified,
                ..
            }
        ));
        assert_eq!(
            archive.get(&hash).await.unwrap().status,
            SubmissionStatus::Draft
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle_with_outcome() {
        let archive = ContributionArchive::in_memory();
        let hash = archive.store("Paper A", meta("A")).await.unwrap();

        archive
            .transition_status(&hash, SubmissionStatus::Submitted)
            .await
            .unwrap();
        archive
            .transition_status(&hash, SubmissionStatus::Evaluating)
            .await
            .unwrap();

        let scores = Scores::new(8500, 9000, 8000).unwrap();
        let record = archive
            .record_outcome(
                &hash,
                SubmissionStatus::Qualified,
                EvaluationOutcome::new()
                    .with_scores(scores)
                    .with_epoch(Epoch::Founder)
                    .with_metals([Metal::Gold].into_iter().collect())
                    .with_attempts(1),
            )
            .await
            .unwrap();

        assert_eq!(record.status, SubmissionStatus::Qualified);
        assert_eq!(record.poc_score, Some(6120));
        assert_eq!(record.epoch, Some(Epoch::Founder));
        assert!(record.metals.contains(&Metal::Gold));

        archive
            .transition_status(&hash, SubmissionStatus::Archived)
            .await
            .unwrap();
        let err = archive
            .transition_status(&hash, SubmissionStatus::Qualified)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_query_filters_and_order() {
        let archive = ContributionArchive::in_memory();
        let a = archive.store("first text", meta("A")).await.unwrap();
        let b = archive.store("second text", meta("B")).await.unwrap();
        let c = archive
            .store(
                "third text",
                SubmissionMetadata::new("C", "bob", "technical"),
            )
            .await
            .unwrap();
        archive
            .transition_status(&b, SubmissionStatus::Submitted)
            .await
            .unwrap();

        let all: Vec<String> = archive
            .query(&RecordFilter::all())
            .await
            .into_iter()
            .map(|r| r.hash)
            .collect();
        assert_eq!(all, vec![a.clone(), b.clone(), c.clone()]);

        let reversed: Vec<String> = archive
            .query(&RecordFilter::all().with_order(QueryOrder::ReverseInsertion))
            .await
            .into_iter()
            .map(|r| r.hash)
            .collect();
        assert_eq!(reversed, vec![c.clone(), b.clone(), a.clone()]);

        let drafts = archive
            .query(&RecordFilter::all().with_status(SubmissionStatus::Draft))
            .await;
        assert_eq!(drafts.len(), 2);

        let bob = archive
            .query(&RecordFilter::all().with_contributor("bob"))
            .await;
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].hash, c);

        let page = archive.query(&RecordFilter::all().with_page(1, 1)).await;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].hash, b);

        assert_eq!(archive.registry_index(&c).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_candidates_cover_all_statuses_before_sequence() {
        let archive = ContributionArchive::in_memory();
        let a = archive.store("alpha", meta("A")).await.unwrap();
        archive
            .transition_status(&a, SubmissionStatus::Submitted)
            .await
            .unwrap();
        archive.store("beta", meta("B")).await.unwrap();
        let c = archive.store("gamma", meta("C")).await.unwrap();

        let sequence = archive.get(&c).await.unwrap().sequence;
        let candidates = archive.find_similar_candidates(Some(sequence)).await;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].status, SubmissionStatus::Submitted);
        assert_eq!(candidates[1].status, SubmissionStatus::Draft);

        assert_eq!(archive.find_similar_candidates(None).await.len(), 3);
    }

    #[tokio::test]
    async fn test_supersede_links_records() {
        let archive = ContributionArchive::in_memory();
        let old = archive.store("version one", meta("v1")).await.unwrap();
        let new = archive.store("version two", meta("v2")).await.unwrap();

        // DRAFT cannot be superseded
        assert!(archive.supersede(&old, &new).await.is_err());

        for status in [SubmissionStatus::Submitted, SubmissionStatus::Unqualified] {
            archive.transition_status(&old, status).await.unwrap();
        }
        let record = archive.supersede(&old, &new).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Superseded);
        assert_eq!(record.superseded_by.as_deref(), Some(new.as_str()));

        let stats = archive.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get(&SubmissionStatus::Superseded), Some(&1));
    }

    #[tokio::test]
    async fn test_concurrent_identical_stores_register_once() {
        let archive = std::sync::Arc::new(ContributionArchive::in_memory());
        let mut handles = Vec::new();
        for n in 0..8 {
            let archive = archive.clone();
            handles.push(tokio::spawn(async move {
                archive
                    .store("The Same Paper", meta(&format!("copy {n}")))
                    .await
            }));
        }

        let mut stored = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => stored += 1,
                Err(ArchiveError::DuplicateSubmission { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(archive.count().await, 1);
    }
}
