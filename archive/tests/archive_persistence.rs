//! Archive persistence integration tests
//!
//! Covers:
//! - Registry order surviving a restart
//! - Deduplication against reloaded history
//! - Refusal of damaged or future-versioned snapshots
//! - Rollback of stores and transitions whose save failed

use poc_archive::{
    ArchiveError, ContributionArchive, EvaluationOutcome, OutcomeReason, RecordFilter,
    SubmissionMetadata, SubmissionStatus,
};
use tempfile::TempDir;

fn meta(title: &str, contributor: &str) -> SubmissionMetadata {
    SubmissionMetadata::new(title, contributor, "scientific")
}

#[tokio::test]
async fn test_registry_order_stable_across_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.json");

    let before: Vec<String> = {
        let archive = ContributionArchive::open(&path).await.unwrap();
        for (n, text) in ["zeta paper", "alpha paper", "mid paper", "omega paper"]
            .iter()
            .enumerate()
        {
            archive
                .store(text, meta(&format!("T{n}"), "alice"))
                .await
                .unwrap();
        }
        archive
            .query(&RecordFilter::all())
            .await
            .into_iter()
            .map(|r| r.hash)
            .collect()
    };

    let reopened = ContributionArchive::open(&path).await.unwrap();
    let after: Vec<String> = reopened
        .query(&RecordFilter::all())
        .await
        .into_iter()
        .map(|r| r.hash)
        .collect();

    assert_eq!(before, after);
    for (index, hash) in after.iter().enumerate() {
        assert_eq!(reopened.registry_index(hash).await.unwrap(), index);
    }

    // New records continue the sequence rather than reusing it
    let next = reopened
        .store("fifth paper", meta("T4", "bob"))
        .await
        .unwrap();
    assert_eq!(reopened.get(&next).await.unwrap().sequence, 4);
}

#[tokio::test]
async fn test_dedup_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.json");

    let first = {
        let archive = ContributionArchive::open(&path).await.unwrap();
        archive.store("Paper A", meta("A", "alice")).await.unwrap()
    };

    let archive = ContributionArchive::open(&path).await.unwrap();
    let err = archive
        .store("PAPER   a", meta("A-copy", "mallory"))
        .await
        .unwrap_err();
    match err {
        ArchiveError::DuplicateSubmission { first_hash, .. } => assert_eq!(first_hash, first),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(archive.count().await, 1);
    assert_eq!(
        archive.first_for_content("paper a").await.as_deref(),
        Some(first.as_str())
    );
}

#[tokio::test]
async fn test_outcomes_persist() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.json");

    let hash = {
        let archive = ContributionArchive::open(&path).await.unwrap();
        let hash = archive.store("Paper B", meta("B", "alice")).await.unwrap();
        archive
            .transition_status(&hash, SubmissionStatus::Submitted)
            .await
            .unwrap();
        archive
            .record_outcome(
                &hash,
                SubmissionStatus::Unqualified,
                EvaluationOutcome::new().with_reason(OutcomeReason::RedundantSubmission {
                    similarity: 0.97,
                    matched_hash: "sha256-earlier".to_string(),
                }),
            )
            .await
            .unwrap();
        hash
    };

    let archive = ContributionArchive::open(&path).await.unwrap();
    let record = archive.get(&hash).await.unwrap();
    assert_eq!(record.status, SubmissionStatus::Unqualified);
    assert!(matches!(
        record.outcome,
        Some(OutcomeReason::RedundantSubmission { .. })
    ));
}

#[tokio::test]
async fn test_damaged_snapshot_is_persistence_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.json");
    std::fs::write(&path, br#"{"schema_version": 1, "records": 12}"#).unwrap();

    let err = ContributionArchive::open(&path).await.err().unwrap();
    assert!(matches!(err, ArchiveError::PersistenceCorruption(_)));
}

#[tokio::test]
async fn test_future_schema_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.json");
    std::fs::write(
        &path,
        br#"{"schema_version": 99, "next_sequence": 0, "records": [], "content_index": []}"#,
    )
    .unwrap();

    let err = ContributionArchive::open(&path).await.err().unwrap();
    assert!(matches!(err, ArchiveError::PersistenceCorruption(_)));
}

/// Occupy the snapshot's temp file name with a directory so saves fail.
fn block_saves(path: &std::path::Path) -> std::path::PathBuf {
    let blocker = path.with_file_name("archive.json.tmp");
    std::fs::create_dir(&blocker).unwrap();
    blocker
}

#[tokio::test]
async fn test_failed_store_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.json");
    let archive = ContributionArchive::open(&path).await.unwrap();
    let kept = archive.store("kept paper", meta("Kept", "alice")).await.unwrap();

    let blocker = block_saves(&path);
    let err = archive
        .store("lost paper", meta("Lost", "bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::PersistenceCorruption(_)));

    assert_eq!(archive.count().await, 1);
    assert!(archive.first_for_content("lost paper").await.is_none());
    let hashes: Vec<String> = archive
        .query(&RecordFilter::all())
        .await
        .into_iter()
        .map(|r| r.hash)
        .collect();
    assert_eq!(hashes, vec![kept.clone()]);

    // Same content goes through once the obstacle is gone, at the next sequence
    std::fs::remove_dir(&blocker).unwrap();
    let retried = archive.store("lost paper", meta("Lost", "bob")).await.unwrap();
    assert_eq!(archive.get(&retried).await.unwrap().sequence, 1);

    let reopened = ContributionArchive::open(&path).await.unwrap();
    assert_eq!(reopened.count().await, 2);
    assert_eq!(reopened.registry_index(&retried).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_transition_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("archive.json");
    let archive = ContributionArchive::open(&path).await.unwrap();
    let hash = archive.store("paper", meta("P", "alice")).await.unwrap();
    let before = archive.get(&hash).await.unwrap();

    let blocker = block_saves(&path);
    let err = archive
        .transition_status(&hash, SubmissionStatus::Submitted)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::PersistenceCorruption(_)));
    assert_eq!(archive.get(&hash).await.unwrap(), before);

    std::fs::remove_dir(&blocker).unwrap();
    let record = archive
        .transition_status(&hash, SubmissionStatus::Submitted)
        .await
        .unwrap();
    assert_eq!(record.status, SubmissionStatus::Submitted);

    let reopened = ContributionArchive::open(&path).await.unwrap();
    assert_eq!(
        reopened.get(&hash).await.unwrap().status,
        SubmissionStatus::Submitted
    );
}
