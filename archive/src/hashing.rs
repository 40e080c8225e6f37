//! Content addressing for submissions.
//!
//! Two hashes are derived for every submission:
//! - the *content hash* of the normalized text (dedup key)
//! - the *submission hash* of payload + metadata (primary record key)

use sha2::{Digest, Sha256};

use crate::record::SubmissionMetadata;

/// Lowercase the text and collapse every whitespace run to a single space.
pub fn normalize_content(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hash of the normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"content\0");
    hasher.update(normalize_content(text).as_bytes());
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

/// Hash of the raw payload and its metadata.
///
/// Every field is length-prefixed so distinct field splits never collide.
pub fn submission_hash(payload: &str, metadata: &SubmissionMetadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"submission\0");
    for field in [
        metadata.title.as_str(),
        metadata.contributor_id.as_str(),
        metadata.category.as_str(),
        payload,
    ] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(title: &str) -> SubmissionMetadata {
        SubmissionMetadata::new(title, "alice", "scientific")
    }

    #[test]
    fn test_normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize_content("  Hello\n\tWORLD   again "),
            "hello world again"
        );
    }

    #[test]
    fn test_content_hash_ignores_formatting() {
        assert_eq!(
            content_hash("Paper A\n\nabout fractals"),
            content_hash("paper a about   FRACTALS")
        );
        assert_ne!(content_hash("paper a"), content_hash("paper b"));
    }

    #[test]
    fn test_submission_hash_covers_metadata() {
        let a = submission_hash("text", &metadata("Title"));
        let b = submission_hash("text", &metadata("Other"));
        assert_ne!(a, b);
        assert!(a.starts_with("sha256-"));
        assert_eq!(a, submission_hash("text", &metadata("Title")));
    }

    #[test]
    fn test_submission_hash_field_boundaries() {
        let a = submission_hash("xy", &SubmissionMetadata::new("ab", "c", "d"));
        let b = submission_hash("xy", &SubmissionMetadata::new("a", "bc", "d"));
        assert_ne!(a, b);
    }
}
