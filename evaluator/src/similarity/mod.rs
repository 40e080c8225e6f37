//! Similarity collaborator.
//!
//! Ranks a corpus of archived documents against a query text:
//! - `LexicalSimilarity`: deterministic in-process word-shingle cosine
//! - `HttpSimilarity`: remote JSON service

pub mod http;
pub mod lexical;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::SimilarityError;

pub use http::HttpSimilarity;
pub use lexical::LexicalSimilarity;

/// A document the query is compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub hash: String,
    pub text: String,
}

impl CorpusDocument {
    pub fn new(hash: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            text: text.into(),
        }
    }
}

/// Similarity of the query to one corpus document, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub hash: String,
    pub similarity: f64,
}

#[async_trait]
pub trait SimilarityService: Send + Sync {
    fn id(&self) -> &str;

    /// Score `text` against every document in `corpus`, best match first.
    async fn rank(&self, text: &str, corpus: &[CorpusDocument]) -> Result<Vec<SimilarityMatch>, SimilarityError>;

    /// Similarity between two texts.
    async fn pairwise(&self, a: &str, b: &str) -> Result<f64, SimilarityError> {
        let corpus = [CorpusDocument::new("pair", b)];
        let matches = self.rank(a, &corpus).await?;
        Ok(matches.first().map(|m| m.similarity).unwrap_or(0.0))
    }
}

/// Sort by similarity descending, ties by hash, so rankings are stable.
pub fn sort_matches(matches: &mut [SimilarityMatch]) {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.hash.cmp(&b.hash))
    });
}
