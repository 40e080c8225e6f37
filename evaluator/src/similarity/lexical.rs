//! In-process lexical similarity.
//!
//! Texts become term-frequency vectors over lowercase word unigrams and
//! bigrams; similarity is their cosine. `BTreeMap` keeps summation order
//! fixed so scores are bit-for-bit reproducible.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{sort_matches, CorpusDocument, SimilarityMatch, SimilarityService};
use crate::error::SimilarityError;

type TermVector = BTreeMap<String, f64>;

/// Word-shingle cosine similarity.
#[derive(Debug, Clone, Default)]
pub struct LexicalSimilarity;

impl LexicalSimilarity {
    pub fn new() -> Self {
        Self
    }

    fn vector(text: &str) -> TermVector {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let mut vector = TermVector::new();
        for word in &words {
            *vector.entry(word.clone()).or_insert(0.0) += 1.0;
        }
        for pair in words.windows(2) {
            *vector.entry(format!("{} {}", pair[0], pair[1])).or_insert(0.0) += 1.0;
        }
        vector
    }

    fn norm(vector: &TermVector) -> f64 {
        vector.values().map(|v| v * v).sum::<f64>().sqrt()
    }

    fn cosine(a: &TermVector, a_norm: f64, b: &TermVector) -> f64 {
        let b_norm = Self::norm(b);
        if a_norm == 0.0 || b_norm == 0.0 {
            return 0.0;
        }
        let dot: f64 = a
            .iter()
            .filter_map(|(term, weight)| b.get(term).map(|other| weight * other))
            .sum();
        (dot / (a_norm * b_norm)).clamp(0.0, 1.0)
    }

    /// Similarity of two texts without going through the async trait.
    pub fn score(a: &str, b: &str) -> f64 {
        let a = Self::vector(a);
        Self::cosine(&a, Self::norm(&a), &Self::vector(b))
    }
}

#[async_trait]
impl SimilarityService for LexicalSimilarity {
    fn id(&self) -> &str {
        "lexical"
    }

    async fn rank(&self, text: &str, corpus: &[CorpusDocument]) -> Result<Vec<SimilarityMatch>, SimilarityError> {
        let query = Self::vector(text);
        let query_norm = Self::norm(&query);

        let mut matches: Vec<SimilarityMatch> = corpus
            .iter()
            .map(|doc| SimilarityMatch {
                hash: doc.hash.clone(),
                similarity: Self::cosine(&query, query_norm, &Self::vector(&doc.text)),
            })
            .collect();
        sort_matches(&mut matches);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_scores_one() {
        let text = "Distributed ledgers need conservation invariants.";
        assert!((LexicalSimilarity::score(text, text) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_case_and_punctuation_ignored() {
        let a = "Proof of contribution, scored!";
        let b = "proof OF contribution scored";
        assert!(LexicalSimilarity::score(a, b) > 0.999);
    }

    #[test]
    fn test_word_order_matters_through_bigrams() {
        let a = "alpha beta gamma delta";
        let b = "delta gamma beta alpha";
        let score = LexicalSimilarity::score(a, b);
        assert!(score > 0.0 && score < 0.9);
    }

    #[test]
    fn test_empty_text_scores_zero() {
        assert_eq!(LexicalSimilarity::score("", "anything"), 0.0);
        assert_eq!(LexicalSimilarity::score("...", "!!!"), 0.0);
    }

    #[tokio::test]
    async fn test_rank_orders_best_first() {
        let corpus = vec![
            CorpusDocument::new("far", "cooking pasta with tomatoes"),
            CorpusDocument::new("near", "token ledger with epoch caps and metals"),
            CorpusDocument::new("mid", "a ledger of recipes"),
        ];
        let matches = LexicalSimilarity::new()
            .rank("epoch caps in a token ledger", &corpus)
            .await
            .unwrap();

        assert_eq!(matches[0].hash, "near");
        assert_eq!(matches.last().unwrap().hash, "far");
    }

    #[tokio::test]
    async fn test_rank_is_deterministic() {
        let corpus: Vec<CorpusDocument> = (0..20)
            .map(|n| CorpusDocument::new(format!("h{n}"), format!("document number {n} about ledgers")))
            .collect();
        let lexical = LexicalSimilarity::new();
        let first = lexical.rank("ledgers document", &corpus).await.unwrap();
        let second = lexical.rank("ledgers document", &corpus).await.unwrap();
        assert_eq!(first, second);
    }
}
