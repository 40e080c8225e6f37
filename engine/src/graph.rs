//! Sandbox overlap graph.
//!
//! One node per filtered record and one edge per pair whose similarity
//! reaches the `related` threshold. Similarities come from the cache
//! written by the redundancy check when present, otherwise from a fresh
//! query. Output is deterministic: nodes by registry sequence, edges by
//! (source sequence, target sequence), similarities rounded to 4 decimals.
//!
//! Pairwise construction is O(n²) in the filtered set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use poc_archive::{
    ContributionArchive, Epoch, Metal, QueryOrder, RecordFilter, Scores, SubmissionRecord,
    SubmissionStatus,
};
use poc_evaluator::{SimilarityError, SimilarityService};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapCategory {
    ExactDuplicate,
    HighRedundancy,
    ModerateOverlap,
    Related,
}

/// Lower bounds of each overlap category. Anything under `related` is
/// low overlap and gets no edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphThresholds {
    pub exact_duplicate: f64,
    pub high_redundancy: f64,
    pub moderate_overlap: f64,
    pub related: f64,
}

impl Default for GraphThresholds {
    fn default() -> Self {
        Self {
            exact_duplicate: 0.95,
            high_redundancy: 0.85,
            moderate_overlap: 0.70,
            related: 0.50,
        }
    }
}

impl GraphThresholds {
    pub fn validate(&self) -> Result<(), String> {
        let ladder = [
            self.exact_duplicate,
            self.high_redundancy,
            self.moderate_overlap,
            self.related,
        ];
        if ladder.iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err("graph thresholds must lie in [0, 1]".to_string());
        }
        if ladder.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(format!(
                "graph thresholds must strictly decrease, got {:?}",
                ladder
            ));
        }
        Ok(())
    }

    pub fn categorize(&self, similarity: f64) -> Option<OverlapCategory> {
        if similarity >= self.exact_duplicate {
            Some(OverlapCategory::ExactDuplicate)
        } else if similarity >= self.high_redundancy {
            Some(OverlapCategory::HighRedundancy)
        } else if similarity >= self.moderate_overlap {
            Some(OverlapCategory::ModerateOverlap)
        } else if similarity >= self.related {
            Some(OverlapCategory::Related)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub hash: String,
    pub sequence: u64,
    /// Position in the full registry, not in the filtered subset
    pub registry_index: usize,
    pub title: String,
    pub contributor_id: String,
    pub status: SubmissionStatus,
    pub metals: BTreeSet<Metal>,
    pub scores: Option<Scores>,
    pub poc_score: Option<u32>,
    pub epoch: Option<Epoch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapEdge {
    /// Earlier record
    pub source: String,
    /// Later record
    pub target: String,
    pub similarity: f64,
    pub category: OverlapCategory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SandboxGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<OverlapEdge>,
}

impl SandboxGraph {
    /// Stable pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Builds overlap graphs over archive snapshots.
pub struct SandboxGraphBuilder {
    archive: Arc<ContributionArchive>,
    similarity: Arc<dyn SimilarityService>,
    thresholds: GraphThresholds,
    query_timeout: Duration,
}

impl SandboxGraphBuilder {
    pub fn new(
        archive: Arc<ContributionArchive>,
        similarity: Arc<dyn SimilarityService>,
        thresholds: GraphThresholds,
    ) -> Self {
        Self {
            archive,
            similarity,
            thresholds,
            query_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn thresholds(&self) -> &GraphThresholds {
        &self.thresholds
    }

    /// Build the graph for records matching `filter`.
    ///
    /// Paging and ordering in `filter` are ignored; the graph always covers
    /// the whole filtered set in registry order.
    pub async fn build_graph(&self, filter: &RecordFilter) -> Result<SandboxGraph, EngineError> {
        let mut filter = filter.clone();
        filter.order = QueryOrder::Insertion;
        filter.offset = 0;
        filter.limit = None;

        let registry: HashMap<String, usize> = self
            .archive
            .query(&RecordFilter::all())
            .await
            .into_iter()
            .enumerate()
            .map(|(index, record)| (record.hash, index))
            .collect();

        let records = self.archive.query(&filter).await;

        let nodes = records
            .iter()
            .map(|record| GraphNode {
                hash: record.hash.clone(),
                sequence: record.sequence,
                registry_index: registry.get(&record.hash).copied().unwrap_or_default(),
                title: record.title.clone(),
                contributor_id: record.contributor_id.clone(),
                status: record.status,
                metals: record.metals.clone(),
                scores: record.scores,
                poc_score: record.poc_score,
                epoch: record.epoch,
            })
            .collect();

        let mut edges = Vec::new();
        let mut fresh_queries = 0usize;
        for (i, earlier) in records.iter().enumerate() {
            for later in &records[i + 1..] {
                let similarity = match cached_pair(earlier, later) {
                    Some(cached) => cached,
                    None => {
                        fresh_queries += 1;
                        self.fresh_similarity(later, earlier).await?
                    }
                };
                let similarity = round4(similarity);

                if let Some(category) = self.thresholds.categorize(similarity) {
                    edges.push(OverlapEdge {
                        source: earlier.hash.clone(),
                        target: later.hash.clone(),
                        similarity,
                        category,
                    });
                }
            }
        }

        info!(
            nodes = records.len(),
            edges = edges.len(),
            fresh_queries = fresh_queries,
            "Built overlap graph"
        );
        Ok(SandboxGraph { nodes, edges })
    }

    async fn fresh_similarity(
        &self,
        query: &SubmissionRecord,
        other: &SubmissionRecord,
    ) -> Result<f64, EngineError> {
        debug!(query = %query.hash, other = %other.hash, "Querying pair similarity");
        let similarity = tokio::time::timeout(
            self.query_timeout,
            self.similarity.pairwise(&query.text, &other.text),
        )
        .await
        .map_err(|_| SimilarityError::Timeout {
            after_ms: self.query_timeout.as_millis() as u64,
        })??;
        Ok(similarity.clamp(0.0, 1.0))
    }
}

/// Similarity recorded by whichever side ran the redundancy check.
fn cached_pair(earlier: &SubmissionRecord, later: &SubmissionRecord) -> Option<f64> {
    later
        .cached_similarity(&earlier.hash)
        .or_else(|| earlier.cached_similarity(&later.hash))
}
