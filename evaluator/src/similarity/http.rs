//! Remote similarity service over HTTP.
//!
//! `POST {endpoint}` with `{"text": ..., "candidates": [{"hash", "text"}]}`,
//! expecting `{"matches": [{"hash", "similarity"}]}`.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use super::{sort_matches, CorpusDocument, SimilarityMatch, SimilarityService};
use crate::error::SimilarityError;

pub struct HttpSimilarity {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct RankRequest<'a> {
    text: &'a str,
    candidates: &'a [CorpusDocument],
}

#[derive(Debug, Deserialize)]
struct RankResponse {
    matches: Vec<SimilarityMatch>,
}

impl HttpSimilarity {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SimilarityError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SimilarityError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            timeout,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl SimilarityService for HttpSimilarity {
    fn id(&self) -> &str {
        &self.endpoint
    }

    async fn rank(&self, text: &str, corpus: &[CorpusDocument]) -> Result<Vec<SimilarityMatch>, SimilarityError> {
        if corpus.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&RankRequest {
            text,
            candidates: corpus,
        });
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SimilarityError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }
            } else {
                SimilarityError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SimilarityError::Transport(format!("HTTP {}: {}", status, body)));
        }

        let body: RankResponse = response
            .json()
            .await
            .map_err(|e| SimilarityError::InvalidResponse(e.to_string()))?;

        let known: HashSet<&str> = corpus.iter().map(|d| d.hash.as_str()).collect();
        let mut matches = Vec::with_capacity(body.matches.len());
        for m in body.matches {
            if !m.similarity.is_finite() || !(0.0..=1.0).contains(&m.similarity) {
                return Err(SimilarityError::InvalidResponse(format!(
                    "similarity {} for {} outside [0, 1]",
                    m.similarity, m.hash
                )));
            }
            if known.contains(m.hash.as_str()) {
                matches.push(m);
            } else {
                debug!(hash = %m.hash, "Dropping match for unknown candidate");
            }
        }

        sort_matches(&mut matches);
        Ok(matches)
    }
}
