//! Configuration for poc-engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use poc_evaluator::RetryPolicy;
use poc_ledger::EpochSchedule;

use crate::error::EngineError;
use crate::graph::GraphThresholds;

/// Log filter used when `RUST_LOG` is unset: every workspace crate at info.
pub const DEFAULT_LOG_FILTER: &str =
    "warn,poc_engine=info,poc_ledger=info,poc_archive=info,poc_evaluator=info";

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("poc-engine")
}

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub evaluator: EvaluatorConfig,
    pub similarity: SimilarityConfig,
    pub retry: RetryPolicy,
    pub redundancy: RedundancyConfig,
    pub schedule: EpochSchedule,
    pub graph: GraphThresholds,
}

impl EngineConfig {
    /// Load config from a TOML or YAML file (chosen by extension).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content)?,
            _ => Self::from_toml(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml: &str) -> Result<Self, EngineError> {
        toml::from_str(toml).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(yaml).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.schedule
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        self.retry.validate().map_err(EngineError::Config)?;
        self.graph.validate().map_err(EngineError::Config)?;

        let threshold = self.redundancy.threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(EngineError::Config(format!(
                "redundancy.threshold must be in (0, 1], got {threshold}"
            )));
        }
        if self.evaluator.timeout_secs == 0 {
            return Err(EngineError::Config(
                "evaluator.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.similarity.timeout_secs == 0 {
            return Err(EngineError::Config(
                "similarity.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.similarity.kind == SimilarityKind::Http && self.similarity.endpoint.is_none() {
            return Err(EngineError::Config(
                "similarity.endpoint is required for the http similarity service".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where state is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join("archive.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.json")
    }
}

/// OpenAI-compatible evaluator endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub base_url: String,
    pub model: String,
    /// Usually supplied through `POC_EVALUATOR_API_KEY` instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-attempt timeout
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.2".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

impl EvaluatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityKind {
    /// In-process word-shingle cosine
    Lexical,
    /// Remote ranking service
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub kind: SimilarityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Sent as a bearer token; usually supplied through `POC_SIMILARITY_API_KEY`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            kind: SimilarityKind::Lexical,
            endpoint: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl SimilarityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Archive-first redundancy check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedundancyConfig {
    /// Similarity at or above which a submission is redundant
    pub threshold: f64,
    /// Best matches kept on the record for the overlap graph
    pub cache_top_k: usize,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.90,
            cache_top_k: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poc_archive::Epoch;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!(config.storage.archive_path().ends_with("archive.json"));
        assert!(config.storage.ledger_path().ends_with("ledger.json"));
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml(
            r#"
            [storage]
            data_dir = "/tmp/poc"

            [redundancy]
            threshold = 0.8

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/poc"));
        assert_eq!(config.redundancy.threshold, 0.8);
        assert_eq!(config.redundancy.cache_top_k, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.schedule, EpochSchedule::default());
    }

    #[test]
    fn test_yaml_schedule_override() {
        let config = EngineConfig::from_yaml(
            r#"
schedule:
  total_supply: 1000000
  epochs:
    - { epoch: founder, share_bps: 4000, density_threshold: 9000, permitted_metals: [gold] }
    - { epoch: pioneer, share_bps: 3000, density_threshold: 7000, permitted_metals: [gold, silver] }
    - { epoch: community, share_bps: 2000, density_threshold: 5000, permitted_metals: [silver, copper] }
    - { epoch: ecosystem, share_bps: 1000, density_threshold: 3000, permitted_metals: [copper] }
similarity:
  kind: http
  endpoint: http://localhost:9000/rank
"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.schedule.capacity(Epoch::Founder), 400_000);
        assert_eq!(
            config.schedule.tier_capacity(Epoch::Founder, poc_archive::Metal::Gold),
            400_000
        );
        assert_eq!(config.similarity.kind, SimilarityKind::Http);
    }

    #[test]
    fn test_http_similarity_needs_endpoint() {
        let mut config = EngineConfig::default();
        config.similarity.kind = SimilarityKind::Http;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = EngineConfig::default();
        config.evaluator.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(EngineError::Config(ref reason)) if reason.contains("evaluator.timeout_secs")
        ));

        let mut config = EngineConfig::default();
        config.similarity.timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(EngineError::Config(ref reason)) if reason.contains("similarity.timeout_secs")
        ));

        let parsed = EngineConfig::from_toml("[evaluator]\ntimeout_secs = 0\n").unwrap();
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_similarity_api_key_from_yaml() {
        let config = EngineConfig::from_yaml(
            r#"
similarity:
  kind: http
  endpoint: http://localhost:9000/rank
  api_key: sim-secret
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.similarity.api_key.as_deref(), Some("sim-secret"));
        assert!(!EngineConfig::default().to_toml().unwrap().contains("api_key"));
    }

    #[test]
    fn test_default_log_filter_covers_every_crate() {
        tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        for krate in ["poc_engine", "poc_ledger", "poc_archive", "poc_evaluator"] {
            assert!(
                DEFAULT_LOG_FILTER.contains(&format!("{krate}=info")),
                "{krate} missing from default filter"
            );
        }
    }

    #[test]
    fn test_bad_redundancy_threshold() {
        let mut config = EngineConfig::default();
        config.redundancy.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_schedule() {
        let config = EngineConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = EngineConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.schedule, config.schedule);
    }
}
