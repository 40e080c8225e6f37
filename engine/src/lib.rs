//! PoC Engine
//!
//! Drives contributions from submission to token allocation:
//! - Archive-first redundancy check against every earlier record
//! - Retried, time-bounded evaluation with epoch and metal classification
//! - Exactly-once allocation through the token ledger
//! - Deterministic overlap graph over archive snapshots
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────────────┐
//!                │          Engine          │
//!                └────────────┬─────────────┘
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//! ┌─────────────────┐ ┌───────────────┐ ┌─────────────────┐
//! │ Evaluation      │ │ SandboxGraph  │ │ Registration    │
//! │ Orchestrator    │ │ Builder       │ │ View            │
//! └───┬────┬────┬───┘ └──────┬────────┘ └────────┬────────┘
//!     │    │    │            │                   │
//!     │    │    └──────► SimilarityService       │
//!     │    └───────────► EvaluationClient        │
//!     ▼                                          ▼
//! ┌─────────────────────┐            ┌─────────────────────┐
//! │ ContributionArchive │◄──────────►│ TokenLedger         │
//! │ (archive.json)      │            │ (ledger.json)       │
//! └─────────────────────┘            └─────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod registration;

// Re-export main types for convenience
pub use config::{
    default_data_dir, EngineConfig, EvaluatorConfig, RedundancyConfig, SimilarityConfig,
    SimilarityKind, StorageConfig, DEFAULT_LOG_FILTER,
};
pub use engine::Engine;
pub use error::EngineError;
pub use graph::{
    GraphNode, GraphThresholds, OverlapCategory, OverlapEdge, SandboxGraph, SandboxGraphBuilder,
};
pub use orchestrator::{classify, Classification, EvaluationOrchestrator, ReconcileReport, Verdict};
pub use registration::RegistrationView;
