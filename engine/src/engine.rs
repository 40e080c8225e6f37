//! Engine assembly.
//!
//! Wires the archive, ledger, evaluator and similarity service together.
//! Nothing here is global: callers own the `Engine` and share its parts.

use std::sync::Arc;
use tracing::info;

use poc_archive::{ContributionArchive, SubmissionMetadata, SubmissionRecord};
use poc_evaluator::{
    EvaluationAudit, EvaluationClient, EvaluationService, EvaluatorError, HttpSimilarity,
    LexicalSimilarity, LlmEvaluator, OpenAiBackend, SimilarityService,
};
use poc_ledger::TokenLedger;

use crate::config::{EngineConfig, SimilarityKind};
use crate::error::EngineError;
use crate::graph::SandboxGraphBuilder;
use crate::orchestrator::EvaluationOrchestrator;
use crate::registration::RegistrationView;

pub struct Engine {
    config: EngineConfig,
    archive: Arc<ContributionArchive>,
    ledger: Arc<TokenLedger>,
    orchestrator: Arc<EvaluationOrchestrator>,
    graph: SandboxGraphBuilder,
    registration: RegistrationView,
    audit: Arc<EvaluationAudit>,
}

impl Engine {
    /// Open file-backed stores and connect to the configured services.
    pub async fn open(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let backend = OpenAiBackend::new(
            config.evaluator.base_url.clone(),
            config.evaluator.model.clone(),
            config.evaluator.api_key.clone(),
        )
        .map_err(EvaluatorError::from)?;
        let service = LlmEvaluator::new(Arc::new(backend))
            .with_max_tokens(config.evaluator.max_tokens)
            .with_temperature(config.evaluator.temperature);

        let similarity: Arc<dyn SimilarityService> = match config.similarity.kind {
            SimilarityKind::Lexical => Arc::new(LexicalSimilarity::new()),
            SimilarityKind::Http => {
                let endpoint = config.similarity.endpoint.clone().ok_or_else(|| {
                    EngineError::Config("similarity.endpoint is not set".to_string())
                })?;
                let mut http = HttpSimilarity::new(endpoint, config.similarity.timeout())?;
                if let Some(key) = config.similarity.api_key.clone() {
                    http = http.with_api_key(key);
                }
                Arc::new(http)
            }
        };

        info!(
            evaluator = %config.evaluator.base_url,
            model = %config.evaluator.model,
            similarity = ?config.similarity.kind,
            "Connecting services"
        );
        Self::open_with(config, Arc::new(service), similarity).await
    }

    /// Open file-backed stores with caller-supplied services.
    pub async fn open_with(
        config: EngineConfig,
        service: Arc<dyn EvaluationService>,
        similarity: Arc<dyn SimilarityService>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;

        let archive = ContributionArchive::open(config.storage.archive_path()).await?;
        let ledger =
            TokenLedger::open(config.storage.ledger_path(), config.schedule.clone()).await?;

        info!(
            data_dir = %config.storage.data_dir.display(),
            records = archive.count().await,
            allocations = ledger.allocation_count().await,
            "Opened engine stores"
        );
        Ok(Self::assemble(config, archive, ledger, service, similarity))
    }

    /// Non-persistent engine, mostly for tests.
    pub fn in_memory(
        config: EngineConfig,
        service: Arc<dyn EvaluationService>,
        similarity: Arc<dyn SimilarityService>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let archive = ContributionArchive::in_memory();
        let ledger = TokenLedger::in_memory(config.schedule.clone())?;
        Ok(Self::assemble(config, archive, ledger, service, similarity))
    }

    fn assemble(
        config: EngineConfig,
        archive: ContributionArchive,
        ledger: TokenLedger,
        service: Arc<dyn EvaluationService>,
        similarity: Arc<dyn SimilarityService>,
    ) -> Self {
        let archive = Arc::new(archive);
        let ledger = Arc::new(ledger);
        let audit = Arc::new(EvaluationAudit::new());

        let client = EvaluationClient::new(service, config.retry.clone())
            .with_timeout(config.evaluator.timeout())
            .with_audit(audit.clone());

        let orchestrator = EvaluationOrchestrator::new(
            archive.clone(),
            ledger.clone(),
            Arc::new(client),
            similarity.clone(),
        )
        .with_redundancy(config.redundancy.clone())
        .with_similarity_timeout(config.similarity.timeout());

        let graph = SandboxGraphBuilder::new(archive.clone(), similarity, config.graph.clone())
            .with_query_timeout(config.similarity.timeout());

        let registration = RegistrationView::new(archive.clone(), ledger.clone());

        Self {
            config,
            archive,
            ledger,
            orchestrator: Arc::new(orchestrator),
            graph,
            registration,
            audit,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn archive(&self) -> &Arc<ContributionArchive> {
        &self.archive
    }

    pub fn ledger(&self) -> &Arc<TokenLedger> {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &Arc<EvaluationOrchestrator> {
        &self.orchestrator
    }

    pub fn graph_builder(&self) -> &SandboxGraphBuilder {
        &self.graph
    }

    pub fn registration(&self) -> &RegistrationView {
        &self.registration
    }

    pub fn audit(&self) -> &Arc<EvaluationAudit> {
        &self.audit
    }

    /// Store a new payload and hand it straight in for evaluation.
    pub async fn submit_text(
        &self,
        payload: &str,
        metadata: SubmissionMetadata,
    ) -> Result<SubmissionRecord, EngineError> {
        let hash = self.archive.store(payload, metadata).await?;
        self.orchestrator.submit(&hash).await
    }
}
