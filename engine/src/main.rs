//! poc-engine - contribution archive and allocation engine
//!
//! Usage:
//!   poc-engine submit paper.md --title "On shards" --contributor alice --category research
//!   poc-engine evaluate <hash>
//!   poc-engine list --status qualified
//!   poc-engine epochs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use poc_archive::{Epoch, Metal, QueryOrder, RecordFilter, SubmissionMetadata, SubmissionStatus};
use poc_engine::{Engine, EngineConfig, DEFAULT_LOG_FILTER};

#[derive(Parser, Debug)]
#[command(name = "poc-engine")]
#[command(about = "Contribution archive and token allocation engine")]
#[command(version)]
struct Cli {
    /// Path to config file (TOML or YAML)
    #[arg(short, long, global = true, env = "POC_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory holding archive.json and ledger.json
    #[arg(long, global = true, env = "POC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// OpenAI-compatible evaluator base URL
    #[arg(long, global = true)]
    evaluator_url: Option<String>,

    /// Evaluator model name
    #[arg(long, global = true)]
    model: Option<String>,

    /// Evaluator API key
    #[arg(long, global = true, env = "POC_EVALUATOR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Similarity service API key
    #[arg(long, global = true, env = "POC_SIMILARITY_API_KEY", hide_env_values = true)]
    similarity_api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a payload and submit it for evaluation
    Submit {
        /// File holding the contribution text
        file: PathBuf,

        #[arg(long)]
        title: String,

        #[arg(long)]
        contributor: String,

        #[arg(long, default_value = "general")]
        category: String,

        /// Only store as DRAFT
        #[arg(long)]
        draft: bool,
    },

    /// Run (or resume) evaluation of a submission
    Evaluate { hash: String },

    /// Hand a DRAFT or failed submission in for evaluation
    Resubmit { hash: String },

    /// Show one record and its allocation
    Show { hash: String },

    /// List records
    List {
        #[arg(long)]
        status: Option<SubmissionStatus>,

        #[arg(long)]
        metal: Option<Metal>,

        #[arg(long)]
        epoch: Option<Epoch>,

        #[arg(long)]
        contributor: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// Newest first
        #[arg(long)]
        reverse: bool,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Per-epoch capacity and distribution
    Epochs,

    /// Balance of one contributor
    Contributor { id: String },

    /// Overlap graph as JSON
    Graph {
        #[arg(long)]
        status: Option<SubmissionStatus>,

        #[arg(long)]
        epoch: Option<Epoch>,

        #[arg(long)]
        contributor: Option<String>,
    },

    /// Allocate for QUALIFIED records left unpaid
    Reconcile,

    /// Mark an older record as replaced by a newer one
    Supersede { old: String, new: String },

    /// Record counts and ledger totals
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    // CLI overrides
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(url) = cli.evaluator_url {
        config.evaluator.base_url = url;
    }
    if let Some(model) = cli.model {
        config.evaluator.model = model;
    }
    if let Some(key) = cli.api_key {
        config.evaluator.api_key = Some(key);
    }
    if let Some(key) = cli.similarity_api_key {
        config.similarity.api_key = Some(key);
    }

    info!(
        data_dir = %config.storage.data_dir.display(),
        evaluator = %config.evaluator.base_url,
        "Starting poc-engine"
    );

    let engine = Engine::open(config).await?;

    match cli.command {
        Command::Submit {
            file,
            title,
            contributor,
            category,
            draft,
        } => {
            let payload = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let metadata = SubmissionMetadata::new(title, contributor, category);
            let record = if draft {
                let hash = engine.archive().store(&payload, metadata).await?;
                engine.archive().get(&hash).await?
            } else {
                engine.submit_text(&payload, metadata).await?
            };
            print_json(&record)?;
        }

        Command::Evaluate { hash } => {
            let verdict = engine.orchestrator().evaluate(&hash).await?;
            print_json(&verdict)?;
        }

        Command::Resubmit { hash } => {
            let record = engine.orchestrator().submit(&hash).await?;
            print_json(&record)?;
        }

        Command::Show { hash } => {
            let record = engine.archive().get(&hash).await?;
            let allocation = engine.ledger().get_allocation(&hash).await;
            print_json(&json!({ "record": record, "allocation": allocation }))?;
        }

        Command::List {
            status,
            metal,
            epoch,
            contributor,
            category,
            reverse,
            offset,
            limit,
        } => {
            let filter = RecordFilter {
                status,
                metal,
                epoch,
                contributor_id: contributor,
                category,
                order: if reverse {
                    QueryOrder::ReverseInsertion
                } else {
                    QueryOrder::Insertion
                },
                offset,
                limit,
            };
            print_json(&engine.archive().query(&filter).await)?;
        }

        Command::Epochs => {
            print_json(&engine.ledger().all_epoch_stats().await)?;
        }

        Command::Contributor { id } => {
            print_json(&engine.ledger().get_contributor_stats(&id).await)?;
        }

        Command::Graph {
            status,
            epoch,
            contributor,
        } => {
            let filter = RecordFilter {
                status,
                epoch,
                contributor_id: contributor,
                ..RecordFilter::all()
            };
            let graph = engine.graph_builder().build_graph(&filter).await?;
            println!("{}", graph.to_json()?);
        }

        Command::Reconcile => {
            print_json(&engine.orchestrator().reconcile_allocations().await?)?;
        }

        Command::Supersede { old, new } => {
            print_json(&engine.archive().supersede(&old, &new).await?)?;
        }

        Command::Stats => {
            let archive = engine.archive().stats().await;
            let epochs = engine.ledger().all_epoch_stats().await;
            let allocations = engine.ledger().allocation_count().await;
            print_json(&json!({
                "archive": archive,
                "allocations": allocations,
                "epochs": epochs,
            }))?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
