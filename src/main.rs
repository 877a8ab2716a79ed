//! # Knowledge Ingest CLI (`kbi`)
//!
//! The `kbi` binary runs the ingestion steps one at a time or end to end.
//!
//! ## Usage
//!
//! ```bash
//! kbi --config ./config/kbi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbi init` | Create the local vector store schema |
//! | `kbi partitions` | List complete weekly partitions |
//! | `kbi ingest <pipeline>` | Fetch and persist documents |
//! | `kbi embed <pipeline>` | Embed persisted documents and upsert them |
//! | `kbi run <pipeline\|all>` | Ingest then embed |
//! | `kbi search "<query>"` | Semantic search over the index |
//! | `kbi stats` | Vector counts per namespace |
//!
//! Pipelines: `github-issues`, `github-discussions`, `docs`.
//!
//! ## Examples
//!
//! ```bash
//! # Embed the issues of one week
//! kbi run github-issues --partition 2024-03-03
//!
//! # Re-embed an explicit window without calling the APIs
//! kbi embed github-discussions --start 2024-03-01 --end 2024-03-08 --dry-run
//!
//! # Machine-readable step report
//! kbi --json run docs
//! ```
//!
//! Logs go to stderr and honour `RUST_LOG`; command output goes to stdout.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use knowledge_ingest::config::{self, Config};
use knowledge_ingest::models::StepReport;
use knowledge_ingest::partitions::WeeklyPartitions;
use knowledge_ingest::pipeline::{self, Pipeline, PartitionSelector};
use knowledge_ingest::store::sqlite::SqliteStore;
use knowledge_ingest::{search, stats};

/// Knowledge Ingest CLI: weekly ingestion of GitHub and documentation
/// content into a namespaced vector index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbi.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbi",
    about = "Knowledge Ingest — embed GitHub issues, discussions and docs into a vector index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kbi.toml`. Secrets are read from the
    /// environment, never from this file.
    #[arg(long, global = true, default_value = "./config/kbi.toml")]
    config: PathBuf,

    /// Print step reports and results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the local vector store.
    ///
    /// Creates the SQLite database and its tables. Idempotent.
    Init,

    /// List complete weekly partitions, most recent first.
    Partitions {
        /// Number of partitions to show.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Fetch documents for a pipeline and persist them.
    Ingest {
        /// `github-issues`, `github-discussions`, or `docs`.
        pipeline: Pipeline,

        #[command(flatten)]
        partition: PartitionArgs,
    },

    /// Embed persisted documents and upsert them into the vector store.
    Embed {
        /// `github-issues`, `github-discussions`, or `docs`.
        pipeline: Pipeline,

        #[command(flatten)]
        partition: PartitionArgs,

        /// Show counts without calling the embedding API or the store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Ingest then embed.
    Run {
        /// A pipeline name, or `all`.
        target: String,

        #[command(flatten)]
        partition: PartitionArgs,

        /// Fetch documents but only report what the embed step would do.
        #[arg(long)]
        dry_run: bool,
    },

    /// Semantic search over the ingested content.
    Search {
        /// The search query string.
        query: String,

        /// Only search this namespace (e.g. `dagster-docs`).
        #[arg(long)]
        namespace: Option<String>,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Show vector counts per configured namespace.
    Stats,
}

/// Partition selection shared by the step commands.
///
/// Without flags the latest complete week is used. Docs ignore it.
#[derive(Args, Debug, Clone)]
struct PartitionArgs {
    /// Weekly partition key (its start date, `YYYY-MM-DD`).
    #[arg(long, conflicts_with_all = ["start", "end"])]
    partition: Option<String>,

    /// Window start (inclusive, `YYYY-MM-DD`).
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,

    /// Window end (exclusive, `YYYY-MM-DD`).
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,
}

impl PartitionArgs {
    fn selector(&self) -> PartitionSelector {
        match (&self.partition, self.start, self.end) {
            (Some(key), _, _) => PartitionSelector::Key(key.clone()),
            (None, Some(start), Some(end)) => PartitionSelector::Range { start, end },
            _ => PartitionSelector::Latest,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Partition math needs no config file; fall back to the defaults.
    let cfg = match &cli.command {
        Commands::Partitions { .. } if !cli.config.exists() => Config::default(),
        _ => config::load_config(&cli.config)?,
    };

    match cli.command {
        Commands::Init => {
            init_store(&cfg).await?;
        }
        Commands::Partitions { limit } => {
            list_partitions(&cfg, limit, cli.json)?;
        }
        Commands::Ingest {
            pipeline,
            partition,
        } => {
            let partition = resolve(&cfg, pipeline, &partition)?;
            let report = pipeline::ingest(&cfg, pipeline, &partition).await?;
            print_report(&report, cli.json)?;
        }
        Commands::Embed {
            pipeline,
            partition,
            dry_run,
        } => {
            let partition = resolve(&cfg, pipeline, &partition)?;
            let report = pipeline::embed(&cfg, pipeline, &partition, dry_run).await?;
            print_report(&report, cli.json)?;
        }
        Commands::Run {
            target,
            partition,
            dry_run,
        } => {
            let pipelines = if target == "all" {
                Pipeline::ALL.to_vec()
            } else {
                vec![target.parse::<Pipeline>()?]
            };
            for pipeline in pipelines {
                let resolved = resolve(&cfg, pipeline, &partition)?;
                let raw = pipeline::ingest(&cfg, pipeline, &resolved).await?;
                print_report(&raw, cli.json)?;
                let embedded = pipeline::embed(&cfg, pipeline, &resolved, dry_run).await?;
                print_report(&embedded, cli.json)?;
            }
        }
        Commands::Search {
            query,
            namespace,
            limit,
        } => {
            search::run_search(&cfg, &query, namespace, limit, cli.json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg, cli.json).await?;
        }
    }

    Ok(())
}

fn resolve(cfg: &Config, pipeline: Pipeline, args: &PartitionArgs) -> Result<pipeline::Partition> {
    let partitions = WeeklyPartitions::new(cfg.partitions.start);
    pipeline::resolve_partition(pipeline, &partitions, &args.selector(), Utc::now())
        .with_context(|| format!("cannot select a partition for {}", pipeline))
}

async fn init_store(cfg: &Config) -> Result<()> {
    match cfg.store.provider.as_str() {
        "sqlite" => {
            let store = SqliteStore::open(&cfg.store.path).await?;
            store.close().await;
            println!(
                "Vector store initialized at {}.",
                cfg.store.path.display()
            );
        }
        other => {
            println!(
                "Store provider '{}' needs no initialization; indexes are created on first embed.",
                other
            );
        }
    }
    Ok(())
}

fn list_partitions(cfg: &Config, limit: usize, json: bool) -> Result<()> {
    let partitions = WeeklyPartitions::new(cfg.partitions.start);
    let keys = partitions.partition_keys(Utc::now());
    let mut windows = Vec::new();
    for key in keys.iter().rev().take(limit) {
        windows.push(partitions.window_for_key(key)?);
    }

    if json {
        let rows: Vec<serde_json::Value> = windows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "key": w.key(),
                    "start": w.start.to_rfc3339(),
                    "end": w.end.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if windows.is_empty() {
        println!("No complete partitions since {}.", cfg.partitions.start);
        return Ok(());
    }
    println!("{:<12} WINDOW", "KEY");
    for w in &windows {
        println!("{:<12} {}", w.key(), w);
    }
    Ok(())
}

fn print_report(report: &StepReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    println!("{}", report.step);
    if let Some(partition) = &report.partition {
        println!("  partition: {}", partition);
    }
    for (key, value) in &report.metadata {
        match value {
            serde_json::Value::Array(items) => {
                println!("  {}: {} item(s)", key, items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => println!("    - {}", s),
                        None => println!("    - {}", item),
                    }
                }
            }
            serde_json::Value::String(s) => println!("  {}: {}", key, s),
            other => println!("  {}: {}", key, other),
        }
    }
    Ok(())
}
