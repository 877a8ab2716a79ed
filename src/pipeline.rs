//! Ingestion pipelines.
//!
//! Each [`Pipeline`] is a pair of steps:
//!
//! 1. **raw**: fetch items for a partition, normalize them into
//!    [`Document`]s and persist them with the [`DocumentStore`].
//! 2. **embed**: load the documents, embed their text in batches, attach
//!    sanitized metadata and ids, and upsert into a namespaced index.
//!
//! The step functions ([`fetch_issues`], [`fetch_discussions`],
//! [`scrape_docs`], [`embed_step`]) take their collaborators as trait
//! objects. [`ingest`] and [`embed`] wire in the configured HTTP clients
//! and stores for the CLI.
//!
//! Steps are strictly sequential and any error fails the whole step.

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::batch::{embed_in_batches, BatchPlan};
use crate::config::{Config, DocsConfig, PipelineConfig};
use crate::documents::DocumentStore;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::github::{
    convert_discussions_to_documents, convert_issues_to_documents, GithubClient, GithubSource,
};
use crate::ids::{assign_ids, IdPolicy};
use crate::models::{Document, StepReport, VectorRecord};
use crate::pacing::Pacer;
use crate::partitions::{TimeWindow, WeeklyPartitions, UNPARTITIONED_KEY};
use crate::sanitize::sanitize_metadata;
use crate::sitemap::{PageSource, SitemapScraper};
use crate::store::{create_store, VectorStore};

pub const DEFAULT_INDEX: &str = "dagster-knowledge";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    GithubIssues,
    GithubDiscussions,
    Docs,
}

impl Pipeline {
    pub const ALL: [Pipeline; 3] = [
        Pipeline::GithubIssues,
        Pipeline::GithubDiscussions,
        Pipeline::Docs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::GithubIssues => "github-issues",
            Pipeline::GithubDiscussions => "github-discussions",
            Pipeline::Docs => "docs",
        }
    }

    pub fn raw_step(&self) -> &'static str {
        match self {
            Pipeline::GithubIssues => "github_issues_raw",
            Pipeline::GithubDiscussions => "github_discussions_raw",
            Pipeline::Docs => "docs_scrape_raw",
        }
    }

    pub fn embed_step(&self) -> &'static str {
        match self {
            Pipeline::GithubIssues => "github_issues_embeddings",
            Pipeline::GithubDiscussions => "github_discussions_embeddings",
            Pipeline::Docs => "docs_embedding",
        }
    }

    /// Docs are scraped whole; GitHub pipelines run per weekly partition.
    pub fn is_partitioned(&self) -> bool {
        !matches!(self, Pipeline::Docs)
    }

    fn default_namespace(&self) -> &'static str {
        match self {
            Pipeline::GithubIssues | Pipeline::GithubDiscussions => "dagster-github",
            Pipeline::Docs => "dagster-docs",
        }
    }

    fn default_batch(&self) -> BatchPlan {
        match self {
            Pipeline::GithubDiscussions => BatchPlan::Fixed(20),
            Pipeline::GithubIssues | Pipeline::Docs => BatchPlan::Single,
        }
    }

    fn default_id_policy(&self) -> IdPolicy {
        match self {
            Pipeline::GithubIssues | Pipeline::GithubDiscussions => IdPolicy::Sequential,
            Pipeline::Docs => IdPolicy::SourceHash,
        }
    }

    fn overrides<'a>(&self, config: &'a Config) -> &'a PipelineConfig {
        match self {
            Pipeline::GithubIssues => &config.pipelines.github_issues,
            Pipeline::GithubDiscussions => &config.pipelines.github_discussions,
            Pipeline::Docs => &config.pipelines.docs,
        }
    }

    /// Embed settings for this pipeline: config overrides on top of the
    /// pipeline defaults.
    pub fn settings(&self, config: &Config) -> EmbedSettings {
        let o = self.overrides(config);
        EmbedSettings {
            index: o.index.clone().unwrap_or_else(|| DEFAULT_INDEX.to_string()),
            namespace: Some(
                o.namespace
                    .clone()
                    .unwrap_or_else(|| self.default_namespace().to_string()),
            ),
            batch: o
                .batch_size
                .map(|n| BatchPlan::from_size(Some(n)))
                .unwrap_or_else(|| self.default_batch()),
            id_policy: o.id_policy.unwrap_or_else(|| self.default_id_policy()),
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pipeline {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().replace('_', "-").as_str() {
            "github-issues" | "issues" => Ok(Pipeline::GithubIssues),
            "github-discussions" | "discussions" => Ok(Pipeline::GithubDiscussions),
            "docs" => Ok(Pipeline::Docs),
            other => anyhow::bail!(
                "Unknown pipeline: '{}'. Must be github-issues, github-discussions, or docs.",
                other
            ),
        }
    }
}

/// Where and how a pipeline's documents are embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedSettings {
    pub index: String,
    /// `None` writes to the index's default namespace.
    pub namespace: Option<String>,
    pub batch: BatchPlan,
    pub id_policy: IdPolicy,
}

/// Distinct `(index, namespace)` pairs written by the configured
/// pipelines, in pipeline order.
pub fn configured_targets(config: &Config) -> Vec<(String, Option<String>)> {
    let mut targets: Vec<(String, Option<String>)> = Vec::new();
    for pipeline in Pipeline::ALL {
        let settings = pipeline.settings(config);
        let target = (settings.index, settings.namespace);
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

/// How the partition of a step is chosen on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSelector {
    /// Most recent complete week.
    Latest,
    Key(String),
    /// Explicit `[start, end)` days.
    Range { start: NaiveDate, end: NaiveDate },
}

/// A resolved partition: the document-store key and, for partitioned
/// pipelines, its time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub key: String,
    pub window: Option<TimeWindow>,
}

impl Partition {
    pub fn unpartitioned() -> Self {
        Self {
            key: UNPARTITIONED_KEY.to_string(),
            window: None,
        }
    }

    fn report_key(&self) -> Option<String> {
        self.window.map(|_| self.key.clone())
    }
}

/// Resolve `selector` for `pipeline` at time `now`.
pub fn resolve_partition(
    pipeline: Pipeline,
    partitions: &WeeklyPartitions,
    selector: &PartitionSelector,
    now: DateTime<Utc>,
) -> Result<Partition> {
    if !pipeline.is_partitioned() {
        if *selector != PartitionSelector::Latest {
            warn!(pipeline = %pipeline, "pipeline is not partitioned; ignoring partition selection");
        }
        return Ok(Partition::unpartitioned());
    }

    let window = match selector {
        PartitionSelector::Latest => partitions
            .latest_complete(now)
            .context("no complete weekly partition yet")?,
        PartitionSelector::Key(key) => partitions.window_for_key(key)?,
        PartitionSelector::Range { start, end } => TimeWindow::from_dates(*start, *end)?,
    };
    Ok(Partition {
        key: window.key(),
        window: Some(window),
    })
}

// ============ Raw steps ============

/// Fetch the issues created in `window` and normalize them.
pub async fn fetch_issues(
    source: &dyn GithubSource,
    window: &TimeWindow,
) -> Result<(Vec<Document>, StepReport)> {
    let issues = source.get_issues(window).await?;
    let docs = convert_issues_to_documents(&issues);
    info!(issues = docs.len(), %window, "fetched issues");
    let report = StepReport::new(Pipeline::GithubIssues.raw_step(), Some(window.key()))
        .with("documents", docs.len());
    Ok((docs, report))
}

/// Fetch the discussions created in `window` and normalize them.
pub async fn fetch_discussions(
    source: &dyn GithubSource,
    window: &TimeWindow,
) -> Result<(Vec<Document>, StepReport)> {
    let discussions = source.get_discussions(window).await?;
    let docs = convert_discussions_to_documents(&discussions);
    info!(discussions = docs.len(), %window, "fetched discussions");
    let report = StepReport::new(Pipeline::GithubDiscussions.raw_step(), Some(window.key()))
        .with("documents", docs.len());
    Ok((docs, report))
}

/// Limits applied while scraping documentation pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeLimits {
    /// `0` scrapes every sitemap URL.
    pub max_pages: usize,
    pub delay: Duration,
}

impl From<&DocsConfig> for ScrapeLimits {
    fn from(config: &DocsConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            delay: Duration::from_millis(config.request_delay_ms),
        }
    }
}

/// Scrape the first `max_pages` sitemap URLs, waiting `delay` between
/// requests. Pages that fail or have no text are skipped.
pub async fn scrape_docs(
    source: &dyn PageSource,
    limits: &ScrapeLimits,
) -> Result<(Vec<Document>, StepReport)> {
    let mut urls = source.parse_sitemap().await?;
    if limits.max_pages > 0 {
        urls.truncate(limits.max_pages);
    }

    let mut docs = Vec::with_capacity(urls.len());
    for (i, url) in urls.iter().enumerate() {
        if i > 0 && !limits.delay.is_zero() {
            tokio::time::sleep(limits.delay).await;
        }
        match source.scrape_page(url).await {
            Ok(Some(doc)) => docs.push(doc),
            Ok(None) => debug!(%url, "page has no text, skipped"),
            Err(e) => warn!(%url, error = %format!("{:#}", e), "failed to scrape page"),
        }
    }

    info!(pages = urls.len(), documents = docs.len(), "scraped docs");
    let report = StepReport::new(Pipeline::Docs.raw_step(), None)
        .with("pages_scraped", urls.len())
        .with("documents", docs.len());
    Ok((docs, report))
}

// ============ Embed step ============

/// What one embed-and-upsert pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedOutcome {
    pub ids: Vec<String>,
    /// Records the store reported as written.
    pub upserted: usize,
    /// Length of the returned vectors; `0` when nothing was embedded.
    pub dimension: usize,
}

/// Embed `docs` and upsert them into the index and namespace of `settings`.
///
/// The index is created with the provider's dimension if it does not
/// exist. Ids, vectors and metadata stay position-aligned with `docs`.
pub async fn embed_and_upsert(
    provider: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    docs: &[Document],
    settings: &EmbedSettings,
    pacer: &mut Pacer,
) -> Result<EmbedOutcome> {
    let index_dimension = provider.dims();
    ensure!(
        index_dimension > 0,
        "embedding provider '{}' has no dimension; check [embedding] in config",
        provider.model_name()
    );

    store.ensure_index(&settings.index, index_dimension).await?;
    let (handle, params) = store
        .resolve_namespace(&settings.index, settings.namespace.as_deref())
        .await?;

    let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
    let vectors = embed_in_batches(provider, &texts, settings.batch, pacer).await?;
    let dimension = vectors.first().map_or(0, Vec::len);
    let ids = assign_ids(settings.id_policy, docs)?;
    ensure!(
        vectors.len() == docs.len() && ids.len() == docs.len(),
        "embedding produced {} vectors and {} ids for {} documents",
        vectors.len(),
        ids.len(),
        docs.len()
    );

    let records: Vec<VectorRecord> = docs
        .iter()
        .zip(vectors)
        .zip(ids.iter())
        .map(|((doc, vector), id)| VectorRecord {
            id: id.clone(),
            vector,
            metadata: sanitize_metadata(&doc.metadata),
        })
        .collect();

    let upserted = store.upsert(&handle, &records, &params).await?;
    info!(
        backend = store.backend(),
        index = %handle.name,
        namespace = params.key(),
        upserted,
        "upserted vectors"
    );

    Ok(EmbedOutcome {
        ids,
        upserted,
        dimension,
    })
}

/// Run the embed step of `pipeline` and build its report.
pub async fn embed_step(
    pipeline: Pipeline,
    provider: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    docs: &[Document],
    settings: &EmbedSettings,
    pacer: &mut Pacer,
    partition: &Partition,
) -> Result<StepReport> {
    let outcome = embed_and_upsert(provider, store, docs, settings, pacer).await?;
    let report = StepReport::new(pipeline.embed_step(), partition.report_key());
    Ok(match pipeline {
        Pipeline::GithubIssues => report.with("number_of_issues", docs.len()),
        Pipeline::GithubDiscussions => report.with("number_of_discussions", docs.len()),
        Pipeline::Docs => {
            let urls: Vec<&str> = docs.iter().filter_map(|d| d.source()).collect();
            report
                .with("documents_embedded", docs.len())
                .with("embedding_dimension", outcome.dimension)
                .with("urls_processed", json!(urls))
        }
    })
}

/// Report what the embed step would do, without calling the provider or
/// the store.
pub fn dry_run_report(
    pipeline: Pipeline,
    docs: &[Document],
    settings: &EmbedSettings,
    partition: &Partition,
) -> Result<StepReport> {
    // Surfaces missing `source` metadata before any API call is made.
    assign_ids(settings.id_policy, docs)?;
    Ok(StepReport::new(pipeline.embed_step(), partition.report_key())
        .with("dry_run", true)
        .with("documents", docs.len())
        .with("embedding_calls", settings.batch.calls_for(docs.len()))
        .with("index", settings.index.as_str())
        .with("namespace", settings.namespace.clone().unwrap_or_default())
        .with("id_policy", settings.id_policy.as_str()))
}

// ============ CLI wiring ============

/// Run the raw step of `pipeline` with the configured HTTP clients and
/// persist its documents.
pub async fn ingest(config: &Config, pipeline: Pipeline, partition: &Partition) -> Result<StepReport> {
    let span = info_span!(
        "step",
        step = pipeline.raw_step(),
        partition = %partition.key,
        run_id = %Uuid::new_v4()
    );
    async {
        let (docs, report) = match (pipeline, &partition.window) {
            (Pipeline::GithubIssues, Some(window)) => {
                fetch_issues(&GithubClient::from_config(&config.github)?, window).await?
            }
            (Pipeline::GithubDiscussions, Some(window)) => {
                fetch_discussions(&GithubClient::from_config(&config.github)?, window).await?
            }
            (Pipeline::Docs, _) => {
                let scraper = SitemapScraper::from_config(&config.docs)?;
                scrape_docs(&scraper, &ScrapeLimits::from(&config.docs)).await?
            }
            (_, None) => anyhow::bail!("pipeline {} requires a time window", pipeline),
        };

        let store = DocumentStore::new(&config.documents.dir);
        let path = store.write(pipeline.name(), &partition.key, &docs)?;
        debug!(path = %path.display(), "persisted documents");
        Ok::<_, anyhow::Error>(report)
    }
    .instrument(span)
    .await
}

/// Run the embed step of `pipeline` against the configured provider and
/// vector store.
pub async fn embed(
    config: &Config,
    pipeline: Pipeline,
    partition: &Partition,
    dry_run: bool,
) -> Result<StepReport> {
    let span = info_span!(
        "step",
        step = pipeline.embed_step(),
        partition = %partition.key,
        run_id = %Uuid::new_v4()
    );
    async {
        let docs = DocumentStore::new(&config.documents.dir).read(pipeline.name(), &partition.key)?;
        let settings = pipeline.settings(config);

        if dry_run {
            return dry_run_report(pipeline, &docs, &settings, partition);
        }

        let provider = create_provider(&config.embedding)?;
        let store = create_store(&config.store).await?;
        let mut pacer = Pacer::from_config(&config.pacing);
        embed_step(
            pipeline,
            provider.as_ref(),
            store.as_ref(),
            &docs,
            &settings,
            &mut pacer,
            partition,
        )
        .await
    }
    .instrument(span)
    .await
}
