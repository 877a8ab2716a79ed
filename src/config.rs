//! TOML configuration.
//!
//! Every section has defaults that reproduce the weekly Dagster knowledge
//! base ingestion, so a config file only needs to override what differs.
//! Secrets are never read from the file: `OPENAI_API_KEY`,
//! `PINECONE_API_KEY` and `GITHUB_TOKEN` come from the environment.
//!
//! ```toml
//! [store]
//! provider = "sqlite"
//! path = "./data/vectors.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [pipelines.github_discussions]
//! batch_size = 20
//! id_policy = "stable_key"
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::ids::IdPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub partitions: PartitionsConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub pipelines: PipelinesConfig,
}

/// Vector store backend selection.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `sqlite`, `memory`, or `pinecone`.
    #[serde(default = "default_store_provider")]
    pub provider: String,
    /// Database file for the `sqlite` backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Pinecone control plane base URL.
    #[serde(default = "default_pinecone_control_url")]
    pub control_url: String,
    #[serde(default = "default_pinecone_cloud")]
    pub cloud: String,
    #[serde(default = "default_pinecone_region")]
    pub region: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            path: default_store_path(),
            control_url: default_pinecone_control_url(),
            cloud: default_pinecone_cloud(),
            region: default_pinecone_region(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_store_provider() -> String {
    "sqlite".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/vectors.sqlite")
}
fn default_pinecone_control_url() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_pinecone_cloud() -> String {
    "aws".to_string()
}
fn default_pinecone_region() -> String {
    "us-east-1".to_string()
}
fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: Option<usize>,
    /// Base URL of the embeddings API (without `/v1/embeddings`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> Option<String> {
    Some("text-embedding-3-small".to_string())
}
fn default_dims() -> Option<usize> {
    Some(1536)
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Pacing between embedding batches.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    None,
    Fixed,
    TokenBucket,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacingConfig {
    #[serde(default = "default_pacing_mode")]
    pub mode: PacingMode,
    /// Interval between batches in `fixed` mode.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            mode: default_pacing_mode(),
            delay_ms: default_delay_ms(),
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

fn default_pacing_mode() -> PacingMode {
    PacingMode::Fixed
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_burst() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartitionsConfig {
    /// First day of the first weekly partition.
    #[serde(default = "default_partition_start")]
    pub start: NaiveDate,
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        Self {
            start: default_partition_start(),
        }
    }
}

fn default_partition_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default()
}

/// Where fetched documents are kept between the ingest and embed steps.
#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_dir")]
    pub dir: PathBuf,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./data/documents")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_owner")]
    pub owner: String,
    #[serde(default = "default_github_repo")]
    pub repo: String,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_github_page_size")]
    pub page_size: u32,
    #[serde(default = "default_github_max_comments")]
    pub max_comments: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            owner: default_github_owner(),
            repo: default_github_repo(),
            api_url: default_github_api_url(),
            page_size: default_github_page_size(),
            max_comments: default_github_max_comments(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_github_owner() -> String {
    "dagster-io".to_string()
}
fn default_github_repo() -> String {
    "dagster".to_string()
}
fn default_github_api_url() -> String {
    "https://api.github.com/graphql".to_string()
}
fn default_github_page_size() -> u32 {
    50
}
fn default_github_max_comments() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    #[serde(default = "default_sitemap_url")]
    pub sitemap_url: String,
    /// Only the first `max_pages` sitemap URLs are scraped. `0` scrapes all.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            sitemap_url: default_sitemap_url(),
            max_pages: default_max_pages(),
            request_delay_ms: default_request_delay_ms(),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_sitemap_url() -> String {
    "https://docs.dagster.io/sitemap.xml".to_string()
}
fn default_max_pages() -> usize {
    4
}
fn default_request_delay_ms() -> u64 {
    500
}

/// Per-pipeline overrides. Unset fields fall back to the pipeline's own
/// defaults (see [`crate::pipeline::Pipeline`]).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Texts per embedding call. `0` sends everything in one call.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub id_policy: Option<IdPolicy>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelinesConfig {
    #[serde(default)]
    pub github_issues: PipelineConfig,
    #[serde(default)]
    pub github_discussions: PipelineConfig,
    #[serde(default)]
    pub docs: PipelineConfig,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.store.provider.as_str() {
        "sqlite" | "memory" | "pinecone" => {}
        other => bail!(
            "Unknown store provider: '{}'. Must be sqlite, memory, or pinecone.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.pacing.mode == PacingMode::TokenBucket {
        if config.pacing.requests_per_minute == 0 {
            bail!("pacing.requests_per_minute must be > 0 in token_bucket mode");
        }
        if config.pacing.burst == 0 {
            bail!("pacing.burst must be > 0 in token_bucket mode");
        }
    }

    if config.github.page_size == 0 || config.github.page_size > 100 {
        bail!("github.page_size must be in 1..=100");
    }

    for (name, pipeline) in [
        ("github_issues", &config.pipelines.github_issues),
        ("github_discussions", &config.pipelines.github_discussions),
        ("docs", &config.pipelines.docs),
    ] {
        if let Some(index) = &pipeline.index {
            if index.trim().is_empty() {
                bail!("pipelines.{}.index must not be empty", name);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.store.provider, "sqlite");
        assert_eq!(config.embedding.dims, Some(1536));
        assert_eq!(config.pacing.mode, PacingMode::Fixed);
        assert_eq!(config.pacing.delay_ms, 1000);
        assert_eq!(config.docs.max_pages, 4);
        assert_eq!(config.docs.request_delay_ms, 500);
        assert_eq!(
            config.partitions.start,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_pipeline_overrides() {
        let config: Config = toml::from_str(
            r#"
            [pipelines.github_discussions]
            batch_size = 10
            id_policy = "stable_key"
            namespace = "gh"
            "#,
        )
        .unwrap();
        let p = &config.pipelines.github_discussions;
        assert_eq!(p.batch_size, Some(10));
        assert_eq!(p.id_policy, Some(IdPolicy::StableKey));
        assert_eq!(p.namespace.as_deref(), Some("gh"));
        assert!(config.pipelines.docs.id_policy.is_none());
    }

    #[test]
    fn test_unknown_store_rejected() {
        let config: Config = toml::from_str("[store]\nprovider = \"redis\"").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_token_bucket_requires_rate() {
        let config: Config = toml::from_str(
            "[pacing]\nmode = \"token_bucket\"\nrequests_per_minute = 0",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/kbi.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
