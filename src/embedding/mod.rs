//! Embedding provider abstraction.
//!
//! Defines the [`EmbeddingProvider`] trait and its implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and
//!   `Retry-After` aware backoff.
//!
//! Batching and pacing live in [`crate::batch`]; a provider call embeds
//! exactly the texts it is given.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use knowledge_ingest::config::EmbeddingConfig;
//! # use knowledge_ingest::embedding::create_provider;
//! let mut config = EmbeddingConfig::default();
//! config.provider = "disabled".to_string();
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```

pub mod openai;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

pub use openai::OpenAIProvider;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"`; dry runs still work.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or if the provider
/// cannot be initialized (missing model, dims or API key).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::from_config(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
