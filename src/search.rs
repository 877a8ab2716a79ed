//! Semantic search over the ingested knowledge base.
//!
//! Embeds the query once and queries every target `(index, namespace)`,
//! merging matches by score. Targets whose index does not exist yet are
//! skipped; any other store error fails the search.

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::embedding::{create_provider, embed_query, EmbeddingProvider};
use crate::models::RawMetadata;
use crate::pipeline::configured_targets;
use crate::store::{create_store, VectorStore};

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub index: String,
    pub namespace: String,
    pub id: String,
    pub score: f32,
    pub metadata: RawMetadata,
}

/// Query `targets` for the `limit` records closest to `query`.
pub async fn semantic_search(
    provider: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    targets: &[(String, Option<String>)],
    query: &str,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let vector = embed_query(provider, query).await?;
    let mut hits = Vec::new();

    for (index, namespace) in targets {
        if !store.index_exists(index).await? {
            debug!(%index, "index not created yet, skipping search target");
            continue;
        }
        let (handle, params) = store.resolve_namespace(index, namespace.as_deref()).await?;
        for m in store.query(&handle, &params, &vector, limit).await? {
            hits.push(SearchHit {
                index: index.clone(),
                namespace: params.key().to_string(),
                id: m.id,
                score: m.score,
                metadata: m.metadata,
            });
        }
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    Ok(hits)
}

/// Run the `search` command and print the results.
pub async fn run_search(
    config: &Config,
    query: &str,
    namespace: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let targets = match namespace {
        Some(ns) => {
            let index = configured_targets(config)
                .into_iter()
                .find(|(_, n)| n.as_deref() == Some(ns.as_str()))
                .map(|(index, _)| index)
                .unwrap_or_else(|| crate::pipeline::DEFAULT_INDEX.to_string());
            vec![(index, Some(ns))]
        }
        None => configured_targets(config),
    };

    let provider = create_provider(&config.embedding)?;
    let store = create_store(&config.store).await?;
    let hits = semantic_search(provider.as_ref(), store.as_ref(), &targets, query, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let title = hit
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("(untitled)");
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score, hit.namespace, title);
        if let Some(source) = hit.metadata.get("source").and_then(|v| v.as_str()) {
            println!("    source: {}", source);
        }
        println!("    id: {}", hit.id);
        println!();
    }

    Ok(())
}
