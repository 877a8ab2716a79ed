//! Vector counts per configured namespace.
//!
//! Used by `kbi stats` to confirm that embed steps are landing where the
//! config says they should.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::pipeline::configured_targets;
use crate::store::{create_store, VectorStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub index: String,
    pub namespace: String,
    /// `false` when the index has not been created yet.
    pub exists: bool,
    pub vectors: usize,
}

/// Count the vectors in each target namespace.
pub async fn collect_stats(
    store: &dyn VectorStore,
    targets: &[(String, Option<String>)],
) -> Result<Vec<NamespaceStats>> {
    let mut stats = Vec::with_capacity(targets.len());
    for (index, namespace) in targets {
        let entry = if store.index_exists(index).await? {
            let (handle, params) = store.resolve_namespace(index, namespace.as_deref()).await?;
            NamespaceStats {
                index: index.clone(),
                namespace: params.key().to_string(),
                exists: true,
                vectors: store.count(&handle, &params).await?,
            }
        } else {
            NamespaceStats {
                index: index.clone(),
                namespace: namespace.clone().unwrap_or_default(),
                exists: false,
                vectors: 0,
            }
        };
        stats.push(entry);
    }
    Ok(stats)
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let store = create_store(&config.store).await?;
    let stats = collect_stats(store.as_ref(), &configured_targets(config)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Knowledge Ingest — Vector Store Stats");
    println!("=====================================");
    println!();
    println!("  Backend:     {}", store.backend());
    if config.store.provider == "sqlite" {
        println!("  Database:    {}", config.store.path.display());
    }
    println!();
    println!("  {:<24} {:<24} {:>10}", "INDEX", "NAMESPACE", "VECTORS");
    println!("  {}", "-".repeat(60));
    for s in &stats {
        let count = if s.exists {
            s.vectors.to_string()
        } else {
            "missing".to_string()
        };
        let ns = if s.namespace.is_empty() {
            "(default)"
        } else {
            s.namespace.as_str()
        };
        println!("  {:<24} {:<24} {:>10}", s.index, ns, count);
    }
    println!();

    Ok(())
}
