//! In-memory [`VectorStore`] for tests and dry runs.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Queries are brute-force
//! cosine similarity over the namespace.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{QueryMatch, RawMetadata, VectorRecord};

use super::{
    check_dimensions, cosine_similarity, rank, IndexHandle, NamespaceParams, VectorStore,
};

/// A record as held by [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub vector: Vec<f32>,
    pub metadata: RawMetadata,
}

struct MemIndex {
    dimension: usize,
    namespaces: HashMap<String, HashMap<String, StoredVector>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    indexes: RwLock<HashMap<String, MemIndex>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemIndex>>> {
        self.indexes
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemIndex>>> {
        self.indexes
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Fetch one record, for inspection.
    pub fn get(&self, index: &str, namespace: Option<&str>, id: &str) -> Option<StoredVector> {
        let params = NamespaceParams::new(namespace);
        let guard = self.read().ok()?;
        let ns = guard.get(index)?.namespaces.get(params.key())?;
        ns.get(id).cloned()
    }

    /// Ids in a namespace, sorted.
    pub fn ids(&self, index: &str, namespace: Option<&str>) -> Vec<String> {
        let params = NamespaceParams::new(namespace);
        let mut ids: Vec<String> = self
            .read()
            .ok()
            .and_then(|guard| {
                guard
                    .get(index)
                    .and_then(|idx| idx.namespaces.get(params.key()))
                    .map(|ns| ns.keys().cloned().collect())
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<()> {
        let mut indexes = self.write()?;
        match indexes.get(name) {
            Some(existing) if existing.dimension != dimension => bail!(
                "index '{}' exists with dimension {}, requested {}",
                name,
                existing.dimension,
                dimension
            ),
            Some(_) => Ok(()),
            None => {
                indexes.insert(
                    name.to_string(),
                    MemIndex {
                        dimension,
                        namespaces: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(name))
    }

    async fn resolve_namespace(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(IndexHandle, NamespaceParams)> {
        let indexes = self.read()?;
        let index = indexes
            .get(name)
            .ok_or_else(|| anyhow!("index '{}' does not exist", name))?;
        Ok((
            IndexHandle {
                name: name.to_string(),
                dimension: index.dimension,
                host: None,
            },
            NamespaceParams::new(namespace),
        ))
    }

    async fn upsert(
        &self,
        handle: &IndexHandle,
        records: &[VectorRecord],
        params: &NamespaceParams,
    ) -> Result<usize> {
        check_dimensions(handle, records)?;
        let mut indexes = self.write()?;
        let index = indexes
            .get_mut(&handle.name)
            .ok_or_else(|| anyhow!("index '{}' does not exist", handle.name))?;
        let ns = index
            .namespaces
            .entry(params.key().to_string())
            .or_default();
        for record in records {
            ns.insert(
                record.id.clone(),
                StoredVector {
                    vector: record.vector.clone(),
                    metadata: record.metadata.to_json(),
                },
            );
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        params: &NamespaceParams,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let indexes = self.read()?;
        let matches = indexes
            .get(&handle.name)
            .and_then(|idx| idx.namespaces.get(params.key()))
            .map(|ns| {
                ns.iter()
                    .map(|(id, stored)| QueryMatch {
                        id: id.clone(),
                        score: cosine_similarity(vector, &stored.vector),
                        metadata: stored.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rank(matches, top_k))
    }

    async fn count(&self, handle: &IndexHandle, params: &NamespaceParams) -> Result<usize> {
        let indexes = self.read()?;
        Ok(indexes
            .get(&handle.name)
            .and_then(|idx| idx.namespaces.get(params.key()))
            .map(|ns| ns.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, MetadataValue};

    fn record(id: &str, vector: Vec<f32>, title: &str) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("title", MetadataValue::String(title.to_string()));
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let store = InMemoryStore::new();
        store.ensure_index("kb", 2).await.unwrap();
        let (handle, params) = store.resolve_namespace("kb", Some("docs")).await.unwrap();

        store
            .upsert(&handle, &[record("a", vec![1.0, 0.0], "first")], &params)
            .await
            .unwrap();
        store
            .upsert(&handle, &[record("a", vec![0.0, 1.0], "second")], &params)
            .await
            .unwrap();

        assert_eq!(store.count(&handle, &params).await.unwrap(), 1);
        let stored = store.get("kb", Some("docs"), "a").unwrap();
        assert_eq!(stored.vector, vec![0.0, 1.0]);
        assert_eq!(stored.metadata["title"], "second");
    }

    #[tokio::test]
    async fn test_namespaces_isolated() {
        let store = InMemoryStore::new();
        store.ensure_index("kb", 2).await.unwrap();
        let (handle, gh) = store.resolve_namespace("kb", Some("github")).await.unwrap();
        let (_, docs) = store.resolve_namespace("kb", Some("docs")).await.unwrap();

        store
            .upsert(&handle, &[record("0", vec![1.0, 0.0], "issue")], &gh)
            .await
            .unwrap();
        assert_eq!(store.count(&handle, &gh).await.unwrap(), 1);
        assert_eq!(store.count(&handle, &docs).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ensure_index_idempotent_and_dimension_checked() {
        let store = InMemoryStore::new();
        store.ensure_index("kb", 3).await.unwrap();
        store.ensure_index("kb", 3).await.unwrap();
        assert!(store.ensure_index("kb", 4).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_missing_index() {
        let store = InMemoryStore::new();
        assert!(store.resolve_namespace("nope", None).await.is_err());
        assert!(!store.index_exists("nope").await.unwrap());
        store.ensure_index("kb", 2).await.unwrap();
        assert!(store.index_exists("kb").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let store = InMemoryStore::new();
        store.ensure_index("kb", 2).await.unwrap();
        let (handle, params) = store.resolve_namespace("kb", None).await.unwrap();
        let err = store
            .upsert(&handle, &[record("x", vec![1.0], "t")], &params)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expects 2"));
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let store = InMemoryStore::new();
        store.ensure_index("kb", 2).await.unwrap();
        let (handle, params) = store.resolve_namespace("kb", None).await.unwrap();
        store
            .upsert(
                &handle,
                &[
                    record("near", vec![1.0, 0.1], "near"),
                    record("far", vec![-1.0, 0.0], "far"),
                    record("mid", vec![0.5, 0.5], "mid"),
                ],
                &params,
            )
            .await
            .unwrap();
        let matches = store
            .query(&handle, &params, &[1.0, 0.0], 2)
            .await
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
    }
}
