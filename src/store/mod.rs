//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers everything the embed steps and the
//! `search` command need from a vector database. Backends:
//!
//! | Provider | Type | Persistence |
//! |----------|------|-------------|
//! | `sqlite` | [`sqlite::SqliteStore`] | local file |
//! | `memory` | [`memory::InMemoryStore`] | process lifetime |
//! | `pinecone` | [`pinecone::PineconeStore`] | Pinecone serverless index |
//!
//! Upserts overwrite by id within a namespace. A batch is not atomic
//! across backends; a failed upsert may leave earlier records written.

pub mod memory;
pub mod pinecone;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::models::{QueryMatch, VectorRecord};

/// A resolved index, returned by [`VectorStore::resolve_namespace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    pub name: String,
    pub dimension: usize,
    /// Data-plane base URL for remote backends.
    pub host: Option<String>,
}

/// Namespace parameters passed along with every data-plane call.
///
/// `namespace: None` addresses the index's default namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceParams {
    pub namespace: Option<String>,
}

impl NamespaceParams {
    pub fn new(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string),
        }
    }

    /// Storage key of the namespace; the default namespace is `""`.
    pub fn key(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}

/// Abstract vector database.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_index`](VectorStore::ensure_index) | Create the index if absent |
/// | [`index_exists`](VectorStore::index_exists) | Whether the index has been created |
/// | [`resolve_namespace`](VectorStore::resolve_namespace) | Handle + namespace params |
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite records by id |
/// | [`query`](VectorStore::query) | Cosine-similarity top-k |
/// | [`count`](VectorStore::count) | Number of vectors in a namespace |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name, for logs.
    fn backend(&self) -> &str;

    /// Create index `name` with `dimension` if it does not exist.
    ///
    /// Fails if the index exists with a different dimension.
    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<()>;

    /// `Ok(false)` only when the index is absent; lookup failures are errors.
    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// Look up index `name` and build the parameters that address
    /// `namespace` inside it.
    async fn resolve_namespace(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(IndexHandle, NamespaceParams)>;

    /// Write records, overwriting existing ids in the namespace.
    ///
    /// Returns the number of records written.
    async fn upsert(
        &self,
        handle: &IndexHandle,
        records: &[VectorRecord],
        params: &NamespaceParams,
    ) -> Result<usize>;

    /// Return the `top_k` records most similar to `vector`.
    async fn query(
        &self,
        handle: &IndexHandle,
        params: &NamespaceParams,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>>;

    /// Number of vectors stored in the namespace.
    async fn count(&self, handle: &IndexHandle, params: &NamespaceParams) -> Result<usize>;
}

/// Create the [`VectorStore`] named by `config.provider`.
pub async fn create_store(config: &StoreConfig) -> Result<Box<dyn VectorStore>> {
    match config.provider.as_str() {
        "sqlite" => Ok(Box::new(sqlite::SqliteStore::open(&config.path).await?)),
        "memory" => Ok(Box::new(memory::InMemoryStore::new())),
        "pinecone" => Ok(Box::new(pinecone::PineconeStore::from_config(config)?)),
        other => bail!("Unknown store provider: {}", other),
    }
}

/// Reject records whose vector length differs from the index dimension.
pub(crate) fn check_dimensions(handle: &IndexHandle, records: &[VectorRecord]) -> Result<()> {
    if let Some(bad) = records.iter().find(|r| r.vector.len() != handle.dimension) {
        bail!(
            "vector '{}' has dimension {}, index '{}' expects {}",
            bad.id,
            bad.vector.len(),
            handle.name,
            handle.dimension
        );
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Sort matches by descending score, ties by id, and keep `top_k`.
pub(crate) fn rank(mut matches: Vec<QueryMatch>, top_k: usize) -> Vec<QueryMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(top_k);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_namespace_params() {
        assert_eq!(NamespaceParams::new(None).key(), "");
        assert_eq!(NamespaceParams::new(Some("  ")).namespace, None);
        assert_eq!(
            NamespaceParams::new(Some("dagster-docs")).key(),
            "dagster-docs"
        );
    }
}
