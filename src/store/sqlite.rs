//! Local SQLite [`VectorStore`].
//!
//! Vectors are stored as little-endian f32 BLOBs keyed by
//! `(index_name, namespace, id)`; metadata as a JSON object. Queries load
//! the namespace and rank by cosine similarity.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::migrate;
use crate::models::{QueryMatch, RawMetadata, VectorRecord};

use super::{
    blob_to_vec, check_dimensions, cosine_similarity, rank, vec_to_blob, IndexHandle,
    NamespaceParams, VectorStore,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn dimension_of(&self, name: &str) -> Result<Option<usize>> {
        let dim: Option<i64> =
            sqlx::query_scalar("SELECT dimension FROM vector_indexes WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dim.map(|d| d as usize))
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<()> {
        match self.dimension_of(name).await? {
            Some(existing) if existing != dimension => bail!(
                "index '{}' exists with dimension {}, requested {}",
                name,
                existing,
                dimension
            ),
            Some(_) => Ok(()),
            None => {
                sqlx::query(
                    "INSERT OR IGNORE INTO vector_indexes (name, dimension, created_at) VALUES (?, ?, ?)",
                )
                .bind(name)
                .bind(dimension as i64)
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        }
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.dimension_of(name).await?.is_some())
    }

    async fn resolve_namespace(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(IndexHandle, NamespaceParams)> {
        let dimension = self
            .dimension_of(name)
            .await?
            .ok_or_else(|| anyhow!("index '{}' does not exist", name))?;
        Ok((
            IndexHandle {
                name: name.to_string(),
                dimension,
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
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO vectors (index_name, namespace, id, embedding, metadata_json, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(index_name, namespace, id) DO UPDATE SET
                    embedding = excluded.embedding,
                    metadata_json = excluded.metadata_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&handle.name)
            .bind(params.key())
            .bind(&record.id)
            .bind(vec_to_blob(&record.vector))
            .bind(metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        params: &NamespaceParams,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let rows = sqlx::query(
            "SELECT id, embedding, metadata_json FROM vectors WHERE index_name = ? AND namespace = ?",
        )
        .bind(&handle.name)
        .bind(params.key())
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let id: String = row.get("id");
            let metadata: RawMetadata = serde_json::from_str(&metadata_json)
                .with_context(|| format!("invalid metadata for vector '{}'", id))?;
            matches.push(QueryMatch {
                id,
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                metadata,
            });
        }

        Ok(rank(matches, top_k))
    }

    async fn count(&self, handle: &IndexHandle, params: &NamespaceParams) -> Result<usize> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE index_name = ? AND namespace = ?")
                .bind(&handle.name)
                .bind(params.key())
                .fetch_one(&self.pool)
                .await?;
        Ok(n as usize)
    }
}
