//! Pinecone [`VectorStore`] over the REST API.
//!
//! Control plane (`{control_url}/indexes`) describes and creates
//! serverless indexes; the data plane (`https://{host}`) takes upserts,
//! queries and stats. Requests carry `Api-Key` from `PINECONE_API_KEY` and
//! a pinned `X-Pinecone-API-Version`.
//!
//! Upserts are sent in chunks of [`UPSERT_CHUNK`] vectors. Chunks are not
//! transactional: a failure leaves earlier chunks written.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::models::{Metadata, QueryMatch, RawMetadata, VectorRecord};

use super::{check_dimensions, IndexHandle, NamespaceParams, VectorStore};

const API_VERSION: &str = "2024-07";
pub const UPSERT_CHUNK: usize = 100;
const READY_POLL_ATTEMPTS: u32 = 60;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct PineconeStore {
    client: reqwest::Client,
    control_url: String,
    cloud: String,
    region: String,
}

impl PineconeStore {
    /// Build a client from `[store]` config and `PINECONE_API_KEY`.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let api_key = std::env::var("PINECONE_API_KEY")
            .map_err(|_| anyhow!("PINECONE_API_KEY environment variable not set"))?;
        anyhow::ensure!(!api_key.trim().is_empty(), "PINECONE_API_KEY is empty");

        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
        );
        headers.insert(
            "X-Pinecone-API-Version",
            HeaderValue::from_static(API_VERSION),
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build Pinecone HTTP client")?;

        Ok(Self {
            client,
            control_url: config.control_url.trim_end_matches('/').to_string(),
            cloud: config.cloud.clone(),
            region: config.region.clone(),
        })
    }

    async fn describe(&self, name: &str) -> Result<Option<IndexDescription>> {
        let resp = self
            .client
            .get(format!("{}/indexes/{}", self.control_url, name))
            .send()
            .await
            .context("Pinecone describe_index request failed")?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Pinecone describe_index error {}: {}", status, body);
        }
        Ok(Some(resp.json().await.context("invalid describe_index response")?))
    }

    async fn create(&self, name: &str, dimension: usize) -> Result<()> {
        let body = CreateIndexRequest {
            name,
            dimension,
            metric: "cosine",
            spec: IndexSpec {
                serverless: ServerlessSpec {
                    cloud: &self.cloud,
                    region: &self.region,
                },
            },
        };
        let resp = self
            .client
            .post(format!("{}/indexes", self.control_url))
            .json(&body)
            .send()
            .await
            .context("Pinecone create_index request failed")?;
        let status = resp.status();
        // Another writer created it first.
        if status == StatusCode::CONFLICT {
            return Ok(());
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Pinecone create_index error {}: {}", status, body);
        }
        Ok(())
    }

    async fn wait_until_ready(&self, name: &str) -> Result<IndexDescription> {
        for attempt in 0..READY_POLL_ATTEMPTS {
            if let Some(desc) = self.describe(name).await? {
                if desc.is_ready() {
                    return Ok(desc);
                }
            }
            debug!(index = name, attempt, "waiting for Pinecone index to become ready");
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        bail!("Pinecone index '{}' did not become ready", name)
    }

    async fn post_data<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        handle: &IndexHandle,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let host = handle
            .host
            .as_deref()
            .ok_or_else(|| anyhow!("index handle '{}' has no data-plane host", handle.name))?;
        let resp = self
            .client
            .post(format!("{}{}", host, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Pinecone {} request failed", path))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Pinecone {} error {}: {}", path, status, body);
        }
        resp.json()
            .await
            .with_context(|| format!("invalid Pinecone {} response", path))
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn backend(&self) -> &str {
        "pinecone"
    }

    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<()> {
        if let Some(desc) = self.describe(name).await? {
            if desc.dimension != dimension {
                bail!(
                    "index '{}' exists with dimension {}, requested {}",
                    name,
                    desc.dimension,
                    dimension
                );
            }
            return Ok(());
        }
        info!(index = name, dimension, "creating Pinecone index");
        self.create(name, dimension).await?;
        self.wait_until_ready(name).await?;
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.describe(name).await?.is_some())
    }

    async fn resolve_namespace(
        &self,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<(IndexHandle, NamespaceParams)> {
        let desc = self
            .describe(name)
            .await?
            .ok_or_else(|| anyhow!("index '{}' does not exist", name))?;
        Ok((
            IndexHandle {
                name: name.to_string(),
                dimension: desc.dimension,
                host: Some(data_plane_url(&desc.host)),
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
        let mut written = 0usize;
        for chunk in records.chunks(UPSERT_CHUNK) {
            let body = UpsertRequest::new(chunk, params);
            let resp: UpsertResponse = self.post_data(handle, "/vectors/upsert", &body).await?;
            written += resp.upserted_count;
        }
        Ok(written)
    }

    async fn query(
        &self,
        handle: &IndexHandle,
        params: &NamespaceParams,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace: params.namespace.as_deref(),
        };
        let resp: QueryResponse = self.post_data(handle, "/query", &body).await?;
        Ok(resp
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn count(&self, handle: &IndexHandle, params: &NamespaceParams) -> Result<usize> {
        let resp: StatsResponse = self
            .post_data(handle, "/describe_index_stats", &serde_json::json!({}))
            .await?;
        Ok(resp
            .namespaces
            .get(params.key())
            .map(|ns| ns.vector_count)
            .unwrap_or(0))
    }
}

fn data_plane_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: IndexSpec<'a>,
}

#[derive(Serialize)]
struct IndexSpec<'a> {
    serverless: ServerlessSpec<'a>,
}

#[derive(Serialize)]
struct ServerlessSpec<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    dimension: usize,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: Option<IndexStatus>,
}

impl IndexDescription {
    fn is_ready(&self) -> bool {
        !self.host.is_empty() && self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<PineconeVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

impl<'a> UpsertRequest<'a> {
    fn new(records: &'a [VectorRecord], params: &'a NamespaceParams) -> Self {
        Self {
            vectors: records
                .iter()
                .map(|r| PineconeVector {
                    id: &r.id,
                    values: &r.vector,
                    metadata: if r.metadata.is_empty() {
                        None
                    } else {
                        Some(&r.metadata)
                    },
                })
                .collect(),
            namespace: params.namespace.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<RawMetadata>,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: usize,
}
