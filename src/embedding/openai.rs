//! OpenAI embeddings client.
//!
//! Calls `POST {url}/v1/embeddings` (default `https://api.openai.com`) and
//! returns vectors ordered by the response's `index` field.
//!
//! Retry strategy:
//! - HTTP 429 → wait for `retry-after-ms` / `retry-after` when the response
//!   carries one, otherwise exponential backoff
//! - HTTP 5xx and network errors → exponential backoff
//! - other HTTP 4xx → fail immediately
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Provider-reported waits longer than this are clamped.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    /// Create a provider from configuration and `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build OpenAI HTTP client")?;

        Ok(Self {
            client,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let url = format!("{}/v1/embeddings", self.base_url);

        let mut last_err = None;
        let mut wait = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = wait.take().unwrap_or_else(|| backoff(attempt));
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying embeddings request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let payload: EmbeddingResponse = response
                            .json()
                            .await
                            .context("failed to parse OpenAI embeddings response")?;
                        return payload.into_embeddings(texts.len());
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        if status == StatusCode::TOO_MANY_REQUESTS {
                            wait = retry_after(response.headers());
                        }
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(%status, attempt, "OpenAI embeddings request throttled or failed");
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "OpenAI embeddings request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Parse the wait the provider asked for, preferring millisecond precision.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let wait = if let Some(ms) = header_f64(headers, "retry-after-ms") {
        Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    } else {
        Duration::from_secs_f64(header_f64(headers, "retry-after")?.max(0.0))
    };
    Some(wait.min(MAX_RETRY_AFTER))
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingResponse {
    fn into_embeddings(self, expected_len: usize) -> Result<Vec<Vec<f32>>> {
        anyhow::ensure!(
            self.data.len() == expected_len,
            "OpenAI returned {} embeddings for {} inputs",
            self.data.len(),
            expected_len
        );
        let mut data = self.data;
        data.sort_by_key(|d| d.index.unwrap_or(0));
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_response_sorted_by_index() {
        let json = r#"{"data":[
            {"index":1,"embedding":[0.0,1.0]},
            {"index":0,"embedding":[1.0,0.0]}
        ]}"#;
        let resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let vecs = resp.into_embeddings(2).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_response_count_mismatch() {
        let json = r#"{"data":[{"index":0,"embedding":[1.0]}]}"#;
        let resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert!(resp.into_embeddings(2).is_err());
    }

    #[test]
    fn test_retry_after_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(retry_after(&headers), Some(Duration::from_millis(250)));

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3600"));
        assert_eq!(retry_after(&headers), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_backoff_capped() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(10), Duration::from_secs(32));
    }
}
