//! Batch embedding.
//!
//! Splits texts into consecutive chunks, calls the provider once per chunk
//! in order, and concatenates the vectors so that position `i` of the
//! output belongs to text `i`. The [`Pacer`] is consulted before every
//! chunk.
//!
//! Any provider error fails the whole call; vectors from earlier chunks
//! are discarded.

use anyhow::{ensure, Result};
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::pacing::Pacer;

/// How many texts go into one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPlan {
    /// Everything in a single call.
    Single,
    /// At most `n` texts per call.
    Fixed(usize),
}

impl BatchPlan {
    /// `None` or `0` means a single call.
    pub fn from_size(size: Option<usize>) -> Self {
        match size {
            None | Some(0) => BatchPlan::Single,
            Some(n) => BatchPlan::Fixed(n),
        }
    }

    /// Number of provider calls needed for `len` texts.
    pub fn calls_for(&self, len: usize) -> usize {
        match (self, len) {
            (_, 0) => 0,
            (BatchPlan::Single, _) => 1,
            (BatchPlan::Fixed(n), len) => len.div_ceil(*n),
        }
    }

    fn chunk_len(&self, len: usize) -> usize {
        match self {
            BatchPlan::Single => len.max(1),
            BatchPlan::Fixed(n) => (*n).max(1),
        }
    }
}

/// Embed `texts` according to `plan`, pacing between calls.
///
/// # Errors
///
/// Fails if any provider call fails, returns a different number of
/// vectors than it was given, or returns a vector whose length differs
/// from [`EmbeddingProvider::dims`].
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    plan: BatchPlan,
    pacer: &mut Pacer,
) -> Result<Vec<Vec<f32>>> {
    let mut all = Vec::with_capacity(texts.len());
    if texts.is_empty() {
        return Ok(all);
    }

    let dims = provider.dims();
    let total = plan.calls_for(texts.len());

    for (i, batch) in texts.chunks(plan.chunk_len(texts.len())).enumerate() {
        pacer.pace(i).await;
        debug!(batch = i + 1, total, size = batch.len(), "embedding batch");

        let vectors = provider.embed(batch).await?;
        ensure!(
            vectors.len() == batch.len(),
            "embedding provider returned {} vectors for {} texts",
            vectors.len(),
            batch.len()
        );
        if dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                anyhow::bail!(
                    "embedding provider returned a {}-dimensional vector, expected {}",
                    bad.len(),
                    dims
                );
            }
        }
        all.extend(vectors);
    }

    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Encodes each text's numeric suffix into a 2-d vector and records calls.
    struct Recording {
        calls: Mutex<Vec<usize>>,
        dims: usize,
    }

    impl Recording {
        fn new(dims: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                dims,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Recording {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    let n: f32 = t.trim_start_matches("t").parse().unwrap();
                    vec![n, 0.0]
                })
                .collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("t{}", i)).collect()
    }

    #[tokio::test]
    async fn test_twenty_five_in_batches_of_twenty() {
        let provider = Recording::new(2);
        let out = embed_in_batches(&provider, &texts(25), BatchPlan::Fixed(20), &mut Pacer::None)
            .await
            .unwrap();
        assert_eq!(*provider.calls.lock().unwrap(), vec![20, 5]);
        assert_eq!(out.len(), 25);
        for (i, v) in out.iter().enumerate() {
            assert_eq!(v[0], i as f32);
        }
    }

    #[tokio::test]
    async fn test_empty_makes_no_calls() {
        let provider = Recording::new(2);
        let out = embed_in_batches(&provider, &[], BatchPlan::Single, &mut Pacer::None)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_call_count_is_ceil() {
        for (n, b) in [(1, 1), (7, 3), (9, 3), (10, 20), (41, 20)] {
            let provider = Recording::new(2);
            embed_in_batches(&provider, &texts(n), BatchPlan::Fixed(b), &mut Pacer::None)
                .await
                .unwrap();
            let calls = provider.calls.lock().unwrap().len();
            assert_eq!(calls, n.div_ceil(b), "n={} b={}", n, b);
            assert_eq!(calls, BatchPlan::Fixed(b).calls_for(n));
        }
    }

    #[tokio::test]
    async fn test_single_plan_one_call() {
        let provider = Recording::new(2);
        embed_in_batches(&provider, &texts(57), BatchPlan::Single, &mut Pacer::None)
            .await
            .unwrap();
        assert_eq!(*provider.calls.lock().unwrap(), vec![57]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails() {
        let provider = Recording::new(3);
        let err = embed_in_batches(&provider, &texts(2), BatchPlan::Single, &mut Pacer::None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_pacing_between_batches() {
        let provider = Recording::new(2);
        let mut pacer = Pacer::Fixed(std::time::Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        embed_in_batches(&provider, &texts(45), BatchPlan::Fixed(20), &mut pacer)
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= std::time::Duration::from_secs(2));
        assert!(elapsed < std::time::Duration::from_secs(3));
    }

    #[test]
    fn test_plan_from_size() {
        assert_eq!(BatchPlan::from_size(None), BatchPlan::Single);
        assert_eq!(BatchPlan::from_size(Some(0)), BatchPlan::Single);
        assert_eq!(BatchPlan::from_size(Some(20)), BatchPlan::Fixed(20));
    }
}
