//! Batched embedding with exponential backoff

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::instrument;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;

/// Batching and retry policy for one embedding phase
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    pub dimension: usize,
    pub batch_size: usize,
    /// Retries after the first attempt of each batch
    pub max_retries: u32,
    /// Wait before the first retry; doubles on each following one
    pub base_delay: Duration,
    /// Batches in flight at once
    pub concurrency: usize,
}

impl EmbedOptions {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            dimension: config.dimension,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(factor)
    }
}

/// Embeds a corpus in provider-sized batches, index-aligned with the input
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    options: EmbedOptions,
}

impl Embedder {
    /// Fails with `Configuration` when the batch size is zero or above the
    /// provider's hard limit.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: EmbedOptions) -> Result<Self> {
        if options.batch_size == 0 || options.batch_size > provider.max_batch_size() {
            return Err(AppError::configuration(format!(
                "embedding batch size {} must be between 1 and the provider limit of {}",
                options.batch_size,
                provider.max_batch_size()
            )));
        }
        if options.dimension == 0 {
            return Err(AppError::configuration("embedding dimension must be positive"));
        }
        Ok(Self { provider, options })
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Result<Self> {
        Self::new(provider, EmbedOptions::from_config(config))
    }

    /// Same provider and policy with a different batch size
    pub fn with_batch_size(&self, batch_size: usize) -> Result<Self> {
        let options = EmbedOptions {
            batch_size,
            ..self.options.clone()
        };
        Self::new(self.provider.clone(), options)
    }

    pub fn options(&self) -> &EmbedOptions {
        &self.options
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed every text. `result[i]` belongs to `texts[i]` however the work
    /// was partitioned, retried or interleaved.
    ///
    /// Any batch that exhausts its retries fails the whole call; vectors from
    /// batches that did succeed are dropped.
    #[instrument(skip(self, texts), fields(texts = texts.len(), batch_size = self.options.batch_size))]
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(self.options.batch_size).enumerate())
            .map(|(index, batch)| self.embed_with_retry(index, batch))
            .buffered(self.options.concurrency.max(1))
            .try_collect()
            .await?;

        let embeddings: Vec<Vec<f32>> = batches.into_iter().flatten().collect();

        tracing::debug!(embeddings = embeddings.len(), "Embedding phase complete");

        Ok(embeddings)
    }

    /// Single query embedding. No retry; interactive callers own their retry policy.
    #[instrument(skip(self, text))]
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let start = Instant::now();
        let result = self.provider.embed(&texts, self.options.dimension).await;
        metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            self.provider.model_name(),
            1,
            result.is_ok(),
        );

        let mut vectors = result?;
        self.check_batch(0, 1, &vectors)?;
        vectors.pop().ok_or_else(|| AppError::Internal {
            message: "embedding capability returned no vector for the query".to_string(),
        })
    }

    async fn embed_with_retry(&self, batch_index: usize, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;

        loop {
            let start = Instant::now();
            match self.provider.embed(batch, self.options.dimension).await {
                Ok(vectors) => {
                    self.check_batch(batch_index, batch.len(), &vectors)?;
                    metrics::record_embedding(
                        start.elapsed().as_secs_f64(),
                        self.provider.model_name(),
                        batch.len(),
                        true,
                    );
                    return Ok(vectors);
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt > self.options.max_retries {
                        metrics::record_embedding(0.0, self.provider.model_name(), batch.len(), false);
                        tracing::error!(
                            batch_index,
                            attempts = attempt,
                            error = %e,
                            "Embedding batch failed, retry budget exhausted"
                        );
                        return Err(AppError::EmbeddingFailed {
                            collection: None,
                            batch_index,
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }

                    let delay = self.options.backoff(attempt);
                    tracing::warn!(
                        batch_index,
                        attempt,
                        max_retries = self.options.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    metrics::record_embedding_retry(self.provider.model_name());
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    metrics::record_embedding(0.0, self.provider.model_name(), batch.len(), false);
                    return Err(e);
                }
            }
        }
    }

    fn check_batch(&self, batch_index: usize, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected {
            return Err(AppError::MalformedBatch {
                collection: format!("embedding batch {}", batch_index),
                message: format!("{} texts produced {} vectors", expected, vectors.len()),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.options.dimension) {
            return Err(AppError::MalformedBatch {
                collection: format!("embedding batch {}", batch_index),
                message: format!(
                    "vector of length {} where dimension {} was requested",
                    bad.len(),
                    self.options.dimension
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` calls with `error`, then encodes each text's
    /// number as a one-element vector.
    struct ScriptedProvider {
        failures: u32,
        retryable: bool,
        calls: AtomicU32,
        batch_sizes: Mutex<Vec<usize>>,
        max_batch_size: usize,
    }

    impl ScriptedProvider {
        fn new(failures: u32, retryable: bool) -> Self {
            Self {
                failures,
                retryable,
                calls: AtomicU32::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                max_batch_size: 100,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        async fn embed(&self, texts: &[String], _dimension: usize) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.retryable {
                    AppError::TransientService {
                        service: "embedding".into(),
                        message: "429".into(),
                    }
                } else {
                    AppError::MalformedInput {
                        service: "embedding".into(),
                        message: "bad input".into(),
                    }
                });
            }
            self.batch_sizes.lock().unwrap().push(texts.len());

            // Later batches finish first when run concurrently
            let first: f32 = texts[0].parse().unwrap();
            tokio::time::sleep(Duration::from_millis(1000 - first as u64)).await;

            Ok(texts.iter().map(|t| vec![t.parse::<f32>().unwrap()]).collect())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn max_batch_size(&self) -> usize {
            self.max_batch_size
        }
    }

    /// Drops the last vector of every response
    #[derive(Default)]
    struct ShortProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for ShortProvider {
        async fn embed(&self, texts: &[String], _dimension: usize) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().skip(1).map(|_| vec![0.5]).collect())
        }

        fn model_name(&self) -> &str {
            "short"
        }

        fn max_batch_size(&self) -> usize {
            100
        }
    }

    fn options(batch_size: usize, max_retries: u32, concurrency: usize) -> EmbedOptions {
        EmbedOptions {
            dimension: 1,
            batch_size,
            max_retries,
            base_delay: Duration::from_secs(5),
            concurrency,
        }
    }

    fn numbers(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_retry_budget() {
        let provider = Arc::new(ScriptedProvider::new(3, true));
        let embedder = Embedder::new(provider.clone(), options(10, 3, 1)).unwrap();

        let vectors = tokio_test::assert_ok!(embedder.embed_batch(&numbers(3)).await);
        assert_eq!(vectors, vec![vec![0.0], vec![1.0], vec![2.0]]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_waits_exact_schedule() {
        let provider = Arc::new(ScriptedProvider::new(4, true));
        let embedder = Embedder::new(provider.clone(), options(10, 3, 1)).unwrap();

        let start = tokio::time::Instant::now();
        let err = embedder.embed_batch(&numbers(3)).await.unwrap_err();

        // 5s + 10s + 20s
        assert_eq!(start.elapsed(), Duration::from_secs(35));
        match err {
            AppError::EmbeddingFailed {
                batch_index,
                attempts,
                ..
            } => {
                assert_eq!(batch_index, 0);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected EmbeddingFailed, got {other:?}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let provider = Arc::new(ScriptedProvider::new(1, false));
        let embedder = Embedder::new(provider.clone(), options(10, 3, 1)).unwrap();

        let start = tokio::time::Instant::now();
        let err = embedder.embed_batch(&numbers(2)).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedInput { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_preserved_across_batches() {
        let provider = Arc::new(ScriptedProvider::new(0, true));
        let embedder = Embedder::new(provider.clone(), options(7, 3, 4)).unwrap();

        let texts = numbers(30);
        let vectors = embedder.embed_batch(&texts).await.unwrap();

        let expected: Vec<Vec<f32>> = (0..30).map(|i| vec![i as f32]).collect();
        assert_eq!(vectors, expected);

        let mut sizes = provider.batch_sizes.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 7, 7, 7, 7]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let embedder = Embedder::new(Arc::new(MockEmbedder::default()), options(10, 3, 1)).unwrap();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_oversized_batch_is_configuration_error() {
        let provider = Arc::new(MockEmbedder::new(50));
        let err = Embedder::new(provider, options(51, 3, 1)).err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_backoff_doubles() {
        let opts = options(10, 5, 1);
        assert_eq!(opts.backoff(1), Duration::from_secs(5));
        assert_eq!(opts.backoff(2), Duration::from_secs(10));
        assert_eq!(opts.backoff(3), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_embed_query() {
        let embedder = Embedder::new(
            Arc::new(MockEmbedder::default()),
            EmbedOptions {
                dimension: 32,
                ..options(10, 3, 1)
            },
        )
        .unwrap();
        let vector = embedder.embed_query("what changed this quarter").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_response_is_malformed_batch_without_retry() {
        let provider = Arc::new(ShortProvider::default());
        let embedder = Embedder::new(provider.clone(), options(10, 3, 1)).unwrap();

        let start = tokio::time::Instant::now();
        let err = embedder.embed_batch(&numbers(4)).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedBatch { .. }), "got {err:?}");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embed_query_does_not_retry() {
        let provider = Arc::new(ScriptedProvider::new(1, true));
        let embedder = Embedder::new(provider.clone(), options(10, 3, 1)).unwrap();

        let start = tokio::time::Instant::now();
        let err = embedder.embed_query("5").await.unwrap_err();
        assert!(matches!(err, AppError::TransientService { .. }), "got {err:?}");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
