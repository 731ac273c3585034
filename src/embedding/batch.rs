/// Batched embedding with retry and cancellation
use super::{EmbeddingError, EmbeddingProvider};
use crate::cancellation::CancellationToken;
use crate::config::EmbeddingConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Exponential backoff schedule for transient provider failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): initial * 2^(retry-1), capped
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&EmbeddingConfig> for RetryPolicy {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Embeds chunk texts in fixed-size batches
///
/// Provider calls run on the blocking pool. Transient failures are retried
/// per batch; output order always matches input order.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    policy: RetryPolicy,
}

impl BatchEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, policy: RetryPolicy) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::new(provider, config.batch_size, RetryPolicy::from(config))
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed every text, checking `cancel` before each batch
    pub async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let start = Instant::now();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(EmbeddingError::Cancelled);
            }

            let embedded = self.embed_with_retry(batch.to_vec()).await?;
            debug!("Embedded batch of {} texts", embedded.len());
            vectors.extend(embedded);
        }

        info!(
            "Embedded {} texts with {} in {}ms",
            vectors.len(),
            self.provider.model_name(),
            start.elapsed().as_millis()
        );

        Ok(vectors)
    }

    /// Embed a single query text with the same retry policy
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_with_retry(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }

    async fn embed_with_retry(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 1;
        loop {
            let error = match self.call_provider(batch.clone()).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(error);
            }
            if attempt >= self.policy.max_attempts {
                return Err(EmbeddingError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                "Embedding attempt {}/{} failed: {} (retrying in {}ms)",
                attempt,
                self.policy.max_attempts,
                error,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn call_provider(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let provider = Arc::clone(&self.provider);
        let expected = batch.len();

        let vectors = tokio::task::spawn_blocking(move || provider.embed_batch(&batch))
            .await
            .map_err(|e| EmbeddingError::GenerationError(format!("Embedding task failed: {}", e)))??;

        if vectors.len() != expected {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                expected,
                vectors.len()
            )));
        }

        let dimension = self.provider.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        Ok(vectors)
    }
}
