//! Embedding providers and the batching client used by ingestion and retrieval.
//!
//! [`EmbeddingClient`] groups texts into fixed-size batches, embeds each batch
//! concurrently and sleeps a fixed pacing delay between batches. It never
//! caches and never retries a failed batch; retries on transient provider
//! errors live inside [`OpenAiEmbedder`].

use crate::config::{EmbeddingConfig, ProviderKind};
use crate::error::{EmbeddingError, IngestError};
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_NGRAM_DIMENSIONS: usize = 128;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
impl EmbeddingProvider for Box<dyn EmbeddingProvider> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }
}

/// Offline embedder hashing character trigrams into a normalized vector.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_NGRAM_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint with retry on transient failures.
pub struct OpenAiEmbedder {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| IngestError::InvalidConfig(error.to_string()))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_retries: config.max_retries,
        })
    }

    async fn request_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::from_status(status, &body));
        }

        let payload: EmbeddingResponse = response.json().await?;
        payload
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or(EmbeddingError::EmptyResponse)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(text).await {
                Ok(vector) => return Ok(vector),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt.min(5));
                    warn!(%error, attempt, delay_ms = delay.as_millis() as u64, "retrying embedding request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Builds the provider named in the config.
pub fn create_provider(
    config: &EmbeddingConfig,
    api_key: Option<String>,
) -> Result<Box<dyn EmbeddingProvider>, IngestError> {
    match config.provider {
        ProviderKind::Ngram => Ok(Box::new(CharacterNgramEmbedder {
            dimensions: config.dimensions,
        })),
        ProviderKind::OpenAi => {
            let api_key = api_key
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| {
                    IngestError::InvalidConfig(
                        "an API key is required for the openai embedding provider".to_string(),
                    )
                })?;
            Ok(Box::new(OpenAiEmbedder::new(config, api_key)?))
        }
    }
}

/// Batches and paces calls to an [`EmbeddingProvider`].
pub struct EmbeddingClient<P> {
    provider: P,
    batch_size: usize,
    batch_delay: Duration,
}

impl<P> EmbeddingClient<P>
where
    P: EmbeddingProvider,
{
    pub fn new(provider: P, config: &EmbeddingConfig) -> Self {
        Self::with_pacing(provider, config.batch_size, config.batch_delay)
    }

    pub fn with_pacing(provider: P, batch_size: usize, batch_delay: Duration) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// One vector per input, in input order. Any failed batch fails the call.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = self.provider.dimensions();
        let batch_count = texts.len().div_ceil(self.batch_size);
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                batch = batch_index + 1,
                batches = batch_count,
                size = batch.len(),
                model = self.provider.model_name(),
                "embedding batch"
            );

            let embedded = try_join_all(batch.iter().map(|text| self.provider.embed(text))).await?;
            if let Some(vector) = embedded.iter().find(|vector| vector.len() != expected) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            vectors.extend(embedded);

            if batch_index + 1 < batch_count && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        Ok(vectors)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::EmptyResponse)
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, mismatched or zero vectors.
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

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator < f32::EPSILON {
        return 0.0;
    }
    dot / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingProvider {
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
        dimensions: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_on_call {
                return Err(EmbeddingError::Fatal("boom".to_string()));
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn texts(count: usize) -> Vec<String> {
        (0..count).map(|index| "x".repeat(index + 1)).collect()
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_text("Khyber Pakhtunkhwa civil servants act");
        let second = embedder.embed_text("Khyber Pakhtunkhwa civil servants act");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed_text("abc").len(), 32);
    }

    #[tokio::test]
    async fn batches_preserve_input_order() {
        let client = EmbeddingClient::with_pacing(
            CountingProvider {
                calls: AtomicUsize::new(0),
                fail_on_call: None,
                dimensions: 2,
            },
            3,
            Duration::ZERO,
        );

        let vectors = client.embed_batch(&texts(7)).await.unwrap();
        assert_eq!(vectors.len(), 7);
        for (index, vector) in vectors.iter().enumerate() {
            assert_eq!(vector[0], (index + 1) as f32);
        }
        assert_eq!(client.provider().calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn failed_batch_stops_remaining_batches() {
        let client = EmbeddingClient::with_pacing(
            CountingProvider {
                calls: AtomicUsize::new(0),
                fail_on_call: Some(4),
                dimensions: 2,
            },
            3,
            Duration::ZERO,
        );

        let result = client.embed_batch(&texts(9)).await;
        assert!(matches!(result, Err(EmbeddingError::Fatal(_))));
        assert!(client.provider().calls.load(Ordering::SeqCst) <= 6);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let client = EmbeddingClient::with_pacing(
            CountingProvider {
                calls: AtomicUsize::new(0),
                fail_on_call: None,
                dimensions: 3,
            },
            3,
            Duration::ZERO,
        );

        let result = client.embed_one("text").await;
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn delay_is_inserted_only_between_batches() {
        let delay = Duration::from_millis(30);
        let client =
            EmbeddingClient::with_pacing(CharacterNgramEmbedder { dimensions: 8 }, 3, delay);

        let started = Instant::now();
        client.embed_batch(&texts(7)).await.unwrap();
        assert!(started.elapsed() >= delay * 2);

        let single_batch = EmbeddingClient::with_pacing(
            CharacterNgramEmbedder { dimensions: 8 },
            3,
            Duration::from_secs(5),
        );
        let finished = tokio::time::timeout(
            Duration::from_secs(1),
            single_batch.embed_batch(&texts(3)),
        )
        .await;
        assert!(finished.is_ok());
    }

    #[test]
    fn status_classification_separates_transient_from_fatal() {
        let limited = EmbeddingError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(limited, EmbeddingError::RateLimited(_)));
        assert!(limited.is_transient());

        let outage = EmbeddingError::from_status(reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(outage.is_transient());

        let rejected = EmbeddingError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(!rejected.is_transient());
    }

    #[test]
    fn openai_provider_requires_api_key() {
        let config = EmbeddingConfig::default();
        assert!(matches!(
            create_provider(&config, None),
            Err(IngestError::InvalidConfig(_))
        ));
        assert!(create_provider(&config, Some("sk-test".to_string())).is_ok());
    }

    #[test]
    fn cosine_similarity_bounds() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
