//! Remote embedding client
//!
//! Talks to any OpenAI-compatible `/embeddings` endpoint. Every call goes
//! through three layers:
//!
//! 1. the shared [`CacheStore`] (`embedding:` keys, 24h TTL by default)
//! 2. a semaphore gate limiting concurrent upstream requests
//! 3. a fixed-delay retry loop, each attempt under its own HTTP timeout
//!
//! # Example
//!
//! ```ignore
//! use ares_rag::rag::embeddings::{Embedder, EmbeddingClient};
//!
//! let client = EmbeddingClient::new(config.embedding.clone(), api_key, cache)?;
//! let vector = client.embed("hello world").await?;
//! let vectors = client.embed_batch(&["a".into(), "b".into()]).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::cache::{embedding_key, CacheStore, CacheStoreExt};
use crate::types::{AppError, Result};
use crate::utils::toml_config::EmbeddingConfig;

/// Text to vector conversion used by the document pipeline and memory store.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, returning vectors in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector length this embedder produces, when known up front
    fn dimensions(&self) -> Option<usize> {
        None
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Snapshot of client counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingClientStats {
    /// Upstream HTTP attempts
    pub requests: u64,
    /// Attempts that were followed by another attempt
    pub retries: u64,
    /// Calls that exhausted every attempt
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// HTTP embedding client with caching, bounded concurrency and retries.
pub struct EmbeddingClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    config: EmbeddingConfig,
    dimensions: Option<usize>,
    cache: Arc<dyn CacheStore>,
    gate: Arc<Semaphore>,
    counters: Counters,
}

impl EmbeddingClient {
    pub fn new(
        config: EmbeddingConfig,
        api_key: Option<String>,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
        let gate = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

        Ok(Self {
            http,
            endpoint,
            api_key,
            config,
            dimensions: None,
            cache,
            gate,
            counters: Counters::default(),
        })
    }

    /// Reject vectors whose length differs from `dimensions`
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn stats(&self) -> EmbeddingClientStats {
        EmbeddingClientStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
        }
    }

    fn cached(&self, text: &str) -> Option<Vec<f32>> {
        let hit = self
            .cache
            .get_json::<Vec<f32>>(&embedding_key(text, &self.config.model));
        match hit {
            Some(vector) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(vector)
            }
            None => {
                self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn store(&self, text: &str, vector: &[f32]) {
        let key = embedding_key(text, &self.config.model);
        if let Err(e) = self
            .cache
            .set_json(&key, vector, Some(self.config.cache_ttl()))
        {
            warn!(error = %e, "Failed to cache embedding");
        }
    }

    /// Send `inputs` upstream, retrying with a fixed delay.
    async fn request_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| AppError::Internal(format!("Embedding gate closed: {}", e)))?;
                self.request_once(inputs).await
            };

            match outcome {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        inputs = inputs.len(),
                        error = %e,
                        "Embedding request failed"
                    );
                    last_error = e;
                    if attempt < attempts {
                        self.counters.retries.fetch_add(1, Ordering::Relaxed);
                        tokio::time::sleep(self.config.retry_delay()).await;
                    }
                }
            }
        }

        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        Err(AppError::Embedding(format!(
            "Embedding failed after {} attempts: {}",
            attempts, last_error
        )))
    }

    /// One HTTP attempt. Errors are plain strings; the caller wraps the last one.
    async fn request_once(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, String> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let body = EmbeddingRequest {
            model: &self.config.model,
            input: inputs,
            encoding_format: "float",
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(format!("status {}: {}", status, snippet));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid response body: {}", e))?;

        let mut data = parsed.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }

        if data.len() != inputs.len() {
            return Err(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                data.len()
            ));
        }

        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        for vector in &vectors {
            if vector.is_empty() {
                return Err("empty embedding in response".to_string());
            }
            if let Some(dims) = self.dimensions {
                if vector.len() != dims {
                    return Err(format!(
                        "expected {} dimensions, got {}",
                        dims,
                        vector.len()
                    ));
                }
            }
        }

        Ok(vectors)
    }
}

fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "Cannot embed empty text".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        validate_text(text)?;

        if let Some(vector) = self.cached(text) {
            return Ok(vector);
        }

        let inputs = [text.to_string()];
        let vector = self
            .request_with_retry(&inputs)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Embedding("Upstream returned no embedding".to_string()))?;

        self.store(text, &vector);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            validate_text(text)?;
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        // Distinct cache misses in first-seen order, with every position they fill
        let mut pending: Vec<&str> = Vec::new();
        let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();

        for (i, text) in texts.iter().enumerate() {
            if let Some(slots) = positions.get_mut(text.as_str()) {
                slots.push(i);
                continue;
            }
            match self.cached(text) {
                Some(vector) => results[i] = Some(vector),
                None => {
                    pending.push(text.as_str());
                    positions.insert(text.as_str(), vec![i]);
                }
            }
        }

        debug!(
            total = texts.len(),
            misses = pending.len(),
            "Resolved batch embeddings from cache"
        );

        for batch in pending.chunks(self.config.batch_size.max(1)) {
            let inputs: Vec<String> = batch.iter().map(|s| s.to_string()).collect();
            let vectors = self.request_with_retry(&inputs).await?;

            for (text, vector) in batch.iter().zip(vectors) {
                self.store(text, &vector);
                if let Some(slots) = positions.get(text) {
                    for &slot in slots {
                        results[slot] = Some(vector.clone());
                    }
                }
            }
        }

        results
            .into_iter()
            .map(|v| {
                v.ok_or_else(|| AppError::Internal("Batch embedding left a gap".to_string()))
            })
            .collect()
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::cache::InMemoryCacheStore;

    fn client() -> EmbeddingClient {
        let config = EmbeddingConfig {
            base_url: "http://127.0.0.1:9/v1/".to_string(),
            ..Default::default()
        };
        EmbeddingClient::new(config, None, Arc::new(InMemoryCacheStore::with_defaults())).unwrap()
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(client().endpoint, "http://127.0.0.1:9/v1/embeddings");
    }

    #[tokio::test]
    async fn test_empty_text_rejected_before_any_request() {
        let client = client();
        let result = client.embed("   ").await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));

        let result = client
            .embed_batch(&["ok".to_string(), "".to_string()])
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(client.stats().requests, 0);
    }

    #[tokio::test]
    async fn test_cached_vector_served_without_request() {
        let client = client();
        client.store("cached text", &[0.5, 0.5]);

        let vector = client.embed("cached text").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.5]);
        assert_eq!(client.stats().cache_hits, 1);
        assert_eq!(client.stats().requests, 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let client = client();
        assert!(client.embed_batch(&[]).await.unwrap().is_empty());
    }
}
