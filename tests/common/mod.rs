//! Fakes and builders shared by the integration tests.
//!
//! `HashEmbedder` stands in for the remote embedding backend and
//! `FlakyVectorIndex` wraps the in-memory index with switchable failures,
//! so dual-write compensation can be exercised without external services.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ares_rag::db::{InMemoryVectorIndex, TursoStore, VectorIndex};
use ares_rag::rag::cache::InMemoryCacheStore;
use ares_rag::rag::embeddings::Embedder;
use ares_rag::types::{AppError, Result};
use ares_rag::{RagConfig, RagService};
use async_trait::async_trait;

/// Vector length used by every test service
pub const DIMS: usize = 256;

// ============================================================================
// Embedder
// ============================================================================

/// Deterministic bag-of-words embedder.
///
/// Each lower-cased word adds 1.0 to a hashed bucket and the result is L2
/// normalized, so texts sharing words have a positive cosine similarity.
pub struct HashEmbedder {
    dims: usize,
    should_fail: AtomicBool,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            should_fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase());

        let mut any = false;
        for word in words {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() % self.dims as u64) as usize] += 1.0;
            any = true;
        }
        if !any {
            v[0] = 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(AppError::Embedding("Mock embedding failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.check()?;
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.check()?;
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dims)
    }
}

// ============================================================================
// Vector index
// ============================================================================

/// In-memory index whose writes can be made to fail on demand.
#[derive(Default)]
pub struct FlakyVectorIndex {
    pub inner: InMemoryVectorIndex,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn ids(&self, collection: &str) -> Vec<u64> {
        self.inner.ids(collection)
    }
}

#[async_trait]
impl VectorIndex for FlakyVectorIndex {
    fn provider_name(&self) -> &'static str {
        "flaky"
    }

    fn is_durable(&self) -> bool {
        self.inner.is_durable()
    }

    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()> {
        self.inner.ensure_collection(collection, dimensions).await
    }

    async fn insert_batch(&self, collection: &str, points: &[(u64, Vec<f32>)]) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::VectorIndex("Mock insert failure".to_string()));
        }
        self.inner.insert_batch(collection, points).await
    }

    async fn delete_batch(&self, collection: &str, ids: &[u64]) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::VectorIndex("Mock delete failure".to_string()));
        }
        self.inner.delete_batch(collection, ids).await
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(u64, f32)>> {
        self.inner.search(collection, query, top_k).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection).await
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Defaults with a small id step so tests cross segment boundaries.
pub fn test_config() -> RagConfig {
    let mut config = RagConfig::default();
    config.database.url = ":memory:".to_string();
    config.vector.dimensions = DIMS;
    config.allocator.step = 10;
    config.document.vector_retries = 2;
    config
}

/// A service over an in-memory database plus handles to its fakes.
pub struct Harness {
    pub service: RagService,
    pub store: Arc<TursoStore>,
    pub index: Arc<FlakyVectorIndex>,
    pub embedder: Arc<HashEmbedder>,
    pub cache: Arc<InMemoryCacheStore>,
}

pub async fn harness() -> Harness {
    let store = Arc::new(
        TursoStore::new_memory()
            .await
            .expect("Failed to create in-memory database"),
    );
    harness_with_store(store, &test_config()).await
}

pub async fn harness_with_store(store: Arc<TursoStore>, config: &RagConfig) -> Harness {
    let index = Arc::new(FlakyVectorIndex::new());
    let embedder = Arc::new(HashEmbedder::new(config.vector.dimensions));
    let cache = Arc::new(InMemoryCacheStore::with_defaults());

    let service = RagService::with_components(
        store.clone(),
        index.clone(),
        embedder.clone(),
        cache.clone(),
        config,
    )
    .await
    .expect("Failed to build service");

    Harness {
        service,
        store,
        index,
        embedder,
        cache,
    }
}
