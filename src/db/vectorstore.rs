//! Vector Index Abstraction Layer
//!
//! Chunk and memory vectors are mirrored into a vector index keyed by the
//! numeric id of their relational row. The relational row is the source of
//! truth; the index only answers nearest-neighbour queries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   VectorIndex Trait                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  insert(_batch)  │  delete(_batch)  │  search  │  count  │
//! └──────────────────────────────────────────────────────────┘
//!          ▲                    ▲                 ▲
//!    ┌─────┴──────┐      ┌──────┴─────┐    ┌──────┴──────┐
//!    │  InMemory  │      │   Qdrant   │    │   Metered   │
//!    │ (default)  │      │ (feature)  │    │ (decorator) │
//!    └────────────┘      └────────────┘    └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ares_rag::db::vectorstore::{VectorIndex, VectorIndexProvider, CHUNK_COLLECTION};
//!
//! let index = VectorIndexProvider::InMemory.create_index().await?;
//! index.ensure_collection(CHUNK_COLLECTION, 1024).await?;
//! index.insert(CHUNK_COLLECTION, 7, &embedding).await?;
//! let hits = index.search(CHUNK_COLLECTION, &query, 10).await?;
//! ```

use crate::types::{AppError, Result};
use crate::utils::toml_config::RagConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collection holding document chunk vectors
pub const CHUNK_COLLECTION: &str = "document_chunk";
/// Collection holding memory vectors
pub const MEMORY_COLLECTION: &str = "chat_memory";

// ============================================================================
// Vector Index Provider Configuration
// ============================================================================

/// Configuration for vector index backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum VectorIndexProvider {
    /// Qdrant - High-performance vector search engine.
    ///
    /// Requires a running Qdrant server.
    #[cfg(feature = "qdrant")]
    Qdrant {
        /// Qdrant server URL (e.g., "http://localhost:6334").
        url: String,
        /// Optional API key for authentication.
        api_key: Option<String>,
    },

    /// In-process index. Data is lost when the process exits.
    InMemory,
}

impl VectorIndexProvider {
    /// Create an index from this provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn create_index(&self) -> Result<Arc<dyn VectorIndex>> {
        match self {
            #[cfg(feature = "qdrant")]
            VectorIndexProvider::Qdrant { url, api_key } => {
                let index = super::qdrant::QdrantVectorIndex::new(url, api_key.clone())?;
                Ok(Arc::new(index))
            }
            VectorIndexProvider::InMemory => Ok(Arc::new(InMemoryVectorIndex::new())),
        }
    }

    /// Select a provider from the `[vector]` config section.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when the named provider is not compiled in.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        match config.vector.provider.as_str() {
            "memory" => Ok(VectorIndexProvider::InMemory),
            #[cfg(feature = "qdrant")]
            "qdrant" => Ok(VectorIndexProvider::Qdrant {
                url: config.vector.qdrant_url.clone(),
                api_key: config
                    .vector
                    .qdrant_api_key_env
                    .as_deref()
                    .and_then(|env| config.resolve_env(env)),
            }),
            other => Err(AppError::Configuration(format!(
                "Vector provider '{}' not enabled. Check feature flags.",
                other
            ))),
        }
    }
}

// ============================================================================
// Vector Index Trait
// ============================================================================

/// Nearest-neighbour index over numeric ids.
///
/// Inserts have upsert semantics, so retrying a partially applied batch is
/// safe. Scores are cosine similarities, higher is closer.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Get the name of this backend.
    fn provider_name(&self) -> &'static str;

    /// Whether vectors outlive the process. Non-durable indexes are
    /// repopulated from the relational store at start-up.
    fn is_durable(&self) -> bool {
        true
    }

    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()>;

    /// Insert or replace one vector.
    async fn insert(&self, collection: &str, id: u64, vector: &[f32]) -> Result<()> {
        self.insert_batch(collection, &[(id, vector.to_vec())]).await
    }

    /// Insert or replace many vectors in one call.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the batch. The batch may have
    /// been partially applied.
    async fn insert_batch(&self, collection: &str, points: &[(u64, Vec<f32>)]) -> Result<()>;

    /// Delete one vector. Deleting a missing id is not an error.
    async fn delete(&self, collection: &str, id: u64) -> Result<()> {
        self.delete_batch(collection, &[id]).await
    }

    /// Delete many vectors in one call.
    async fn delete_batch(&self, collection: &str, ids: &[u64]) -> Result<()>;

    /// Search for the `top_k` closest vectors.
    ///
    /// # Returns
    ///
    /// `(id, score)` pairs sorted by score, descending.
    async fn search(&self, collection: &str, query: &[f32], top_k: usize)
        -> Result<Vec<(u64, f32)>>;

    /// Count vectors in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;
}

// ============================================================================
// In-Memory Vector Index
// ============================================================================

#[derive(Default)]
struct InMemoryCollection {
    dimensions: Option<usize>,
    vectors: HashMap<u64, Vec<f32>>,
}

/// In-memory vector index using brute-force cosine similarity.
///
/// Collections are created on first insert if `ensure_collection` was not
/// called. Searching a missing collection returns no hits.
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Ids currently stored in a collection, ascending
    pub fn ids(&self, collection: &str) -> Vec<u64> {
        let collections = self.collections.read();
        let mut ids: Vec<u64> = collections
            .get(collection)
            .map(|c| c.vectors.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot_product / (norm_a * norm_b)
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn provider_name(&self) -> &'static str {
        "in-memory"
    }

    fn is_durable(&self) -> bool {
        false
    }

    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()> {
        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();
        match entry.dimensions {
            Some(existing) if existing != dimensions => Err(AppError::VectorIndex(format!(
                "Collection '{}' has {} dimensions, requested {}",
                collection, existing, dimensions
            ))),
            _ => {
                entry.dimensions = Some(dimensions);
                Ok(())
            }
        }
    }

    async fn insert_batch(&self, collection: &str, points: &[(u64, Vec<f32>)]) -> Result<()> {
        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();

        let dims = entry
            .dimensions
            .or_else(|| points.first().map(|(_, v)| v.len()));
        if let Some(dims) = dims {
            if let Some((id, v)) = points.iter().find(|(_, v)| v.len() != dims) {
                return Err(AppError::VectorIndex(format!(
                    "Vector {} has {} dimensions, collection '{}' expects {}",
                    id,
                    v.len(),
                    collection,
                    dims
                )));
            }
            entry.dimensions = Some(dims);
        }

        for (id, vector) in points {
            entry.vectors.insert(*id, vector.clone());
        }
        Ok(())
    }

    async fn delete_batch(&self, collection: &str, ids: &[u64]) -> Result<()> {
        let mut collections = self.collections.write();
        if let Some(entry) = collections.get_mut(collection) {
            for id in ids {
                entry.vectors.remove(id);
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(u64, f32)>> {
        let collections = self.collections.read();
        let Some(entry) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<(u64, f32)> = entry
            .vectors
            .iter()
            .map(|(id, v)| (*id, Self::cosine_similarity(query, v)))
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.vectors.len())
            .unwrap_or(0))
    }
}

// ============================================================================
// Metered Decorator
// ============================================================================

/// Snapshot of index operation counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndexStats {
    /// Vectors written
    pub inserted: u64,
    /// Vectors deleted
    pub deleted: u64,
    pub searches: u64,
    /// Calls that returned an error
    pub failures: u64,
}

/// Wraps any index and counts operations with atomics.
pub struct MeteredVectorIndex {
    inner: Arc<dyn VectorIndex>,
    inserted: AtomicU64,
    deleted: AtomicU64,
    searches: AtomicU64,
    failures: AtomicU64,
}

impl MeteredVectorIndex {
    pub fn new(inner: Arc<dyn VectorIndex>) -> Self {
        Self {
            inner,
            inserted: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            searches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            inserted: self.inserted.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn record<T>(&self, counter: &AtomicU64, amount: u64, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                counter.fetch_add(amount, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl VectorIndex for MeteredVectorIndex {
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn is_durable(&self) -> bool {
        self.inner.is_durable()
    }

    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()> {
        self.inner.ensure_collection(collection, dimensions).await
    }

    async fn insert_batch(&self, collection: &str, points: &[(u64, Vec<f32>)]) -> Result<()> {
        let result = self.inner.insert_batch(collection, points).await;
        self.record(&self.inserted, points.len() as u64, result)
    }

    async fn delete_batch(&self, collection: &str, ids: &[u64]) -> Result<()> {
        let result = self.inner.delete_batch(collection, ids).await;
        self.record(&self.deleted, ids.len() as u64, result)
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(u64, f32)>> {
        let result = self.inner.search(collection, query, top_k).await;
        self.record(&self.searches, 1, result)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection).await
    }
}
