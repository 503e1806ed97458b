//! Engine façade.
//!
//! [`RagService`] wires the relational store, vector index, cache, embedding
//! client and id allocator together and exposes every document and memory
//! operation as a [`ServiceResponse`]. Nothing here is global: two services
//! built from two configs share no state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::db::{
    DatabaseProvider, MeteredVectorIndex, TursoStore, VectorIndex, VectorIndexProvider,
    VectorIndexStats, CHUNK_COLLECTION, MEMORY_COLLECTION,
};
use crate::idgen::{SegmentAllocator, Sequence};
use crate::memory::sweeper::SweeperHandle;
use crate::memory::MemoryStore;
use crate::rag::analyzer::SimpleAnalyzer;
use crate::rag::cache::{CacheConfig, CacheStats, CacheStore, InMemoryCacheStore, NoOpCache};
use crate::rag::document::DocumentService;
use crate::rag::embeddings::{Embedder, EmbeddingClient};
use crate::types::{
    AppError, DocumentDetail, DocumentHit, DocumentMetadata, DocumentPage, Memory, MemoryHit,
    MemoryTypeStats, MemoryUpdate, NewMemory, Result,
};
use crate::utils::toml_config::RagConfig;

// ============================================================================
// Responses
// ============================================================================

/// Operation succeeded
pub const CODE_OK: i32 = 0;
/// Missing or malformed input
pub const CODE_INVALID_INPUT: i32 = 1;
/// Document or memory does not exist
pub const CODE_NOT_FOUND: i32 = 2;
/// Caller does not own the record
pub const CODE_PERMISSION: i32 = 3;
/// Relational store, vector index or embedding backend failed
pub const CODE_UNAVAILABLE: i32 = 4;
/// Anything else
pub const CODE_INTERNAL: i32 = 5;

const MSG_STORAGE: &str = "Storage is temporarily unavailable, please retry";
const MSG_EMBEDDING: &str = "Embedding service is temporarily unavailable, please retry";
const MSG_INTERNAL: &str = "Internal error";

/// Status plus message plus optional payload, returned by every façade call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ServiceResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_OK,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Map an error to its code. Dependency and internal messages are
    /// replaced by fixed text; the detail only goes to the log.
    pub fn from_error(err: &AppError) -> Self {
        let (code, message) = match err {
            AppError::InvalidInput(msg) => (CODE_INVALID_INPUT, msg.clone()),
            AppError::NotFound(msg) => (CODE_NOT_FOUND, msg.clone()),
            AppError::Permission(msg) => (CODE_PERMISSION, msg.clone()),
            AppError::Database(_) | AppError::VectorIndex(_) => {
                (CODE_UNAVAILABLE, MSG_STORAGE.to_string())
            }
            AppError::Embedding(_) => (CODE_UNAVAILABLE, MSG_EMBEDDING.to_string()),
            AppError::ConsistencyGap(_) | AppError::Configuration(_) | AppError::Internal(_) => {
                (CODE_INTERNAL, MSG_INTERNAL.to_string())
            }
        };
        Self {
            code,
            message,
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    fn respond(operation: &'static str, result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                let severe = e.is_dependency()
                    || matches!(e, AppError::Internal(_) | AppError::ConsistencyGap(_));
                if severe {
                    error!(operation, error = %e, "Operation failed");
                } else {
                    debug!(operation, error = %e, "Operation rejected");
                }
                Self::from_error(&e)
            }
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// The assembled engine.
pub struct RagService {
    documents: DocumentService,
    memories: Arc<MemoryStore>,
    index: Arc<MeteredVectorIndex>,
    cache: Arc<dyn CacheStore>,
    allocator: Arc<SegmentAllocator>,
    config: RagConfig,
}

impl RagService {
    /// Build every component from configuration.
    ///
    /// Opens the database and applies the schema, connects the vector index
    /// and creates both collections, then reserves a first id segment for
    /// every sequence.
    ///
    /// # Errors
    ///
    /// `Configuration` for unresolvable settings, otherwise the error of the
    /// component that failed to start.
    pub async fn from_config(config: &RagConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(DatabaseProvider::from_config(config)?.create_store().await?);
        let index = VectorIndexProvider::from_config(config)?.create_index().await?;

        let cache: Arc<dyn CacheStore> = if config.cache.enabled {
            Arc::new(InMemoryCacheStore::new(CacheConfig {
                max_size_bytes: config.cache.max_size_bytes,
                ..Default::default()
            }))
        } else {
            Arc::new(NoOpCache::new())
        };

        let embedder = EmbeddingClient::new(
            config.embedding.clone(),
            config.embedding_api_key()?,
            Arc::clone(&cache),
        )?
        .with_dimensions(config.vector.dimensions);

        let service =
            Self::with_components(store, index, Arc::new(embedder), cache, config).await?;
        service.allocator.preload(&Sequence::ALL).await?;

        info!(
            vector_provider = service.index.provider_name(),
            dimensions = config.vector.dimensions,
            "RAG service ready"
        );
        Ok(service)
    }

    /// Build from already constructed parts.
    ///
    /// Both collections are created on `index` with the configured
    /// dimensions. An index that does not outlive the process is refilled
    /// from the stored embeddings of active chunks and unexpired memories.
    /// No id segments are reserved up front.
    pub async fn with_components(
        store: Arc<TursoStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<dyn CacheStore>,
        config: &RagConfig,
    ) -> Result<Self> {
        let index = Arc::new(MeteredVectorIndex::new(index));
        for collection in [CHUNK_COLLECTION, MEMORY_COLLECTION] {
            index
                .ensure_collection(collection, config.vector.dimensions)
                .await?;
        }

        let allocator = Arc::new(SegmentAllocator::new(
            store.clone(),
            config.allocator.step,
        ));

        let documents = DocumentService::new(
            store.clone(),
            index.clone(),
            Arc::clone(&embedder),
            Arc::clone(&cache),
            Arc::clone(&allocator),
            Arc::new(SimpleAnalyzer::new()),
            config.document.clone(),
        );

        let memories = Arc::new(MemoryStore::new(
            store,
            index.clone(),
            embedder,
            Arc::clone(&allocator),
            config.memory.clone(),
        ));

        if !index.is_durable() {
            let chunks = documents.rebuild_index().await?;
            let restored = memories.rebuild_index().await?;
            info!(
                chunks,
                memories = restored,
                "Restored vectors from the relational store"
            );
        }

        Ok(Self {
            documents,
            memories,
            index,
            cache,
            allocator,
            config: config.clone(),
        })
    }

    pub fn documents(&self) -> &DocumentService {
        &self.documents
    }

    pub fn memories(&self) -> &Arc<MemoryStore> {
        &self.memories
    }

    pub fn allocator(&self) -> &Arc<SegmentAllocator> {
        &self.allocator
    }

    pub fn index_stats(&self) -> VectorIndexStats {
        self.index.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start the expired-memory sweeper on the configured interval
    pub fn spawn_memory_sweeper(&self) -> SweeperHandle {
        self.memories
            .spawn_sweeper(self.config.memory.sweep_interval())
    }

    // ========================================================================
    // Documents
    // ========================================================================

    pub async fn add_document(
        &self,
        user_id: u64,
        title: &str,
        content: &str,
        metadata: Option<DocumentMetadata>,
    ) -> ServiceResponse<u64> {
        ServiceResponse::respond(
            "add_document",
            self.documents.ingest(user_id, title, content, metadata).await,
        )
    }

    pub async fn search_documents(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> ServiceResponse<Vec<DocumentHit>> {
        ServiceResponse::respond(
            "search_documents",
            self.documents.search(query, top_k, min_score).await,
        )
    }

    pub async fn get_document(
        &self,
        user_id: u64,
        doc_id: u64,
    ) -> ServiceResponse<DocumentDetail> {
        ServiceResponse::respond("get_document", self.documents.get(user_id, doc_id).await)
    }

    pub async fn list_documents(
        &self,
        user_id: u64,
        page: u32,
        page_size: u32,
    ) -> ServiceResponse<DocumentPage> {
        ServiceResponse::respond(
            "list_documents",
            self.documents.list(user_id, page, page_size).await,
        )
    }

    pub async fn update_document(
        &self,
        user_id: u64,
        doc_id: u64,
        title: Option<&str>,
        content: &str,
    ) -> ServiceResponse<()> {
        ServiceResponse::respond(
            "update_document",
            self.documents.update(user_id, doc_id, title, content).await,
        )
    }

    pub async fn delete_document(&self, user_id: u64, doc_id: u64) -> ServiceResponse<()> {
        ServiceResponse::respond(
            "delete_document",
            self.documents.delete(user_id, doc_id).await,
        )
    }

    /// Re-index documents stuck in `indexing`, returning how many recovered
    pub async fn reconcile_documents(&self) -> ServiceResponse<usize> {
        ServiceResponse::respond(
            "reconcile_documents",
            self.documents.reconcile().await,
        )
    }

    // ========================================================================
    // Memories
    // ========================================================================

    pub async fn add_memory(&self, new: NewMemory) -> ServiceResponse<Memory> {
        ServiceResponse::respond("add_memory", self.memories.add(new).await)
    }

    pub async fn batch_add_memories(&self, batch: Vec<NewMemory>) -> ServiceResponse<Vec<Memory>> {
        ServiceResponse::respond(
            "batch_add_memories",
            self.memories.batch_add(batch).await,
        )
    }

    pub async fn search_memories(
        &self,
        user_id: u64,
        query: &str,
        limit: usize,
    ) -> ServiceResponse<Vec<MemoryHit>> {
        ServiceResponse::respond(
            "search_memories",
            self.memories.search(user_id, query, limit).await,
        )
    }

    pub async fn get_memory(&self, user_id: u64, id: u64) -> ServiceResponse<Memory> {
        ServiceResponse::respond("get_memory", self.memories.get(user_id, id).await)
    }

    pub async fn update_memory(
        &self,
        user_id: u64,
        id: u64,
        update: MemoryUpdate,
    ) -> ServiceResponse<Memory> {
        ServiceResponse::respond(
            "update_memory",
            self.memories.update(user_id, id, update).await,
        )
    }

    pub async fn delete_memory(&self, user_id: u64, id: u64) -> ServiceResponse<()> {
        ServiceResponse::respond("delete_memory", self.memories.delete(user_id, id).await)
    }

    pub async fn batch_delete_memories(
        &self,
        user_id: u64,
        ids: &[u64],
    ) -> ServiceResponse<usize> {
        ServiceResponse::respond(
            "batch_delete_memories",
            self.memories.batch_delete(user_id, ids).await,
        )
    }

    pub async fn memory_stats(&self, user_id: u64) -> ServiceResponse<Vec<MemoryTypeStats>> {
        ServiceResponse::respond("memory_stats", self.memories.stats(user_id).await)
    }

    pub async fn related_memories(
        &self,
        user_id: u64,
        id: u64,
        limit: usize,
    ) -> ServiceResponse<Vec<Memory>> {
        ServiceResponse::respond(
            "related_memories",
            self.memories.related(user_id, id, limit).await,
        )
    }

    pub async fn clean_expired_memories(&self) -> ServiceResponse<usize> {
        ServiceResponse::respond(
            "clean_expired_memories",
            self.memories.clean_expired().await,
        )
    }
}
