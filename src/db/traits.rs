//! Database abstraction traits
//!
//! This module provides the store seams the engine is written against and
//! the `DatabaseProvider` that picks a libsql backend (in-memory, local
//! file, remote Turso).
//!
//! # Example
//!
//! ```rust,ignore
//! use ares_rag::db::DatabaseProvider;
//!
//! // Use in-memory database (default for tests)
//! let store = DatabaseProvider::Memory.create_store().await?;
//!
//! // Use file-based SQLite
//! let store = DatabaseProvider::SQLite { path: "data.db".into() }.create_store().await?;
//! ```

#[cfg(not(feature = "turso"))]
use crate::types::AppError;
use crate::types::{
    Chunk, Document, DocumentStatus, DocumentTree, Memory, MemoryType, MemoryTypeStats,
    Paragraph, Result, Sentence,
};
use crate::utils::toml_config::RagConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::turso::TursoStore;

/// Database provider configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DatabaseProvider {
    /// In-memory SQLite database (ephemeral, lost on restart)
    #[default]
    Memory,
    /// File-based SQLite database
    SQLite {
        /// Path to the SQLite database file
        path: String,
    },
    /// Remote Turso database (requires network access)
    #[cfg(feature = "turso")]
    Turso {
        /// The Turso database URL (e.g., `libsql://your-db.turso.io`)
        url: String,
        /// Authentication token for the Turso database
        auth_token: String,
    },
}

impl DatabaseProvider {
    /// Open a store for this provider and create the schema
    pub async fn create_store(&self) -> Result<TursoStore> {
        match self {
            DatabaseProvider::Memory => TursoStore::new_memory().await,
            DatabaseProvider::SQLite { path } => TursoStore::new_local(path).await,
            #[cfg(feature = "turso")]
            DatabaseProvider::Turso { url, auth_token } => {
                TursoStore::new_remote(url.clone(), auth_token.clone()).await
            }
        }
    }

    /// Pick a provider from the `[database]` config section.
    ///
    /// Remote Turso wins when both env references resolve, then a file path,
    /// then in-memory for `:memory:`.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let db = &config.database;

        if let (Some(url_env), Some(token_env)) = (&db.turso_url_env, &db.turso_token_env) {
            #[cfg(feature = "turso")]
            {
                if let (Some(url), Some(token)) =
                    (config.resolve_env(url_env), config.resolve_env(token_env))
                {
                    return Ok(DatabaseProvider::Turso {
                        url,
                        auth_token: token,
                    });
                }
            }
            #[cfg(not(feature = "turso"))]
            {
                let _ = (url_env, token_env);
                return Err(AppError::Configuration(
                    "Turso credentials configured but the `turso` feature is not enabled"
                        .to_string(),
                ));
            }
        }

        if db.url.is_empty() || db.url == ":memory:" {
            return Ok(DatabaseProvider::Memory);
        }

        Ok(DatabaseProvider::SQLite {
            path: db.url.clone(),
        })
    }
}

/// Durable counters behind the segment allocator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Atomically add `step` to the named counter, creating it at `step` if
    /// absent, and return the new stored value
    async fn advance(&self, name: &str, step: u64) -> Result<u64>;

    /// Current stored value, if the counter exists
    async fn current(&self, name: &str) -> Result<Option<u64>>;
}

/// Rows written inside a transaction that is still open.
///
/// Dropping without `commit` or `rollback` leaves the outcome to the driver;
/// callers always finish explicitly.
#[async_trait]
pub trait PendingWrite: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Relational side of the document pipeline.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    // ============== Tree writes (one transaction each) ==============

    /// Insert a document with all its paragraphs, sentences and chunks
    async fn insert_document_tree(&self, tree: &DocumentTree) -> Result<()>;

    /// Replace the children and counters of an existing document.
    ///
    /// Returns the chunk ids that were removed.
    async fn replace_document_tree(&self, tree: &DocumentTree) -> Result<Vec<u64>>;

    /// Delete a document with every child row, returning the removed chunk ids
    async fn delete_document_tree(&self, doc_id: u64) -> Result<Vec<u64>>;

    async fn set_document_status(&self, doc_id: u64, status: DocumentStatus) -> Result<()>;

    // ============== Reads ==============

    async fn get_document(&self, doc_id: u64) -> Result<Option<Document>>;

    async fn documents_by_ids(&self, doc_ids: &[u64]) -> Result<Vec<Document>>;

    async fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>>;

    /// Newest first. Returns the owner's total alongside the page
    async fn list_documents(
        &self,
        user_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<(u64, Vec<Document>)>;

    async fn paragraphs(&self, doc_id: u64) -> Result<Vec<Paragraph>>;

    /// Sentences with ids in `min..=max`, ordered
    async fn sentences_in_range(&self, doc_id: u64, min: u32, max: u32) -> Result<Vec<Sentence>>;

    /// Chunk rows without their embeddings
    async fn chunks_by_ids(&self, chunk_ids: &[u64]) -> Result<Vec<Chunk>>;

    /// Chunk rows of one document including stored embeddings
    async fn chunks_for_document(&self, doc_id: u64) -> Result<Vec<Chunk>>;

    /// `(chunk_id, embedding)` of every chunk whose document is active
    async fn active_chunk_vectors(&self) -> Result<Vec<(u64, Vec<f32>)>>;
}

/// Relational side of the memory store.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn insert_memory(&self, memory: &Memory, embedding: &[f32]) -> Result<()>;

    /// Insert rows in a transaction left open for the caller to finish.
    /// `embeddings` pairs up with `memories` by position.
    async fn begin_memory_batch(
        &self,
        memories: &[Memory],
        embeddings: &[Vec<f32>],
    ) -> Result<Box<dyn PendingWrite>>;

    async fn get_memory(&self, id: u64) -> Result<Option<Memory>>;

    async fn memories_by_ids(&self, ids: &[u64]) -> Result<Vec<Memory>>;

    /// Overwrite content, importance and metadata of an existing row.
    /// The stored embedding is only replaced when one is given.
    async fn update_memory(&self, memory: &Memory, embedding: Option<&[f32]>) -> Result<()>;

    async fn memory_embedding(&self, id: u64) -> Result<Option<Vec<f32>>>;

    /// `(id, embedding)` of every memory not yet expired at `now`
    async fn live_memory_vectors(&self, now: DateTime<Utc>) -> Result<Vec<(u64, Vec<f32>)>>;

    /// Returns false when no row matched
    async fn delete_memory(&self, id: u64) -> Result<bool>;

    /// Delete the listed rows owned by `user_id`, returning the ids removed
    async fn delete_owned_memories(&self, user_id: u64, ids: &[u64]) -> Result<Vec<u64>>;

    /// Delete rows by id regardless of owner
    async fn purge_memories(&self, ids: &[u64]) -> Result<usize>;

    /// Bump `last_accessed_at` and `access_count`
    async fn touch_memories(&self, ids: &[u64], at: DateTime<Utc>) -> Result<()>;

    async fn expired_memory_ids(&self, now: DateTime<Utc>) -> Result<Vec<u64>>;

    /// Per-type aggregates over the owner's unexpired rows
    async fn memory_stats(&self, user_id: u64, now: DateTime<Utc>)
        -> Result<Vec<MemoryTypeStats>>;

    /// Same owner and type, unexpired, excluding `exclude_id`, by importance
    /// descending
    async fn related_memories(
        &self,
        user_id: u64,
        memory_type: MemoryType,
        exclude_id: u64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Memory>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_config() {
        let mut config = RagConfig::default();
        config.database.url = ":memory:".to_string();
        assert_eq!(
            DatabaseProvider::from_config(&config).unwrap(),
            DatabaseProvider::Memory
        );

        config.database.url = "/tmp/rag.db".to_string();
        assert_eq!(
            DatabaseProvider::from_config(&config).unwrap(),
            DatabaseProvider::SQLite {
                path: "/tmp/rag.db".to_string()
            }
        );
    }
}
