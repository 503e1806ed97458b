//! Relational store and vector indexes.
//!
//! This module provides the two storage halves every dual write touches:
//! - **Turso/SQLite**: source of truth for documents, chunks, memories and
//!   ID sequences
//! - **Vector Index**: nearest-neighbour mirror keyed by relational ids
//!
//! # Vector Index Providers
//!
//! - `memory` (default) - in-process brute-force cosine index
//! - `qdrant` - High-performance vector search engine
//!
//! Enable providers via Cargo features:
//! ```toml
//! ares-rag = { version = "*", features = ["qdrant"] }
//! ```

#![allow(missing_docs)]

// Vector index abstraction layer
pub mod vectorstore;

#[cfg(feature = "qdrant")]
pub mod qdrant;

// Relational database
pub mod traits;
pub mod turso;

// Re-exports
pub use traits::{
    DatabaseProvider, DocumentRepository, MemoryRepository, PendingWrite, SequenceStore,
};
pub use turso::TursoStore;
pub use vectorstore::{
    InMemoryVectorIndex, MeteredVectorIndex, VectorIndex, VectorIndexProvider, VectorIndexStats,
    CHUNK_COLLECTION, MEMORY_COLLECTION,
};

#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorIndex;
