//! # ares-rag - Document indexing and semantic memory for A.R.E.S
//!
//! The retrieval core behind A.R.E.S chat: documents are decomposed into
//! paragraphs, sentences and overlapping sentence-window chunks, embedded
//! through an OpenAI-compatible endpoint and written to both a relational
//! store (libsql / Turso) and a vector index. Per-user memories get the same
//! dual-write treatment plus expiry and a combined relevance score.
//!
//! ## Overview
//!
//! ares-rag can be used in two ways:
//!
//! 1. **As a CLI** - Run the `ares-rag` binary to ingest, search and maintain
//! 2. **As a library** - Build a [`RagService`] and call it from your own server
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use ares_rag::{RagConfig, RagService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RagConfig::load_or_default("ares-rag.toml")?;
//!     let service = RagService::from_config(&config).await?;
//!
//!     let added = service
//!         .add_document(7, "Caching notes", "Entries expire after one hour.", None)
//!         .await;
//!     println!("document id: {:?}", added.data);
//!
//!     let hits = service.search_documents("when do entries expire", 3, 0.2).await;
//!     for hit in hits.data.unwrap_or_default() {
//!         println!("{:.3} {} - {}", hit.score, hit.title, hit.highlight);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Memories
//!
//! ```rust,ignore
//! use ares_rag::types::{MemoryType, NewMemory};
//!
//! let stored = service
//!     .add_memory(NewMemory::new(7, "Prefers answers in German", MemoryType::Preference))
//!     .await;
//! let hits = service.search_memories(7, "language preference", 5).await;
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `local-db` | Local SQLite database via libsql (default) |
//! | `turso` | Remote Turso database |
//! | `qdrant` | Qdrant vector index |
//! | `full` | All of the above |
//!
//! ## Modules
//!
//! - [`idgen`] - Segment ID allocator
//! - [`db`] - Relational store and vector index abstractions
//! - [`rag`] - Chunking, embeddings, cache and document indexing
//! - [`memory`] - Semantic memory store and expiry sweeper
//! - [`service`] - Assembled engine returning structured responses
//! - [`types`] - Common types and error handling
//!
//! ## Consistency
//!
//! The relational store and the vector index are written one after the
//! other, never atomically. Every multi-store operation either compensates
//! its own partial writes or logs a consistency gap with the affected ids.
//! Searches skip vector hits whose rows are gone or not yet active.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Command-line interface definitions and output helpers.
pub mod cli;
/// Relational store (libsql/Turso) and vector index clients.
pub mod db;
/// Segment-based ID allocation.
pub mod idgen;
/// Semantic memory store and expiry sweeper.
pub mod memory;
/// Retrieval Augmented Generation (RAG) components.
pub mod rag;
/// Engine façade returning structured responses.
pub mod service;
/// Core types (documents, memories, errors).
pub mod types;
/// Configuration utilities (TOML).
pub mod utils;

// Re-export commonly used types
pub use db::{DatabaseProvider, TursoStore, VectorIndex, VectorIndexProvider};
pub use idgen::{SegmentAllocator, Sequence};
pub use memory::MemoryStore;
pub use rag::document::DocumentService;
pub use rag::embeddings::{Embedder, EmbeddingClient};
pub use service::{RagService, ServiceResponse};
pub use types::{AppError, Result};
pub use utils::toml_config::{ConfigError, RagConfig};
