//! Retrieval Augmented Generation (RAG) Pipeline
//!
//! Document indexing and retrieval for grounding chat answers in a user's
//! own documents.
//!
//! # Module Structure
//!
//! - [`rag::analyzer`](crate::rag::analyzer) - Sentence splitting and keyword extraction
//! - [`rag::chunker`](crate::rag::chunker) - Paragraph split and sentence-window chunk planning
//! - [`rag::embeddings`](crate::rag::embeddings) - Remote embedding client with cache and retries
//! - [`rag::cache`](crate::rag::cache) - LRU + TTL cache for embeddings, searches and documents
//! - [`rag::document`](crate::rag::document) - Ingest, search, update and delete of documents
//!
//! # RAG Pipeline
//!
//! 1. **Decomposition** - Documents are split into paragraphs, sentences and
//!    overlapping three-sentence chunks
//! 2. **Embedding** - Chunk texts are embedded in one batch
//! 3. **Storage** - Rows go to the relational store, vectors to the vector index
//! 4. **Retrieval** - The query is embedded, similar chunks are hydrated and
//!    collapsed to one hit per document
//!
//! # Example
//!
//! ```ignore
//! use ares_rag::rag::document::DocumentService;
//!
//! let doc_id = documents.ingest(user_id, "Notes", &text, None).await?;
//! let hits = documents.search("what did we decide about caching", 5, 0.3).await?;
//! ```

pub mod analyzer;
pub mod cache;
pub mod chunker;
pub mod document;
pub mod embeddings;
