//! Document ingestion and retrieval.
//!
//! A document is decomposed into paragraphs, sentences and sentence-window
//! chunks (see [`chunker`](super::chunker)). Rows live in the relational
//! store; chunk vectors are mirrored into the `document_chunk` collection of
//! the vector index.
//!
//! # Write path
//!
//! ```text
//! validate ─▶ plan ─▶ allocate ids ─▶ embed_batch      (no writes yet)
//!     ─▶ one transaction: document(indexing) + paragraphs + sentences + chunks
//!     ─▶ insert_batch vectors (retried) ─▶ status = active
//!            └─ failure ─▶ delete vectors + delete rows ─▶ VectorIndex error
//! ```
//!
//! Searches only see chunks whose row exists and whose document is active,
//! so vectors orphaned by a crash or a failed cleanup never surface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use super::analyzer::TextAnalyzer;
use super::cache::{doc_key, search_key, CacheStore, CacheStoreExt, SEARCH_PREFIX};
use super::chunker::SentenceWindowChunker;
use super::embeddings::Embedder;
use crate::db::traits::DocumentRepository;
use crate::db::vectorstore::{VectorIndex, CHUNK_COLLECTION};
use crate::idgen::{SegmentAllocator, Sequence};
use crate::types::{
    check_owner, validate_owner, AppError, Chunk, Document, DocumentDetail, DocumentHit,
    DocumentMetadata, DocumentPage, DocumentStatus, DocumentTree, Paragraph, Result, Sentence,
};
use crate::utils::toml_config::DocumentConfig;

/// Largest accepted `top_k` and page size
pub const MAX_PAGE: usize = 100;

const REBUILD_BATCH: usize = 256;

/// Ingest, search and maintenance of chunk-indexed documents.
pub struct DocumentService {
    repo: Arc<dyn DocumentRepository>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<dyn CacheStore>,
    allocator: Arc<SegmentAllocator>,
    analyzer: Arc<dyn TextAnalyzer>,
    chunker: SentenceWindowChunker,
    config: DocumentConfig,
}

impl DocumentService {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<dyn CacheStore>,
        allocator: Arc<SegmentAllocator>,
        analyzer: Arc<dyn TextAnalyzer>,
        config: DocumentConfig,
    ) -> Self {
        let chunker = SentenceWindowChunker::new(
            config.window_size,
            config.window_stride,
            config.keywords_top_n,
        );
        Self {
            repo,
            index,
            embedder,
            cache,
            allocator,
            analyzer,
            chunker,
            config,
        }
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Decompose, embed and index a document.
    ///
    /// # Returns
    ///
    /// The new document id. The document is searchable once this returns.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty title or content, or a zero owner
    /// - `Embedding` / `Database` when staging or the relational write fails;
    ///   nothing is persisted
    /// - `VectorIndex` when the chunk vectors cannot be written; the rows are
    ///   removed again
    #[instrument(skip(self, content, metadata), fields(title = %title))]
    pub async fn ingest(
        &self,
        user_id: u64,
        title: &str,
        content: &str,
        metadata: Option<DocumentMetadata>,
    ) -> Result<u64> {
        validate_owner(user_id)?;
        let title = validate_title(title)?;
        if content.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Document content is empty".to_string(),
            ));
        }

        let doc_id = self.allocator.allocate(Sequence::Document).await?;
        let now = Utc::now();
        let metadata = DocumentMetadata {
            embedding: Vec::new(),
            ..metadata.unwrap_or_default()
        };
        let tree = self
            .stage(doc_id, user_id, title, content, metadata, now, now)
            .await?;

        self.repo.insert_document_tree(&tree).await?;
        debug!(doc_id, chunks = tree.chunks.len(), "Document rows committed");

        if let Err(e) = self.write_vectors(&tree.chunks).await {
            self.compensate_ingest(doc_id, &tree.chunk_ids()).await;
            return Err(e);
        }

        self.mark_active(doc_id).await;
        self.invalidate_searches();
        info!(
            doc_id,
            paragraphs = tree.document.paragraph_count,
            sentences = tree.document.sentence_count,
            chunks = tree.chunks.len(),
            "Document ingested"
        );
        Ok(doc_id)
    }

    /// Build every row of a document in memory: plan, allocate chunk ids and
    /// embed all chunk texts in one batch.
    #[allow(clippy::too_many_arguments)]
    async fn stage(
        &self,
        doc_id: u64,
        user_id: u64,
        title: &str,
        content: &str,
        mut metadata: DocumentMetadata,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<DocumentTree> {
        let plan = self.chunker.plan(content, self.analyzer.as_ref());
        if plan.paragraphs.is_empty() || plan.chunks.is_empty() {
            return Err(AppError::InvalidInput(
                "Document contains no paragraphs".to_string(),
            ));
        }

        let chunk_ids = self
            .allocator
            .allocate_many(Sequence::DocumentChunk, plan.chunks.len())
            .await?;

        let texts: Vec<String> = plan.chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "Expected {} chunk embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        metadata.embedding = mean_vector(&vectors);

        let mut paragraphs = Vec::with_capacity(plan.paragraphs.len());
        let mut sentences = Vec::new();
        for p in &plan.paragraphs {
            for (offset, text) in p.sentences.iter().enumerate() {
                sentences.push(Sentence {
                    doc_id,
                    sentence_id: p.sentence_ids.start + offset as u32,
                    paragraph_id: p.paragraph_id,
                    content: text.clone(),
                });
            }
            paragraphs.push(Paragraph {
                doc_id,
                paragraph_id: p.paragraph_id,
                content: p.content.clone(),
                keywords: p.keywords.clone(),
                sentence_id_min: p.sentence_ids.start,
                sentence_id_max: p.sentence_ids.end.saturating_sub(1),
            });
        }

        let chunks = plan
            .chunks
            .iter()
            .zip(chunk_ids)
            .zip(vectors)
            .map(|((c, chunk_id), embedding)| Chunk {
                chunk_id,
                doc_id,
                paragraph_id: c.paragraph_id,
                sentence_id_min: c.sentence_id_min,
                sentence_id_max: c.sentence_id_max,
                content: c.content.clone(),
                keywords: c.keywords.clone(),
                embedding,
            })
            .collect();

        let document = Document {
            doc_id,
            user_id,
            title: title.to_string(),
            status: DocumentStatus::Indexing,
            metadata,
            paragraph_count: plan.paragraph_count(),
            sentence_count: plan.sentence_count(),
            keywords: plan.keywords(),
            created_at,
            updated_at,
        };

        Ok(DocumentTree {
            document,
            paragraphs,
            sentences,
            chunks,
        })
    }

    /// Upsert chunk vectors, retrying the whole batch.
    async fn write_vectors(&self, chunks: &[Chunk]) -> Result<()> {
        let points: Vec<(u64, Vec<f32>)> = chunks
            .iter()
            .map(|c| (c.chunk_id, c.embedding.clone()))
            .collect();

        let attempts = self.config.vector_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.index.insert_batch(CHUNK_COLLECTION, &points).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Chunk vector write failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(AppError::VectorIndex(msg)) => AppError::VectorIndex(msg),
            Some(other) => AppError::VectorIndex(other.to_string()),
            None => AppError::VectorIndex("Chunk vector write failed".to_string()),
        })
    }

    async fn compensate_ingest(&self, doc_id: u64, chunk_ids: &[u64]) {
        if let Err(e) = self.index.delete_batch(CHUNK_COLLECTION, chunk_ids).await {
            warn!(doc_id, error = %e, "Compensating vector delete failed");
        }
        if let Err(e) = self.repo.delete_document_tree(doc_id).await {
            error!(
                doc_id,
                error = %e,
                "Consistency gap: document left in indexing after failed vector write"
            );
        }
    }

    async fn mark_active(&self, doc_id: u64) {
        if let Err(e) = self
            .repo
            .set_document_status(doc_id, DocumentStatus::Active)
            .await
        {
            error!(
                doc_id,
                error = %e,
                "Consistency gap: vectors written but document still indexing"
            );
        }
    }

    /// Re-upsert vectors of documents stuck in `indexing` and activate them.
    ///
    /// Meant for start-up, before new ingests are accepted.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<usize> {
        let pending = self
            .repo
            .documents_with_status(DocumentStatus::Indexing)
            .await?;

        let mut repaired = 0;
        for doc in pending {
            let chunks = self.repo.chunks_for_document(doc.doc_id).await?;
            if let Err(e) = self.write_vectors(&chunks).await {
                warn!(doc_id = doc.doc_id, error = %e, "Reconcile failed for document");
                continue;
            }
            self.repo
                .set_document_status(doc.doc_id, DocumentStatus::Active)
                .await?;
            self.invalidate(doc.doc_id);
            repaired += 1;
        }

        info!(repaired, "Reconcile finished");
        Ok(repaired)
    }

    /// Re-insert the stored vectors of every active document.
    ///
    /// Used at start-up when the index does not survive restarts. Documents
    /// still `indexing` are left to [`reconcile`](Self::reconcile).
    #[instrument(skip(self))]
    pub async fn rebuild_index(&self) -> Result<usize> {
        let points = self.repo.active_chunk_vectors().await?;
        for batch in points.chunks(REBUILD_BATCH) {
            self.index.insert_batch(CHUNK_COLLECTION, batch).await?;
        }
        info!(chunks = points.len(), "Chunk index rebuilt");
        Ok(points.len())
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Rank documents by their best matching chunk.
    ///
    /// # Arguments
    ///
    /// * `top_k` - Documents to return, `1..=100`
    /// * `min_score` - Hits scoring below this are dropped, `[0, 1]`
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<DocumentHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("Query is empty".to_string()));
        }
        if top_k == 0 || top_k > MAX_PAGE {
            return Err(AppError::InvalidInput(format!(
                "top_k must be between 1 and {}",
                MAX_PAGE
            )));
        }
        if !(0.0..=1.0).contains(&min_score) {
            return Err(AppError::InvalidInput(
                "min_score must be within [0, 1]".to_string(),
            ));
        }

        let key = search_key(query, top_k, min_score);
        if let Some(mut hits) = self.cache.get_json::<Vec<DocumentHit>>(&key) {
            hits.retain(|h| h.score >= min_score);
            debug!(hits = hits.len(), "Search served from cache");
            return Ok(hits);
        }

        let query_vector = self.embedder.embed(query).await?;
        let candidates = self
            .index
            .search(CHUNK_COLLECTION, &query_vector, top_k * 2)
            .await?;

        let hits = self.rank(query, candidates, top_k, min_score).await?;

        if let Err(e) = self
            .cache
            .set_json(&key, &hits, Some(self.config.search_cache_ttl()))
        {
            warn!(error = %e, "Failed to cache search result");
        }
        Ok(hits)
    }

    async fn rank(
        &self,
        query: &str,
        candidates: Vec<(u64, f32)>,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<DocumentHit>> {
        let ids: Vec<u64> = candidates.iter().map(|(id, _)| *id).collect();
        let chunks: HashMap<u64, Chunk> = self
            .repo
            .chunks_by_ids(&ids)
            .await?
            .into_iter()
            .map(|c| (c.chunk_id, c))
            .collect();

        let orphans = ids.len() - chunks.len();
        if orphans > 0 {
            debug!(orphans, "Skipping vectors without chunk rows");
        }

        let doc_ids: Vec<u64> = chunks
            .values()
            .map(|c| c.doc_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let documents: HashMap<u64, Document> = self
            .repo
            .documents_by_ids(&doc_ids)
            .await?
            .into_iter()
            .filter(|d| d.status == DocumentStatus::Active)
            .map(|d| (d.doc_id, d))
            .collect();

        let query_keywords: HashSet<String> = self
            .analyzer
            .extract_keywords(query, self.config.keywords_top_n)
            .into_iter()
            .collect();
        let weight = self.config.keyword_weight;

        // Best chunk per document
        let mut best: HashMap<u64, (f32, &Chunk)> = HashMap::new();
        for (chunk_id, similarity) in &candidates {
            let Some(chunk) = chunks.get(chunk_id) else {
                continue;
            };
            if !documents.contains_key(&chunk.doc_id) {
                continue;
            }

            let overlap = keyword_overlap(&query_keywords, &chunk.keywords);
            if self.config.require_keyword_match && !query_keywords.is_empty() && overlap == 0.0 {
                continue;
            }

            let score = (1.0 - weight) * similarity + weight * overlap;
            if score < min_score {
                continue;
            }

            match best.get(&chunk.doc_id) {
                Some((existing, _)) if *existing >= score => {}
                _ => {
                    best.insert(chunk.doc_id, (score, chunk));
                }
            }
        }

        let mut ranked: Vec<(u64, f32, &Chunk)> = best
            .into_iter()
            .map(|(doc_id, (score, chunk))| (doc_id, score, chunk))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);

        let mut hits = Vec::with_capacity(ranked.len());
        for (doc_id, score, chunk) in ranked {
            let title = documents
                .get(&doc_id)
                .map(|d| d.title.clone())
                .unwrap_or_default();
            hits.push(DocumentHit {
                doc_id,
                title,
                score,
                chunk_id: chunk.chunk_id,
                highlight: self.highlight(chunk).await?,
            });
        }
        Ok(hits)
    }

    /// Sentences covered by the chunk, falling back to the chunk text.
    async fn highlight(&self, chunk: &Chunk) -> Result<String> {
        let sentences = self
            .repo
            .sentences_in_range(chunk.doc_id, chunk.sentence_id_min, chunk.sentence_id_max)
            .await?;
        if sentences.is_empty() {
            return Ok(chunk.content.clone());
        }
        Ok(sentences
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }

    // ========================================================================
    // Read / update / delete
    // ========================================================================

    async fn owned_document(&self, user_id: u64, doc_id: u64) -> Result<Document> {
        let doc = self
            .repo
            .get_document(doc_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {} not found", doc_id)))?;
        check_owner(doc.user_id, user_id, "document", doc_id)?;
        Ok(doc)
    }

    /// Document with its paragraphs. Cached under `doc:{id}`.
    pub async fn get(&self, user_id: u64, doc_id: u64) -> Result<DocumentDetail> {
        let key = doc_key(doc_id);
        if let Some(detail) = self.cache.get_json::<DocumentDetail>(&key) {
            check_owner(detail.document.user_id, user_id, "document", doc_id)?;
            return Ok(detail);
        }

        let document = self.owned_document(user_id, doc_id).await?;
        let paragraphs = self.repo.paragraphs(doc_id).await?;
        let detail = DocumentDetail {
            document,
            paragraphs,
        };

        if let Err(e) = self
            .cache
            .set_json(&key, &detail, Some(self.config.doc_cache_ttl()))
        {
            warn!(doc_id, error = %e, "Failed to cache document");
        }
        Ok(detail)
    }

    /// Owner's documents, newest first. `page` is 1-based.
    pub async fn list(&self, user_id: u64, page: u32, page_size: u32) -> Result<DocumentPage> {
        validate_owner(user_id)?;
        if page == 0 {
            return Err(AppError::InvalidInput("page starts at 1".to_string()));
        }
        if page_size == 0 || page_size as usize > MAX_PAGE {
            return Err(AppError::InvalidInput(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE
            )));
        }

        let offset = (page as u64 - 1) * page_size as u64;
        let (total, documents) = self
            .repo
            .list_documents(user_id, offset, page_size as u64)
            .await?;

        Ok(DocumentPage {
            total,
            page,
            page_size,
            documents,
        })
    }

    /// Replace the content (and optionally the title) of a document.
    ///
    /// The new tree replaces the old rows in one transaction. If the new
    /// vectors cannot be written the document stays `indexing` until
    /// [`reconcile`](Self::reconcile) runs.
    #[instrument(skip(self, title, content))]
    pub async fn update(
        &self,
        user_id: u64,
        doc_id: u64,
        title: Option<&str>,
        content: &str,
    ) -> Result<()> {
        let existing = self.owned_document(user_id, doc_id).await?;
        let title = match title {
            Some(t) => validate_title(t)?,
            None => existing.title.as_str(),
        };
        if content.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Document content is empty".to_string(),
            ));
        }

        let tree = self
            .stage(
                doc_id,
                user_id,
                title,
                content,
                existing.metadata.clone(),
                existing.created_at,
                Utc::now(),
            )
            .await?;

        let old_chunks = self.repo.replace_document_tree(&tree).await?;
        self.invalidate(doc_id);

        if let Err(e) = self.index.delete_batch(CHUNK_COLLECTION, &old_chunks).await {
            error!(
                doc_id,
                chunk_ids = ?old_chunks,
                error = %e,
                "Consistency gap: stale chunk vectors left after update"
            );
        }

        if let Err(e) = self.write_vectors(&tree.chunks).await {
            error!(
                doc_id,
                error = %e,
                "Consistency gap: updated document left in indexing"
            );
            return Err(e);
        }

        self.mark_active(doc_id).await;
        self.invalidate(doc_id);
        info!(doc_id, chunks = tree.chunks.len(), "Document updated");
        Ok(())
    }

    /// Delete a document: rows first, then vectors.
    ///
    /// A failed vector delete is logged, not returned; the orphans are
    /// invisible to search.
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: u64, doc_id: u64) -> Result<()> {
        self.owned_document(user_id, doc_id).await?;

        let chunk_ids = self.repo.delete_document_tree(doc_id).await?;
        self.invalidate(doc_id);

        if let Err(e) = self.index.delete_batch(CHUNK_COLLECTION, &chunk_ids).await {
            let gap = AppError::ConsistencyGap(format!(
                "document {} deleted but {} chunk vectors remain: {}",
                doc_id,
                chunk_ids.len(),
                e
            ));
            error!(doc_id, chunk_ids = ?chunk_ids, error = %gap, "Vector cleanup failed");
        }

        info!(doc_id, chunks = chunk_ids.len(), "Document deleted");
        Ok(())
    }

    fn invalidate(&self, doc_id: u64) {
        if let Err(e) = self.cache.delete(&doc_key(doc_id)) {
            warn!(doc_id, error = %e, "Failed to invalidate document cache");
        }
        self.invalidate_searches();
    }

    fn invalidate_searches(&self) {
        match self.cache.delete_prefix(SEARCH_PREFIX) {
            Ok(n) => debug!(evicted = n, "Invalidated search cache"),
            Err(e) => warn!(error = %e, "Failed to invalidate search cache"),
        }
    }
}

fn validate_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::InvalidInput("Document title is empty".to_string()));
    }
    Ok(title)
}

/// Share of query keywords present in the chunk keywords.
fn keyword_overlap(query: &HashSet<String>, chunk: &[String]) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let matched = chunk.iter().filter(|k| query.contains(*k)).count();
    matched as f32 / query.len() as f32
}

/// Element-wise mean. Vectors of a different length than the first are skipped.
fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let dims = first.len();
    let mut sum = vec![0.0f32; dims];
    let mut n = 0usize;
    for v in vectors.iter().filter(|v| v.len() == dims) {
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
        n += 1;
    }
    sum.iter().map(|x| x / n as f32).collect()
}
