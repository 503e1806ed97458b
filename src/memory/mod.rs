//! Semantic memory store.
//!
//! Memories are short facts, reminders, preferences and context extracted
//! from conversations. Each row in `chat_memory` is mirrored as a vector in
//! the `chat_memory` collection so memories can be recalled by meaning.
//!
//! Search blends three signals:
//!
//! ```text
//! score = similarity_weight * similarity
//!       + importance_weight * importance
//!       + recency_weight    * recency
//! ```
//!
//! where recency is the hours since the last access divided by the hours
//! since creation. Expired memories never surface and are removed by
//! [`MemoryStore::clean_expired`], usually from the background
//! [`sweeper`].

pub mod sweeper;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::db::traits::MemoryRepository;
use crate::db::vectorstore::{VectorIndex, MEMORY_COLLECTION};
use crate::idgen::{SegmentAllocator, Sequence};
use crate::rag::embeddings::Embedder;
use crate::types::{
    check_owner, validate_owner, AppError, Memory, MemoryHit, MemoryTypeStats, MemoryUpdate,
    NewMemory, Result,
};
use crate::utils::toml_config::MemoryConfig;

pub use sweeper::SweeperHandle;

/// Largest accepted search or related-memory limit
pub const MAX_LIMIT: usize = 100;

/// Dual-write memory store over a relational repository and a vector index.
pub struct MemoryStore {
    repo: Arc<dyn MemoryRepository>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    allocator: Arc<SegmentAllocator>,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(
        repo: Arc<dyn MemoryRepository>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        allocator: Arc<SegmentAllocator>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            repo,
            index,
            embedder,
            allocator,
            config,
        }
    }

    fn build(&self, id: u64, new: NewMemory, now: DateTime<Utc>) -> Memory {
        let expires_at = new
            .expires_at
            .unwrap_or_else(|| now + Duration::days(self.config.default_ttl_days));
        Memory {
            id,
            session_id: new.session_id,
            user_id: new.user_id,
            content: new.content.trim().to_string(),
            memory_type: new.memory_type,
            importance: new.importance,
            created_at: now,
            expires_at,
            last_accessed_at: now,
            access_count: 0,
            metadata: new.metadata,
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store one memory.
    ///
    /// # Errors
    ///
    /// A failed vector insert removes the row again and returns the
    /// `VectorIndex` error.
    #[instrument(
        skip(self, new),
        fields(user_id = new.user_id, memory_type = new.memory_type.as_str())
    )]
    pub async fn add(&self, new: NewMemory) -> Result<Memory> {
        validate_new(&new)?;

        let id = self.allocator.allocate(Sequence::ChatMemory).await?;
        let vector = self.embedder.embed(new.content.trim()).await?;
        let memory = self.build(id, new, Utc::now());

        self.repo.insert_memory(&memory, &vector).await?;

        if let Err(e) = self.index.insert(MEMORY_COLLECTION, id, &vector).await {
            if let Err(cleanup) = self.repo.delete_memory(id).await {
                error!(
                    memory_id = id,
                    error = %cleanup,
                    "Consistency gap: memory row kept after failed vector insert"
                );
            }
            return Err(e);
        }

        debug!(memory_id = id, "Memory added");
        Ok(memory)
    }

    /// Store many memories, all or nothing.
    ///
    /// Rows are inserted in one transaction that is only committed after the
    /// vector batch succeeds.
    #[instrument(skip(self, batch), fields(count = batch.len()))]
    pub async fn batch_add(&self, batch: Vec<NewMemory>) -> Result<Vec<Memory>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        for new in &batch {
            validate_new(new)?;
        }

        let ids = self
            .allocator
            .allocate_many(Sequence::ChatMemory, batch.len())
            .await?;
        let texts: Vec<String> = batch.iter().map(|m| m.content.trim().to_string()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let now = Utc::now();
        let memories: Vec<Memory> = ids
            .iter()
            .zip(batch)
            .map(|(id, new)| self.build(*id, new, now))
            .collect();
        let pending = self.repo.begin_memory_batch(&memories, &vectors).await?;
        let points: Vec<(u64, Vec<f32>)> = ids.iter().copied().zip(vectors).collect();

        if let Err(e) = self.index.insert_batch(MEMORY_COLLECTION, &points).await {
            if let Err(rollback) = pending.rollback().await {
                warn!(error = %rollback, "Rollback after failed vector batch failed");
            }
            return Err(e);
        }

        if let Err(e) = pending.commit().await {
            if let Err(cleanup) = self.index.delete_batch(MEMORY_COLLECTION, &ids).await {
                error!(
                    memory_ids = ?ids,
                    error = %cleanup,
                    "Consistency gap: vectors kept after failed commit"
                );
            }
            return Err(e);
        }

        info!(count = memories.len(), "Memories added");
        Ok(memories)
    }

    /// Change content, importance or metadata of an owned memory.
    ///
    /// New content is re-embedded before anything is written. If the vector
    /// upsert then fails, the previous row is restored.
    pub async fn update(&self, user_id: u64, id: u64, update: MemoryUpdate) -> Result<Memory> {
        let previous = self.owned(user_id, id).await?;

        let mut next = previous.clone();
        let mut new_vector = None;

        if let Some(content) = update.content {
            let content = content.trim().to_string();
            if content.is_empty() {
                return Err(AppError::InvalidInput("Memory content is empty".to_string()));
            }
            if content != previous.content {
                new_vector = Some(self.embedder.embed(&content).await?);
                next.content = content;
            }
        }
        if let Some(importance) = update.importance {
            validate_importance(importance)?;
            next.importance = importance;
        }
        if let Some(metadata) = update.metadata {
            next.metadata = metadata;
        }

        if next == previous {
            return Ok(previous);
        }

        let previous_vector = if new_vector.is_some() {
            self.repo.memory_embedding(id).await?
        } else {
            None
        };
        self.repo.update_memory(&next, new_vector.as_deref()).await?;

        if let Some(vector) = new_vector {
            if let Err(e) = self.index.insert(MEMORY_COLLECTION, id, &vector).await {
                let restored = self
                    .repo
                    .update_memory(&previous, previous_vector.as_deref())
                    .await;
                if let Err(restore) = restored {
                    error!(
                        memory_id = id,
                        error = %restore,
                        "Consistency gap: memory row no longer matches its vector"
                    );
                }
                return Err(e);
            }
        }

        Ok(next)
    }

    /// Delete one owned memory. Rows go first; a failed vector delete is
    /// logged, the orphan is filtered out of searches.
    pub async fn delete(&self, user_id: u64, id: u64) -> Result<()> {
        self.owned(user_id, id).await?;

        if !self.repo.delete_memory(id).await? {
            return Err(AppError::NotFound(format!("Memory {} not found", id)));
        }
        if let Err(e) = self.index.delete(MEMORY_COLLECTION, id).await {
            error!(memory_id = id, error = %e, "Consistency gap: memory vector kept after delete");
        }
        Ok(())
    }

    /// Delete the listed memories owned by `user_id`; ids owned by someone
    /// else are skipped. Returns how many were removed.
    pub async fn batch_delete(&self, user_id: u64, ids: &[u64]) -> Result<usize> {
        validate_owner(user_id)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let deleted = self.repo.delete_owned_memories(user_id, ids).await?;
        if deleted.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.index.delete_batch(MEMORY_COLLECTION, &deleted).await {
            error!(
                memory_ids = ?deleted,
                error = %e,
                "Consistency gap: memory vectors kept after batch delete"
            );
        }

        info!(user_id, deleted = deleted.len(), "Memories deleted");
        Ok(deleted.len())
    }

    /// Remove every expired memory: vectors first, then rows.
    ///
    /// If the vector delete fails nothing is removed and the next sweep
    /// retries.
    #[instrument(skip(self))]
    pub async fn clean_expired(&self) -> Result<usize> {
        let ids = self.repo.expired_memory_ids(Utc::now()).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        self.index.delete_batch(MEMORY_COLLECTION, &ids).await?;
        let removed = self.repo.purge_memories(&ids).await?;

        info!(removed, "Expired memories cleaned");
        Ok(removed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    async fn owned(&self, user_id: u64, id: u64) -> Result<Memory> {
        validate_owner(user_id)?;
        let memory = self
            .repo
            .get_memory(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Memory {} not found", id)))?;
        check_owner(memory.user_id, user_id, "memory", id)?;
        Ok(memory)
    }

    /// An owned, unexpired memory.
    pub async fn get(&self, user_id: u64, id: u64) -> Result<Memory> {
        let memory = self.owned(user_id, id).await?;
        if memory.expires_at <= Utc::now() {
            return Err(AppError::NotFound(format!("Memory {} has expired", id)));
        }
        Ok(memory)
    }

    /// Recall the owner's memories closest in meaning to `query`.
    ///
    /// Returned memories get their access time and count bumped in the
    /// background.
    #[instrument(skip(self, query))]
    pub async fn search(&self, user_id: u64, query: &str, limit: usize) -> Result<Vec<MemoryHit>> {
        validate_owner(user_id)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("Query is empty".to_string()));
        }
        validate_limit(limit)?;

        let vector = self.embedder.embed(query).await?;
        let candidates = self
            .index
            .search(MEMORY_COLLECTION, &vector, limit * 2)
            .await?;
        let similarity: HashMap<u64, f32> = candidates.iter().copied().collect();

        let ids: Vec<u64> = candidates.iter().map(|(id, _)| *id).collect();
        let now = Utc::now();
        let mut hits: Vec<MemoryHit> = self
            .repo
            .memories_by_ids(&ids)
            .await?
            .into_iter()
            .filter(|m| m.user_id == user_id && m.expires_at > now)
            .map(|memory| {
                let sim = similarity.get(&memory.id).copied().unwrap_or(0.0);
                let score = self.score(sim, &memory, now);
                MemoryHit {
                    memory,
                    similarity: sim,
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.memory.id.cmp(&b.memory.id))
        });
        hits.truncate(limit);

        if !hits.is_empty() {
            let touched: Vec<u64> = hits.iter().map(|h| h.memory.id).collect();
            let repo = Arc::clone(&self.repo);
            tokio::spawn(async move {
                if let Err(e) = repo.touch_memories(&touched, Utc::now()).await {
                    warn!(error = %e, "Failed to record memory access");
                }
            });
        }

        Ok(hits)
    }

    fn score(&self, similarity: f32, memory: &Memory, now: DateTime<Utc>) -> f32 {
        let recency = recency(memory, now, self.config.clamp_recency);
        self.config.similarity_weight * similarity
            + self.config.importance_weight * memory.importance
            + self.config.recency_weight * recency
    }

    /// Per-type counts and averages for one owner
    pub async fn stats(&self, user_id: u64) -> Result<Vec<MemoryTypeStats>> {
        validate_owner(user_id)?;
        self.repo.memory_stats(user_id, Utc::now()).await
    }

    /// Other memories of the same owner and type, most important first.
    pub async fn related(&self, user_id: u64, id: u64, limit: usize) -> Result<Vec<Memory>> {
        validate_limit(limit)?;
        let memory = self.owned(user_id, id).await?;
        self.repo
            .related_memories(user_id, memory.memory_type, id, limit, Utc::now())
            .await
    }

    /// Re-insert the stored vector of every unexpired memory.
    ///
    /// Used at start-up when the index does not survive restarts.
    #[instrument(skip(self))]
    pub async fn rebuild_index(&self) -> Result<usize> {
        let points = self.repo.live_memory_vectors(Utc::now()).await?;
        if !points.is_empty() {
            self.index.insert_batch(MEMORY_COLLECTION, &points).await?;
        }
        info!(memories = points.len(), "Memory index rebuilt");
        Ok(points.len())
    }
}

/// Hours since last access over hours since creation.
fn recency(memory: &Memory, now: DateTime<Utc>, clamp: bool) -> f32 {
    const MS_PER_HOUR: f32 = 3_600_000.0;
    let since_created = (now - memory.created_at).num_milliseconds() as f32 / MS_PER_HOUR;
    if since_created <= 0.0 {
        return 0.0;
    }
    let since_access = (now - memory.last_accessed_at).num_milliseconds() as f32 / MS_PER_HOUR;
    let ratio = since_access / since_created;
    if clamp {
        ratio.clamp(0.0, 1.0)
    } else {
        ratio
    }
}

fn validate_importance(importance: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&importance) {
        return Err(AppError::InvalidInput(format!(
            "importance must be within [0, 1], got {}",
            importance
        )));
    }
    Ok(())
}

fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::InvalidInput(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    Ok(())
}

fn validate_new(new: &NewMemory) -> Result<()> {
    validate_owner(new.user_id)?;
    if new.content.trim().is_empty() {
        return Err(AppError::InvalidInput("Memory content is empty".to_string()));
    }
    validate_importance(new.importance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryMetadata, MemoryType};

    fn memory_at(created_hours_ago: i64, accessed_hours_ago: i64, now: DateTime<Utc>) -> Memory {
        Memory {
            id: 1,
            session_id: 1,
            user_id: 1,
            content: "likes tea".to_string(),
            memory_type: MemoryType::Preference,
            importance: 0.6,
            created_at: now - Duration::hours(created_hours_ago),
            expires_at: now + Duration::days(1),
            last_accessed_at: now - Duration::hours(accessed_hours_ago),
            access_count: 0,
            metadata: MemoryMetadata::default(),
        }
    }

    #[test]
    fn test_recency_ratio() {
        let now = Utc::now();
        let m = memory_at(10, 5, now);
        assert!((recency(&m, now, false) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_recency_zero_age() {
        let now = Utc::now();
        let m = memory_at(0, 0, now);
        assert_eq!(recency(&m, now, false), 0.0);
    }

    #[test]
    fn test_recency_clamp() {
        let now = Utc::now();
        // Access time before creation only happens with imported rows
        let m = memory_at(2, 6, now);
        assert!((recency(&m, now, false) - 3.0).abs() < 1e-4);
        assert_eq!(recency(&m, now, true), 1.0);
    }

    #[test]
    fn test_recency_unclamped_by_default() {
        let now = Utc::now();
        let config = MemoryConfig::default();
        assert!(!config.clamp_recency);
        let m = memory_at(2, 6, now);
        assert!((recency(&m, now, config.clamp_recency) - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_validate_new() {
        let mut new = NewMemory {
            session_id: 1,
            user_id: 1,
            content: "  ".to_string(),
            memory_type: MemoryType::Fact,
            importance: 0.5,
            metadata: MemoryMetadata::default(),
            expires_at: None,
        };
        assert!(validate_new(&new).is_err());

        new.content = "ok".to_string();
        new.importance = 1.5;
        assert!(validate_new(&new).is_err());

        new.importance = 1.0;
        assert!(validate_new(&new).is_ok());
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(101).is_err());
    }
}
