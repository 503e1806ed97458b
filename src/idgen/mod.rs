//! Segment ID allocator.
//!
//! Every logical ID space is backed by one durable counter in the
//! `id_sequence` table. The allocator reserves `step` ids at a time by
//! advancing that counter inside a transaction, then hands them out from
//! memory until the segment runs dry.
//!
//! ```text
//!   stored = 300, step = 100
//!   segment: current = 200 ─▶ 201, 202, ... 300 ─▶ refill ─▶ stored = 400
//! ```
//!
//! Ids are unique and strictly increasing per sequence within a process.
//! Unused ids of a segment are lost on restart, never reissued.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::db::traits::SequenceStore;
use crate::types::{AppError, Result};

/// The logical ID spaces handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    User,
    ChatSession,
    ChatRecord,
    ChatMemory,
    Reminder,
    Document,
    DocumentParagraph,
    DocumentSentence,
    DocumentChunk,
}

impl Sequence {
    pub const ALL: [Sequence; 9] = [
        Sequence::User,
        Sequence::ChatSession,
        Sequence::ChatRecord,
        Sequence::ChatMemory,
        Sequence::Reminder,
        Sequence::Document,
        Sequence::DocumentParagraph,
        Sequence::DocumentSentence,
        Sequence::DocumentChunk,
    ];

    /// Row name in `id_sequence`
    pub fn name(&self) -> &'static str {
        match self {
            Sequence::User => "user_id",
            Sequence::ChatSession => "chat_session_id",
            Sequence::ChatRecord => "chat_record_id",
            Sequence::ChatMemory => "chat_memory_id",
            Sequence::Reminder => "reminder_id",
            Sequence::Document => "document_id",
            Sequence::DocumentParagraph => "document_paragraph_id",
            Sequence::DocumentSentence => "document_sentence_id",
            Sequence::DocumentChunk => "document_chunk_id",
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reserved range `(current, max]` of one sequence
#[derive(Debug, Default)]
struct Segment {
    current: u64,
    max: u64,
}

/// Hands out ids from in-memory segments, refilling from a [`SequenceStore`].
///
/// Each sequence has its own async mutex, so allocations on different
/// sequences never wait on each other.
pub struct SegmentAllocator {
    store: Arc<dyn SequenceStore>,
    step: u64,
    segments: HashMap<Sequence, Arc<Mutex<Segment>>>,
}

impl SegmentAllocator {
    pub fn new(store: Arc<dyn SequenceStore>, step: u64) -> Self {
        let segments = Sequence::ALL
            .iter()
            .map(|seq| (*seq, Arc::new(Mutex::new(Segment::default()))))
            .collect();

        Self {
            store,
            step: step.max(1),
            segments,
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    fn segment(&self, seq: Sequence) -> Result<&Arc<Mutex<Segment>>> {
        self.segments
            .get(&seq)
            .ok_or_else(|| AppError::Internal(format!("No segment for sequence {}", seq)))
    }

    async fn refill(&self, seq: Sequence, segment: &mut Segment) -> Result<()> {
        let stored = self.store.advance(seq.name(), self.step).await?;
        if stored < self.step {
            return Err(AppError::Database(format!(
                "Sequence {} returned {} after advancing by {}",
                seq, stored, self.step
            )));
        }

        segment.current = stored - self.step;
        segment.max = stored;
        debug!(sequence = %seq, from = segment.current + 1, to = segment.max, "Refilled segment");
        Ok(())
    }

    /// Next id of `seq`.
    ///
    /// # Errors
    ///
    /// Returns the store error when the segment is exhausted and the refill
    /// fails. No id is consumed in that case.
    pub async fn allocate(&self, seq: Sequence) -> Result<u64> {
        let mut segment = self.segment(seq)?.lock().await;
        if segment.current >= segment.max {
            self.refill(seq, &mut segment).await?;
        }
        segment.current += 1;
        Ok(segment.current)
    }

    /// `count` ids of `seq` under a single lock hold.
    ///
    /// Ids are increasing but may skip where a segment boundary was crossed.
    pub async fn allocate_many(&self, seq: Sequence, count: usize) -> Result<Vec<u64>> {
        let mut ids = Vec::with_capacity(count);
        if count == 0 {
            return Ok(ids);
        }

        let mut segment = self.segment(seq)?.lock().await;
        while ids.len() < count {
            if segment.current >= segment.max {
                self.refill(seq, &mut segment).await?;
            }
            segment.current += 1;
            ids.push(segment.current);
        }
        Ok(ids)
    }

    /// Reserve a first segment for each sequence up front.
    ///
    /// Sequences are refilled concurrently; the first failure is returned.
    #[instrument(skip(self, sequences), fields(count = sequences.len()))]
    pub async fn preload(&self, sequences: &[Sequence]) -> Result<()> {
        try_join_all(sequences.iter().map(|seq| async move {
            let mut segment = self.segment(*seq)?.lock().await;
            if segment.current >= segment.max {
                self.refill(*seq, &mut segment).await?;
            }
            Ok::<_, AppError>(())
        }))
        .await?;
        info!("Preloaded id segments");
        Ok(())
    }
}
