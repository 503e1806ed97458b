#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============= Document Types =============

/// Lifecycle state of a document row.
///
/// Rows are written as `Indexing` and flipped to `Active` once every chunk
/// vector is in the vector index. Searches only surface active documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Indexing,
    Active,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Indexing => "indexing",
            DocumentStatus::Active => "active",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "indexing" => Ok(DocumentStatus::Indexing),
            "active" => Ok(DocumentStatus::Active),
            other => Err(AppError::Database(format!(
                "Unknown document status: {}",
                other
            ))),
        }
    }
}

/// Typed document metadata, persisted as JSON in the `metadata` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Where the document came from (file name, URL, upload id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Free-form labels supplied by the caller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Mean of the chunk embeddings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: u64,
    pub user_id: u64,
    pub title: String,
    pub status: DocumentStatus,
    pub metadata: DocumentMetadata,
    pub paragraph_count: u32,
    pub sentence_count: u32,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub doc_id: u64,
    /// 1-based position inside the document
    pub paragraph_id: u32,
    pub content: String,
    pub keywords: Vec<String>,
    pub sentence_id_min: u32,
    pub sentence_id_max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    pub doc_id: u64,
    /// Increases across the whole document, starting at 1
    pub sentence_id: u32,
    pub paragraph_id: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: u64,
    pub doc_id: u64,
    pub paragraph_id: u32,
    pub sentence_id_min: u32,
    pub sentence_id_max: u32,
    pub content: String,
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

/// Every row of one document, written or replaced as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTree {
    pub document: Document,
    pub paragraphs: Vec<Paragraph>,
    pub sentences: Vec<Sentence>,
    pub chunks: Vec<Chunk>,
}

impl DocumentTree {
    pub fn chunk_ids(&self) -> Vec<u64> {
        self.chunks.iter().map(|c| c.chunk_id).collect()
    }
}

/// A document together with its paragraphs, as returned by `get_document`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDetail {
    pub document: Document,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub documents: Vec<Document>,
}

/// One ranked document returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentHit {
    pub doc_id: u64,
    pub title: String,
    pub score: f32,
    /// The best scoring chunk of this document
    pub chunk_id: u64,
    pub highlight: String,
}

// ============= Memory Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Fact,
    Reminder,
    Preference,
    Context,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Reminder => "reminder",
            MemoryType::Preference => "preference",
            MemoryType::Context => "context",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "fact" => Ok(MemoryType::Fact),
            "reminder" => Ok(MemoryType::Reminder),
            "preference" => Ok(MemoryType::Preference),
            "context" => Ok(MemoryType::Context),
            other => Err(AppError::InvalidInput(format!(
                "Unknown memory type: {}",
                other
            ))),
        }
    }

    /// Importance assigned to memories extracted from a chat turn of this kind.
    pub fn default_importance(&self) -> f32 {
        match self {
            MemoryType::Fact => 0.8,
            MemoryType::Context => 0.9,
            MemoryType::Preference => 0.6,
            MemoryType::Reminder => 0.9,
        }
    }
}

/// Typed memory metadata, persisted as JSON in the `metadata` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotions: Vec<String>,
    /// Assistant reply the memory was extracted alongside
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Time expression found in the turn ("tomorrow 9am")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: u64,
    pub session_id: u64,
    pub user_id: u64,
    pub content: String,
    pub memory_type: MemoryType,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    pub metadata: MemoryMetadata,
}

/// Input for adding a memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub session_id: u64,
    pub user_id: u64,
    pub content: String,
    pub memory_type: MemoryType,
    pub importance: f32,
    #[serde(default)]
    pub metadata: MemoryMetadata,
    /// Defaults to now plus the configured TTL
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    /// Memory outside any chat session, with the type's default importance.
    pub fn new(user_id: u64, content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            session_id: 0,
            user_id,
            content: content.into(),
            memory_type,
            importance: memory_type.default_importance(),
            metadata: MemoryMetadata::default(),
            expires_at: None,
        }
    }
}

/// Partial update of a memory. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub importance: Option<f32>,
    pub metadata: Option<MemoryMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub memory: Memory,
    pub similarity: f32,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTypeStats {
    pub memory_type: MemoryType,
    pub count: u64,
    pub avg_importance: f64,
    pub avg_access_count: f64,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Consistency gap: {0}")]
    ConsistencyGap(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for failures of an external collaborator (relational store,
    /// vector index, embedding backend).
    pub fn is_dependency(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::VectorIndex(_) | AppError::Embedding(_)
        )
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Reject the zero owner id.
pub fn validate_owner(user_id: u64) -> Result<()> {
    if user_id == 0 {
        return Err(AppError::InvalidInput("user_id is required".to_string()));
    }
    Ok(())
}

/// `Permission` unless `caller` owns the record.
pub fn check_owner(owner: u64, caller: u64, kind: &str, id: u64) -> Result<()> {
    if owner != caller {
        return Err(AppError::Permission(format!(
            "User {} does not own {} {}",
            caller, kind, id
        )));
    }
    Ok(())
}
