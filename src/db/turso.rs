use crate::types::{
    AppError, Chunk, Document, DocumentStatus, DocumentTree, Memory, MemoryType, MemoryTypeStats,
    Paragraph, Result, Sentence,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::{IntoParams, Params};
use libsql::{Builder, Connection, Database, Row, Rows, Transaction, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::traits::{DocumentRepository, MemoryRepository, PendingWrite, SequenceStore};

const SCHEMA: &[(&str, &str)] = &[
    (
        "id_sequence",
        "CREATE TABLE IF NOT EXISTS id_sequence (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    ),
    (
        "document",
        "CREATE TABLE IF NOT EXISTS document (
            doc_id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            status TEXT NOT NULL,
            metadata TEXT NOT NULL,
            paragraph_count INTEGER NOT NULL,
            sentence_count INTEGER NOT NULL,
            keywords TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    ),
    (
        "idx_document_user",
        "CREATE INDEX IF NOT EXISTS idx_document_user ON document (user_id, created_at)",
    ),
    (
        "document_paragraph",
        "CREATE TABLE IF NOT EXISTS document_paragraph (
            doc_id INTEGER NOT NULL,
            paragraph_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            keywords TEXT NOT NULL,
            sentence_id_min INTEGER NOT NULL,
            sentence_id_max INTEGER NOT NULL,
            PRIMARY KEY (doc_id, paragraph_id)
        )",
    ),
    (
        "document_sentence",
        "CREATE TABLE IF NOT EXISTS document_sentence (
            doc_id INTEGER NOT NULL,
            sentence_id INTEGER NOT NULL,
            paragraph_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            PRIMARY KEY (doc_id, sentence_id)
        )",
    ),
    (
        "document_chunk",
        "CREATE TABLE IF NOT EXISTS document_chunk (
            chunk_id INTEGER PRIMARY KEY,
            doc_id INTEGER NOT NULL,
            paragraph_id INTEGER NOT NULL,
            sentence_id_min INTEGER NOT NULL,
            sentence_id_max INTEGER NOT NULL,
            content TEXT NOT NULL,
            keywords TEXT NOT NULL,
            embedding BLOB NOT NULL
        )",
    ),
    (
        "idx_chunk_doc",
        "CREATE INDEX IF NOT EXISTS idx_chunk_doc ON document_chunk (doc_id)",
    ),
    (
        "chat_memory",
        "CREATE TABLE IF NOT EXISTS chat_memory (
            id INTEGER PRIMARY KEY,
            session_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            memory_type TEXT NOT NULL,
            importance REAL NOT NULL,
            metadata TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            last_accessed_at INTEGER NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            embedding BLOB
        )",
    ),
    (
        "idx_memory_user",
        "CREATE INDEX IF NOT EXISTS idx_memory_user ON chat_memory (user_id, memory_type)",
    ),
    (
        "idx_memory_expiry",
        "CREATE INDEX IF NOT EXISTS idx_memory_expiry ON chat_memory (expires_at)",
    ),
];

const DOCUMENT_COLUMNS: &str = "doc_id, user_id, title, status, metadata, paragraph_count, \
     sentence_count, keywords, created_at, updated_at";
const CHUNK_COLUMNS: &str =
    "chunk_id, doc_id, paragraph_id, sentence_id_min, sentence_id_max, content, keywords";
const MEMORY_COLUMNS: &str = "id, session_id, user_id, content, memory_type, importance, \
     metadata, created_at, expires_at, last_accessed_at, access_count";

/// libsql-backed relational store.
///
/// Holds a single connection; `:memory:` databases exist per connection, so
/// every caller must share it. Writes are serialized through `write_gate`
/// because a transaction on the shared connection would otherwise absorb
/// statements issued by other tasks.
pub struct TursoStore {
    _db: Database,
    conn: Connection,
    write_gate: Arc<Mutex<()>>,
}

impl TursoStore {
    /// Ephemeral database, lost when the store is dropped
    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open in-memory database: {}", e)))?;

        Self::from_database(db).await
    }

    /// File-backed SQLite database. Parent directories are created
    pub async fn new_local(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open database {}: {}", path, e)))?;

        Self::from_database(db).await
    }

    #[cfg(feature = "turso")]
    pub async fn new_remote(url: String, auth_token: String) -> Result<Self> {
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Turso: {}", e)))?;

        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))?;

        let store = Self {
            _db: db,
            conn,
            write_gate: Arc::new(Mutex::new(())),
        };
        store.initialize_schema().await?;

        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        for (name, sql) in SCHEMA {
            self.conn
                .execute(sql, ())
                .await
                .map_err(|e| AppError::Database(format!("Failed to create {}: {}", name, e)))?;
        }
        info!(tables = SCHEMA.len(), "Database schema ready");
        Ok(())
    }

    async fn begin(&self) -> Result<(OwnedMutexGuard<()>, Transaction)> {
        let guard = self.write_gate.clone().lock_owned().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
        Ok((guard, tx))
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(tx: Transaction, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::Database(format!("Failed to commit: {}", e)))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn query(&self, sql: &str, params: impl IntoParams) -> Result<Rows> {
        self.conn
            .query(sql, params)
            .await
            .map_err(|e| AppError::Database(format!("Query failed: {}", e)))
    }

    // ============== Writers shared by transactional operations ==============

    async fn write_children(conn: &Connection, tree: &DocumentTree) -> Result<()> {
        let doc_id = tree.document.doc_id as i64;

        for p in &tree.paragraphs {
            conn.execute(
                "INSERT INTO document_paragraph
                 (doc_id, paragraph_id, content, keywords, sentence_id_min, sentence_id_max)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    doc_id,
                    p.paragraph_id as i64,
                    p.content.as_str(),
                    serde_json::to_string(&p.keywords)?,
                    p.sentence_id_min as i64,
                    p.sentence_id_max as i64,
                ),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert paragraph: {}", e)))?;
        }

        for s in &tree.sentences {
            conn.execute(
                "INSERT INTO document_sentence (doc_id, sentence_id, paragraph_id, content)
                 VALUES (?, ?, ?, ?)",
                (
                    doc_id,
                    s.sentence_id as i64,
                    s.paragraph_id as i64,
                    s.content.as_str(),
                ),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert sentence: {}", e)))?;
        }

        for c in &tree.chunks {
            conn.execute(
                "INSERT INTO document_chunk
                 (chunk_id, doc_id, paragraph_id, sentence_id_min, sentence_id_max,
                  content, keywords, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                Params::Positional(vec![
                    Value::Integer(c.chunk_id as i64),
                    Value::Integer(doc_id),
                    Value::Integer(c.paragraph_id as i64),
                    Value::Integer(c.sentence_id_min as i64),
                    Value::Integer(c.sentence_id_max as i64),
                    Value::Text(c.content.clone()),
                    Value::Text(serde_json::to_string(&c.keywords)?),
                    Value::Blob(encode_embedding(&c.embedding)),
                ]),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert chunk: {}", e)))?;
        }

        Ok(())
    }

    async fn delete_children(conn: &Connection, doc_id: u64) -> Result<Vec<u64>> {
        let mut rows = conn
            .query(
                "SELECT chunk_id FROM document_chunk WHERE doc_id = ? ORDER BY chunk_id",
                [doc_id as i64],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query chunk ids: {}", e)))?;
        let mut chunk_ids = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            chunk_ids.push(int(&row, 0)? as u64);
        }

        for table in ["document_chunk", "document_sentence", "document_paragraph"] {
            conn.execute(
                &format!("DELETE FROM {} WHERE doc_id = ?", table),
                [doc_id as i64],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to delete from {}: {}", table, e)))?;
        }

        Ok(chunk_ids)
    }

    async fn insert_document_row(conn: &Connection, doc: &Document) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO document ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                DOCUMENT_COLUMNS
            ),
            Params::Positional(vec![
                Value::Integer(doc.doc_id as i64),
                Value::Integer(doc.user_id as i64),
                Value::Text(doc.title.clone()),
                Value::Text(doc.status.as_str().to_string()),
                Value::Text(serde_json::to_string(&doc.metadata)?),
                Value::Integer(doc.paragraph_count as i64),
                Value::Integer(doc.sentence_count as i64),
                Value::Text(serde_json::to_string(&doc.keywords)?),
                Value::Integer(doc.created_at.timestamp_millis()),
                Value::Integer(doc.updated_at.timestamp_millis()),
            ]),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert document: {}", e)))?;
        Ok(())
    }

    async fn insert_tree(conn: &Connection, tree: &DocumentTree) -> Result<()> {
        Self::insert_document_row(conn, &tree.document).await?;
        Self::write_children(conn, tree).await
    }

    async fn replace_tree(conn: &Connection, tree: &DocumentTree) -> Result<Vec<u64>> {
        let doc = &tree.document;
        let updated = conn
            .execute(
                "UPDATE document SET title = ?, status = ?, metadata = ?, paragraph_count = ?,
                 sentence_count = ?, keywords = ?, updated_at = ? WHERE doc_id = ?",
                Params::Positional(vec![
                    Value::Text(doc.title.clone()),
                    Value::Text(doc.status.as_str().to_string()),
                    Value::Text(serde_json::to_string(&doc.metadata)?),
                    Value::Integer(doc.paragraph_count as i64),
                    Value::Integer(doc.sentence_count as i64),
                    Value::Text(serde_json::to_string(&doc.keywords)?),
                    Value::Integer(doc.updated_at.timestamp_millis()),
                    Value::Integer(doc.doc_id as i64),
                ]),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to update document: {}", e)))?;

        if updated == 0 {
            return Err(AppError::NotFound(format!("Document {}", doc.doc_id)));
        }

        let old_chunks = Self::delete_children(conn, doc.doc_id).await?;
        Self::write_children(conn, tree).await?;
        Ok(old_chunks)
    }

    async fn delete_tree(conn: &Connection, doc_id: u64) -> Result<Vec<u64>> {
        let chunk_ids = Self::delete_children(conn, doc_id).await?;
        let deleted = conn
            .execute("DELETE FROM document WHERE doc_id = ?", [doc_id as i64])
            .await
            .map_err(|e| AppError::Database(format!("Failed to delete document: {}", e)))?;

        if deleted == 0 {
            return Err(AppError::NotFound(format!("Document {}", doc_id)));
        }
        Ok(chunk_ids)
    }

    async fn insert_memory_row(
        conn: &Connection,
        m: &Memory,
        embedding: &[f32],
    ) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO chat_memory ({}, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                MEMORY_COLUMNS
            ),
            Params::Positional(vec![
                Value::Integer(m.id as i64),
                Value::Integer(m.session_id as i64),
                Value::Integer(m.user_id as i64),
                Value::Text(m.content.clone()),
                Value::Text(m.memory_type.as_str().to_string()),
                Value::Real(m.importance as f64),
                Value::Text(serde_json::to_string(&m.metadata)?),
                Value::Integer(m.created_at.timestamp_millis()),
                Value::Integer(m.expires_at.timestamp_millis()),
                Value::Integer(m.last_accessed_at.timestamp_millis()),
                Value::Integer(m.access_count as i64),
                Value::Blob(encode_embedding(embedding)),
            ]),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert memory: {}", e)))?;
        Ok(())
    }

    async fn delete_memory_ids(conn: &Connection, ids: &[u64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = conn
            .execute(
                &format!("DELETE FROM chat_memory WHERE id IN ({})", placeholders(ids.len())),
                id_params(ids),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to delete memories: {}", e)))?;
        Ok(deleted as usize)
    }

    async fn advance_in(conn: &Connection, name: &str, step: u64) -> Result<u64> {
        let mut rows = conn
            .query("SELECT value FROM id_sequence WHERE name = ?", [name])
            .await
            .map_err(|e| AppError::Database(format!("Failed to read sequence: {}", e)))?;
        let existing = match next_row(&mut rows).await? {
            Some(row) => Some(int(&row, 0)?),
            None => None,
        };
        drop(rows);

        let now = Utc::now().timestamp_millis();
        let value = match existing {
            Some(current) => {
                let next = current + step as i64;
                conn.execute(
                    "UPDATE id_sequence SET value = ?, updated_at = ? WHERE name = ?",
                    (next, now, name),
                )
                .await
                .map_err(|e| AppError::Database(format!("Failed to advance sequence: {}", e)))?;
                next
            }
            None => {
                conn.execute(
                    "INSERT INTO id_sequence (name, value, updated_at) VALUES (?, ?, ?)",
                    (name, step as i64, now),
                )
                .await
                .map_err(|e| AppError::Database(format!("Failed to create sequence: {}", e)))?;
                step as i64
            }
        };

        Ok(value as u64)
    }

    async fn collect_documents(
        &self,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<Vec<Document>> {
        let mut rows = self.query(sql, params).await?;
        let mut out = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            out.push(document_from_row(&row)?);
        }
        Ok(out)
    }

    async fn collect_memories(
        &self,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<Vec<Memory>> {
        let mut rows = self.query(sql, params).await?;
        let mut out = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            out.push(memory_from_row(&row)?);
        }
        Ok(out)
    }
}

// ============== Row mapping ==============

async fn next_row(rows: &mut Rows) -> Result<Option<Row>> {
    rows.next()
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

fn int(row: &Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx)
        .map_err(|e| AppError::Database(e.to_string()))
}

fn real(row: &Row, idx: i32) -> Result<f64> {
    row.get::<f64>(idx)
        .map_err(|e| AppError::Database(e.to_string()))
}

fn text(row: &Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| AppError::Database(e.to_string()))
}

fn blob(row: &Row, idx: i32) -> Result<Vec<u8>> {
    row.get::<Vec<u8>>(idx)
        .map_err(|e| AppError::Database(e.to_string()))
}

fn timestamp(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    let millis = int(row, idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::Database(format!("Invalid timestamp: {}", millis)))
}

fn document_from_row(row: &Row) -> Result<Document> {
    Ok(Document {
        doc_id: int(row, 0)? as u64,
        user_id: int(row, 1)? as u64,
        title: text(row, 2)?,
        status: DocumentStatus::parse(&text(row, 3)?)?,
        metadata: serde_json::from_str(&text(row, 4)?)?,
        paragraph_count: int(row, 5)? as u32,
        sentence_count: int(row, 6)? as u32,
        keywords: serde_json::from_str(&text(row, 7)?)?,
        created_at: timestamp(row, 8)?,
        updated_at: timestamp(row, 9)?,
    })
}

fn chunk_from_row(row: &Row, with_embedding: bool) -> Result<Chunk> {
    Ok(Chunk {
        chunk_id: int(row, 0)? as u64,
        doc_id: int(row, 1)? as u64,
        paragraph_id: int(row, 2)? as u32,
        sentence_id_min: int(row, 3)? as u32,
        sentence_id_max: int(row, 4)? as u32,
        content: text(row, 5)?,
        keywords: serde_json::from_str(&text(row, 6)?)?,
        embedding: if with_embedding {
            decode_embedding(&blob(row, 7)?)?
        } else {
            Vec::new()
        },
    })
}

fn memory_from_row(row: &Row) -> Result<Memory> {
    Ok(Memory {
        id: int(row, 0)? as u64,
        session_id: int(row, 1)? as u64,
        user_id: int(row, 2)? as u64,
        content: text(row, 3)?,
        memory_type: MemoryType::parse(&text(row, 4)?)
            .map_err(|e| AppError::Database(e.to_string()))?,
        importance: real(row, 5)? as f32,
        metadata: serde_json::from_str(&text(row, 6)?)?,
        created_at: timestamp(row, 7)?,
        expires_at: timestamp(row, 8)?,
        last_accessed_at: timestamp(row, 9)?,
        access_count: int(row, 10)? as u32,
    })
}

/// `(id, embedding)` rows
async fn collect_vectors(rows: &mut Rows) -> Result<Vec<(u64, Vec<f32>)>> {
    let mut vectors = Vec::new();
    while let Some(row) = next_row(rows).await? {
        vectors.push((int(&row, 0)? as u64, decode_embedding(&blob(&row, 1)?)?));
    }
    Ok(vectors)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn id_params(ids: &[u64]) -> Params {
    Params::Positional(ids.iter().map(|id| Value::Integer(*id as i64)).collect())
}

/// Little-endian `f32` blob
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Database(format!(
            "Embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

// ============== Transaction handle ==============

struct PendingTransaction {
    tx: Transaction,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl PendingWrite for PendingTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let PendingTransaction { tx, _guard } = *self;
        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit: {}", e)))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PendingTransaction { tx, _guard } = *self;
        tx.rollback()
            .await
            .map_err(|e| AppError::Database(format!("Failed to roll back: {}", e)))
    }
}

// ============== Trait implementations ==============

#[async_trait]
impl SequenceStore for TursoStore {
    async fn advance(&self, name: &str, step: u64) -> Result<u64> {
        let (_guard, tx) = self.begin().await?;
        let result = Self::advance_in(&tx, name, step).await;
        let value = Self::finish(tx, result).await?;
        debug!(sequence = name, value, "Advanced sequence");
        Ok(value)
    }

    async fn current(&self, name: &str) -> Result<Option<u64>> {
        let mut rows = self
            .query("SELECT value FROM id_sequence WHERE name = ?", [name])
            .await?;
        match next_row(&mut rows).await? {
            Some(row) => Ok(Some(int(&row, 0)? as u64)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentRepository for TursoStore {
    async fn insert_document_tree(&self, tree: &DocumentTree) -> Result<()> {
        let (_guard, tx) = self.begin().await?;
        let result = Self::insert_tree(&tx, tree).await;
        Self::finish(tx, result).await
    }

    async fn replace_document_tree(&self, tree: &DocumentTree) -> Result<Vec<u64>> {
        let (_guard, tx) = self.begin().await?;
        let result = Self::replace_tree(&tx, tree).await;
        Self::finish(tx, result).await
    }

    async fn delete_document_tree(&self, doc_id: u64) -> Result<Vec<u64>> {
        let (_guard, tx) = self.begin().await?;
        let result = Self::delete_tree(&tx, doc_id).await;
        Self::finish(tx, result).await
    }

    async fn set_document_status(&self, doc_id: u64, status: DocumentStatus) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        let updated = self
            .conn
            .execute(
                "UPDATE document SET status = ?, updated_at = ? WHERE doc_id = ?",
                (status.as_str(), Utc::now().timestamp_millis(), doc_id as i64),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to update status: {}", e)))?;

        if updated == 0 {
            return Err(AppError::NotFound(format!("Document {}", doc_id)));
        }
        Ok(())
    }

    async fn get_document(&self, doc_id: u64) -> Result<Option<Document>> {
        let docs = self
            .collect_documents(
                &format!("SELECT {} FROM document WHERE doc_id = ?", DOCUMENT_COLUMNS),
                [doc_id as i64],
            )
            .await?;
        Ok(docs.into_iter().next())
    }

    async fn documents_by_ids(&self, doc_ids: &[u64]) -> Result<Vec<Document>> {
        if doc_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.collect_documents(
            &format!(
                "SELECT {} FROM document WHERE doc_id IN ({})",
                DOCUMENT_COLUMNS,
                placeholders(doc_ids.len())
            ),
            id_params(doc_ids),
        )
        .await
    }

    async fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>> {
        self.collect_documents(
            &format!(
                "SELECT {} FROM document WHERE status = ? ORDER BY doc_id",
                DOCUMENT_COLUMNS
            ),
            [status.as_str()],
        )
        .await
    }

    async fn list_documents(
        &self,
        user_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<(u64, Vec<Document>)> {
        let mut rows = self
            .query(
                "SELECT COUNT(*) FROM document WHERE user_id = ?",
                [user_id as i64],
            )
            .await?;
        let total = match next_row(&mut rows).await? {
            Some(row) => int(&row, 0)? as u64,
            None => 0,
        };

        let documents = self
            .collect_documents(
                &format!(
                    "SELECT {} FROM document WHERE user_id = ?
                     ORDER BY created_at DESC, doc_id DESC LIMIT ? OFFSET ?",
                    DOCUMENT_COLUMNS
                ),
                (user_id as i64, limit as i64, offset as i64),
            )
            .await?;

        Ok((total, documents))
    }

    async fn paragraphs(&self, doc_id: u64) -> Result<Vec<Paragraph>> {
        let mut rows = self
            .query(
                "SELECT doc_id, paragraph_id, content, keywords, sentence_id_min, sentence_id_max
                 FROM document_paragraph WHERE doc_id = ? ORDER BY paragraph_id",
                [doc_id as i64],
            )
            .await?;

        let mut paragraphs = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            paragraphs.push(Paragraph {
                doc_id: int(&row, 0)? as u64,
                paragraph_id: int(&row, 1)? as u32,
                content: text(&row, 2)?,
                keywords: serde_json::from_str(&text(&row, 3)?)?,
                sentence_id_min: int(&row, 4)? as u32,
                sentence_id_max: int(&row, 5)? as u32,
            });
        }
        Ok(paragraphs)
    }

    async fn sentences_in_range(&self, doc_id: u64, min: u32, max: u32) -> Result<Vec<Sentence>> {
        let mut rows = self
            .query(
                "SELECT doc_id, sentence_id, paragraph_id, content FROM document_sentence
                 WHERE doc_id = ? AND sentence_id BETWEEN ? AND ? ORDER BY sentence_id",
                (doc_id as i64, min as i64, max as i64),
            )
            .await?;

        let mut sentences = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            sentences.push(Sentence {
                doc_id: int(&row, 0)? as u64,
                sentence_id: int(&row, 1)? as u32,
                paragraph_id: int(&row, 2)? as u32,
                content: text(&row, 3)?,
            });
        }
        Ok(sentences)
    }

    async fn chunks_by_ids(&self, chunk_ids: &[u64]) -> Result<Vec<Chunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut rows = self
            .query(
                &format!(
                    "SELECT {} FROM document_chunk WHERE chunk_id IN ({})",
                    CHUNK_COLUMNS,
                    placeholders(chunk_ids.len())
                ),
                id_params(chunk_ids),
            )
            .await?;

        let mut chunks = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            chunks.push(chunk_from_row(&row, false)?);
        }
        Ok(chunks)
    }

    async fn active_chunk_vectors(&self) -> Result<Vec<(u64, Vec<f32>)>> {
        let mut rows = self
            .query(
                "SELECT c.chunk_id, c.embedding FROM document_chunk c
                 JOIN document d ON d.doc_id = c.doc_id
                 WHERE d.status = ? ORDER BY c.chunk_id",
                [DocumentStatus::Active.as_str()],
            )
            .await?;
        collect_vectors(&mut rows).await
    }

    async fn chunks_for_document(&self, doc_id: u64) -> Result<Vec<Chunk>> {
        let mut rows = self
            .query(
                &format!(
                    "SELECT {}, embedding FROM document_chunk WHERE doc_id = ? ORDER BY chunk_id",
                    CHUNK_COLUMNS
                ),
                [doc_id as i64],
            )
            .await?;

        let mut chunks = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            chunks.push(chunk_from_row(&row, true)?);
        }
        Ok(chunks)
    }
}

#[async_trait]
impl MemoryRepository for TursoStore {
    async fn insert_memory(&self, memory: &Memory, embedding: &[f32]) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        Self::insert_memory_row(&self.conn, memory, embedding).await
    }

    async fn begin_memory_batch(
        &self,
        memories: &[Memory],
        embeddings: &[Vec<f32>],
    ) -> Result<Box<dyn PendingWrite>> {
        if memories.len() != embeddings.len() {
            return Err(AppError::Internal(format!(
                "{} memories but {} embeddings",
                memories.len(),
                embeddings.len()
            )));
        }
        let (guard, tx) = self.begin().await?;

        let mut result = Ok(());
        for (memory, embedding) in memories.iter().zip(embeddings) {
            result = Self::insert_memory_row(&tx, memory, embedding).await;
            if result.is_err() {
                break;
            }
        }

        match result {
            Ok(()) => Ok(Box::new(PendingTransaction { tx, _guard: guard })),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn get_memory(&self, id: u64) -> Result<Option<Memory>> {
        let memories = self
            .collect_memories(
                &format!("SELECT {} FROM chat_memory WHERE id = ?", MEMORY_COLUMNS),
                [id as i64],
            )
            .await?;
        Ok(memories.into_iter().next())
    }

    async fn memories_by_ids(&self, ids: &[u64]) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.collect_memories(
            &format!(
                "SELECT {} FROM chat_memory WHERE id IN ({})",
                MEMORY_COLUMNS,
                placeholders(ids.len())
            ),
            id_params(ids),
        )
        .await
    }

    async fn update_memory(&self, memory: &Memory, embedding: Option<&[f32]>) -> Result<()> {
        let mut values = vec![
            Value::Text(memory.content.clone()),
            Value::Real(memory.importance as f64),
            Value::Text(serde_json::to_string(&memory.metadata)?),
        ];
        let sql = match embedding {
            Some(vector) => {
                values.push(Value::Blob(encode_embedding(vector)));
                "UPDATE chat_memory SET content = ?, importance = ?, metadata = ?, embedding = ?
                 WHERE id = ?"
            }
            None => "UPDATE chat_memory SET content = ?, importance = ?, metadata = ? WHERE id = ?",
        };
        values.push(Value::Integer(memory.id as i64));

        let _guard = self.write_gate.lock().await;
        let updated = self
            .conn
            .execute(sql, Params::Positional(values))
            .await
            .map_err(|e| AppError::Database(format!("Failed to update memory: {}", e)))?;

        if updated == 0 {
            return Err(AppError::NotFound(format!("Memory {}", memory.id)));
        }
        Ok(())
    }

    async fn memory_embedding(&self, id: u64) -> Result<Option<Vec<f32>>> {
        let mut rows = self
            .query(
                "SELECT id, embedding FROM chat_memory WHERE id = ? AND embedding IS NOT NULL",
                [id as i64],
            )
            .await?;
        Ok(collect_vectors(&mut rows).await?.pop().map(|(_, v)| v))
    }

    async fn live_memory_vectors(&self, now: DateTime<Utc>) -> Result<Vec<(u64, Vec<f32>)>> {
        let mut rows = self
            .query(
                "SELECT id, embedding FROM chat_memory
                 WHERE expires_at > ? AND embedding IS NOT NULL ORDER BY id",
                [now.timestamp_millis()],
            )
            .await?;
        collect_vectors(&mut rows).await
    }

    async fn delete_memory(&self, id: u64) -> Result<bool> {
        let _guard = self.write_gate.lock().await;
        let deleted = Self::delete_memory_ids(&self.conn, &[id]).await?;
        Ok(deleted > 0)
    }

    async fn delete_owned_memories(&self, user_id: u64, ids: &[u64]) -> Result<Vec<u64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let owned: Vec<u64> = self
            .memories_by_ids(ids)
            .await?
            .into_iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.id)
            .collect();

        let (_guard, tx) = self.begin().await?;
        let result = Self::delete_memory_ids(&tx, &owned).await;
        Self::finish(tx, result).await?;
        Ok(owned)
    }

    async fn purge_memories(&self, ids: &[u64]) -> Result<usize> {
        let (_guard, tx) = self.begin().await?;
        let result = Self::delete_memory_ids(&tx, ids).await;
        Self::finish(tx, result).await
    }

    async fn touch_memories(&self, ids: &[u64], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut values = vec![Value::Integer(at.timestamp_millis())];
        values.extend(ids.iter().map(|id| Value::Integer(*id as i64)));

        let _guard = self.write_gate.lock().await;
        self.conn
            .execute(
                &format!(
                    "UPDATE chat_memory SET last_accessed_at = ?, access_count = access_count + 1
                     WHERE id IN ({})",
                    placeholders(ids.len())
                ),
                Params::Positional(values),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to touch memories: {}", e)))?;
        Ok(())
    }

    async fn expired_memory_ids(&self, now: DateTime<Utc>) -> Result<Vec<u64>> {
        let mut rows = self
            .query(
                "SELECT id FROM chat_memory WHERE expires_at <= ? ORDER BY id",
                [now.timestamp_millis()],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            ids.push(int(&row, 0)? as u64);
        }
        Ok(ids)
    }

    async fn memory_stats(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryTypeStats>> {
        let mut rows = self
            .query(
                "SELECT memory_type, COUNT(*), AVG(importance), AVG(access_count)
                 FROM chat_memory WHERE user_id = ? AND expires_at > ?
                 GROUP BY memory_type ORDER BY memory_type",
                (user_id as i64, now.timestamp_millis()),
            )
            .await?;

        let mut stats = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            stats.push(MemoryTypeStats {
                memory_type: MemoryType::parse(&text(&row, 0)?)
                    .map_err(|e| AppError::Database(e.to_string()))?,
                count: int(&row, 1)? as u64,
                avg_importance: real(&row, 2)?,
                avg_access_count: real(&row, 3)?,
            });
        }
        Ok(stats)
    }

    async fn related_memories(
        &self,
        user_id: u64,
        memory_type: MemoryType,
        exclude_id: u64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Memory>> {
        self.collect_memories(
            &format!(
                "SELECT {} FROM chat_memory
                 WHERE user_id = ? AND memory_type = ? AND id != ? AND expires_at > ?
                 ORDER BY importance DESC, id ASC LIMIT ?",
                MEMORY_COLUMNS
            ),
            (
                user_id as i64,
                memory_type.as_str(),
                exclude_id as i64,
                now.timestamp_millis(),
                limit as i64,
            ),
        )
        .await
    }
}
