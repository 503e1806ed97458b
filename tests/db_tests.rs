//! File-backed database tests
//!
//! Verify that rows and sequence counters survive reopening a libsql file.

mod common;

use std::sync::Arc;

use ares_rag::db::{
    DatabaseProvider, DocumentRepository, SequenceStore, TursoStore, CHUNK_COLLECTION,
    MEMORY_COLLECTION,
};
use ares_rag::types::{DocumentStatus, MemoryType, NewMemory};
use chrono::{Duration, Utc};
use common::{harness_with_store, test_config};
use tempfile::TempDir;

const NOTES: &str = "Backups run every night. Restores are tested monthly.";

async fn open(dir: &TempDir) -> Arc<TursoStore> {
    let path = dir.path().join("data").join("rag.db");
    let path = path.to_str().expect("temp path is utf-8");
    Arc::new(
        TursoStore::new_local(path)
            .await
            .expect("Failed to open file database"),
    )
}

#[tokio::test]
async fn test_documents_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let config = test_config();

    let doc_id = {
        let h = harness_with_store(open(&dir).await, &config).await;
        h.service
            .add_document(4, "Ops", NOTES, None)
            .await
            .data
            .unwrap()
    };

    let store = open(&dir).await;
    let doc = store.get_document(doc_id).await.unwrap().unwrap();
    assert_eq!(doc.title, "Ops");
    assert_eq!(doc.status, DocumentStatus::Active);
    assert_eq!(doc.sentence_count, 2);

    // Ids continue after the persisted segment
    let h = harness_with_store(store, &config).await;
    let next = h
        .service
        .add_document(4, "Ops again", NOTES, None)
        .await
        .data
        .unwrap();
    assert!(next > doc_id);
}

#[tokio::test]
async fn test_sequence_survives_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = open(&dir).await;
        assert_eq!(store.advance("document_id", 100).await.unwrap(), 100);
    }

    let store = open(&dir).await;
    assert_eq!(store.current("document_id").await.unwrap(), Some(100));
    assert_eq!(store.advance("document_id", 100).await.unwrap(), 200);
}

#[tokio::test]
async fn test_provider_builds_file_store() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.database.url = dir.path().join("provider.db").to_string_lossy().into_owned();

    let provider = DatabaseProvider::from_config(&config).unwrap();
    assert!(matches!(provider, DatabaseProvider::SQLite { .. }));

    let store = provider.create_store().await.unwrap();
    assert_eq!(store.advance("user_id", 1).await.unwrap(), 1);
    assert!(dir.path().join("provider.db").exists());
}

#[tokio::test]
async fn test_vectors_restored_after_reopen() {
    let dir = TempDir::new().unwrap();
    let config = test_config();

    let (doc_id, memory_id) = {
        let h = harness_with_store(open(&dir).await, &config).await;
        let doc_id = h
            .service
            .add_document(4, "Ops", NOTES, None)
            .await
            .data
            .unwrap();
        let memory = h
            .service
            .add_memory(NewMemory::new(4, "Restores happen monthly", MemoryType::Fact))
            .await
            .data
            .unwrap();

        let mut lapsed = NewMemory::new(4, "Old backup window", MemoryType::Context);
        lapsed.expires_at = Some(Utc::now() - Duration::minutes(1));
        h.service.add_memory(lapsed).await.data.unwrap();

        let hits = h
            .service
            .search_documents("backups restores", 5, 0.0)
            .await
            .data
            .unwrap();
        assert_eq!(hits.len(), 1);
        (doc_id, memory.id)
    };

    // Fresh in-memory index over the same database file
    let h = harness_with_store(open(&dir).await, &config).await;
    assert_eq!(h.index.ids(MEMORY_COLLECTION), vec![memory_id]);
    assert!(!h.index.ids(CHUNK_COLLECTION).is_empty());

    let hits = h
        .service
        .search_documents("backups restores", 5, 0.0)
        .await
        .data
        .unwrap();
    assert_eq!(hits.first().map(|hit| hit.doc_id), Some(doc_id));

    let memories = h
        .service
        .search_memories(4, "restores monthly", 5)
        .await
        .data
        .unwrap();
    assert_eq!(memories.first().map(|hit| hit.memory.id), Some(memory_id));
}
