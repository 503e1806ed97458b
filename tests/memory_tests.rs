//! Semantic memory integration tests

mod common;

use std::time::Duration as StdDuration;

use ares_rag::db::{MemoryRepository, MEMORY_COLLECTION};
use ares_rag::service::{CODE_INVALID_INPUT, CODE_NOT_FOUND, CODE_PERMISSION, CODE_UNAVAILABLE};
use ares_rag::types::{MemoryMetadata, MemoryType, MemoryUpdate, NewMemory};
use chrono::{Duration, Utc};
use common::harness;

fn memory(user_id: u64, content: &str, memory_type: MemoryType) -> NewMemory {
    NewMemory {
        session_id: 1,
        user_id,
        content: content.to_string(),
        memory_type,
        importance: 0.5,
        metadata: MemoryMetadata::default(),
        expires_at: None,
    }
}

#[tokio::test]
async fn test_add_and_get_memory() {
    let h = harness().await;

    let stored = h
        .service
        .add_memory(memory(1, "  Prefers green tea in the morning ", MemoryType::Preference))
        .await
        .data
        .unwrap();
    assert_eq!(stored.content, "Prefers green tea in the morning");
    assert_eq!(stored.access_count, 0);
    // Default TTL is seven days
    let ttl = stored.expires_at - stored.created_at;
    assert_eq!(ttl.num_days(), 7);

    let fetched = h.service.get_memory(1, stored.id).await.data.unwrap();
    assert_eq!(fetched.id, stored.id);
    assert_eq!(fetched.content, stored.content);
    assert_eq!(fetched.memory_type, MemoryType::Preference);
    // Timestamps are stored with millisecond precision
    assert_eq!(
        fetched.expires_at.timestamp_millis(),
        stored.expires_at.timestamp_millis()
    );
    assert_eq!(h.index.ids(MEMORY_COLLECTION), vec![stored.id]);
}

#[tokio::test]
async fn test_search_scores_and_scopes_to_owner() {
    let h = harness().await;

    let tea = h
        .service
        .add_memory(memory(1, "Prefers green tea in the morning", MemoryType::Preference))
        .await
        .data
        .unwrap();
    h.service
        .add_memory(memory(1, "Lives in Berlin", MemoryType::Fact))
        .await
        .data
        .unwrap();
    h.service
        .add_memory(memory(2, "Prefers green tea in the morning", MemoryType::Preference))
        .await
        .data
        .unwrap();

    let hits = h
        .service
        .search_memories(1, "green tea", 5)
        .await
        .data
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].memory.id, tea.id);
    assert!(hits[0].score >= hits[1].score);
    assert!(hits[0].similarity > hits[1].similarity);
    assert!(hits.iter().all(|h| h.memory.user_id == 1));
}

#[tokio::test]
async fn test_search_records_access() {
    let h = harness().await;
    let stored = h
        .service
        .add_memory(memory(1, "Dentist appointment on Friday", MemoryType::Reminder))
        .await
        .data
        .unwrap();

    let hits = h
        .service
        .search_memories(1, "dentist", 3)
        .await
        .data
        .unwrap();
    assert_eq!(hits.len(), 1);

    // Access bookkeeping runs in the background
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    let touched = h.store.get_memory(stored.id).await.unwrap().unwrap();
    assert_eq!(touched.access_count, 1);
    assert!(touched.last_accessed_at >= stored.last_accessed_at);
}

#[tokio::test]
async fn test_expired_memories_hidden_and_swept() {
    let h = harness().await;

    let mut stale = memory(1, "Parked on level three", MemoryType::Context);
    stale.expires_at = Some(Utc::now() - Duration::minutes(1));
    let stale = h.service.add_memory(stale).await.data.unwrap();
    let fresh = h
        .service
        .add_memory(memory(1, "Parked near the exit", MemoryType::Context))
        .await
        .data
        .unwrap();

    assert_eq!(h.service.get_memory(1, stale.id).await.code, CODE_NOT_FOUND);

    let hits = h
        .service
        .search_memories(1, "parked level", 5)
        .await
        .data
        .unwrap();
    assert!(hits.iter().all(|h| h.memory.id != stale.id));

    assert_eq!(h.service.clean_expired_memories().await.data, Some(1));
    assert!(h.store.get_memory(stale.id).await.unwrap().is_none());
    assert_eq!(h.index.ids(MEMORY_COLLECTION), vec![fresh.id]);

    // Nothing left to sweep
    assert_eq!(h.service.clean_expired_memories().await.data, Some(0));
}

#[tokio::test]
async fn test_sweep_keeps_rows_when_vector_delete_fails() {
    let h = harness().await;
    let mut stale = memory(1, "Old context", MemoryType::Context);
    stale.expires_at = Some(Utc::now() - Duration::seconds(5));
    let stale = h.service.add_memory(stale).await.data.unwrap();

    h.index.fail_deletes(true);
    assert_eq!(h.service.clean_expired_memories().await.code, CODE_UNAVAILABLE);
    assert!(h.store.get_memory(stale.id).await.unwrap().is_some());

    h.index.fail_deletes(false);
    assert_eq!(h.service.clean_expired_memories().await.data, Some(1));
}

#[tokio::test]
async fn test_add_rolls_back_row_on_vector_failure() {
    let h = harness().await;
    h.index.fail_inserts(true);

    let resp = h
        .service
        .add_memory(memory(1, "Allergic to peanuts", MemoryType::Fact))
        .await;
    assert_eq!(resp.code, CODE_UNAVAILABLE);
    assert!(h.service.memory_stats(1).await.data.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_add_is_all_or_nothing() {
    let h = harness().await;
    let batch = vec![
        memory(1, "Works as a nurse", MemoryType::Fact),
        memory(1, "Likes hiking", MemoryType::Preference),
        memory(1, "Call mum on Sunday", MemoryType::Reminder),
    ];

    h.index.fail_inserts(true);
    let resp = h.service.batch_add_memories(batch.clone()).await;
    assert_eq!(resp.code, CODE_UNAVAILABLE);
    assert!(h.service.memory_stats(1).await.data.unwrap().is_empty());
    assert!(h.index.ids(MEMORY_COLLECTION).is_empty());

    h.index.fail_inserts(false);
    let stored = h.service.batch_add_memories(batch).await.data.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(h.index.ids(MEMORY_COLLECTION).len(), 3);

    // One invalid entry rejects the whole batch before any write
    let mut bad = vec![
        memory(1, "Fine", MemoryType::Fact),
        memory(1, "Too important", MemoryType::Fact),
    ];
    bad[1].importance = 2.0;
    assert_eq!(
        h.service.batch_add_memories(bad).await.code,
        CODE_INVALID_INPUT
    );
    assert_eq!(h.index.ids(MEMORY_COLLECTION).len(), 3);
}

#[tokio::test]
async fn test_owner_checks() {
    let h = harness().await;
    let mine = h
        .service
        .add_memory(memory(1, "Owns a cat named Miso", MemoryType::Fact))
        .await
        .data
        .unwrap();
    let theirs = h
        .service
        .add_memory(memory(2, "Owns a dog", MemoryType::Fact))
        .await
        .data
        .unwrap();

    assert_eq!(h.service.get_memory(2, mine.id).await.code, CODE_PERMISSION);
    assert_eq!(h.service.delete_memory(2, mine.id).await.code, CODE_PERMISSION);
    assert_eq!(
        h.service
            .update_memory(2, mine.id, MemoryUpdate::default())
            .await
            .code,
        CODE_PERMISSION
    );

    // Foreign ids in a batch delete are skipped
    let removed = h
        .service
        .batch_delete_memories(1, &[mine.id, theirs.id])
        .await
        .data
        .unwrap();
    assert_eq!(removed, 1);
    assert!(h.store.get_memory(theirs.id).await.unwrap().is_some());
    assert_eq!(h.index.ids(MEMORY_COLLECTION), vec![theirs.id]);
}

#[tokio::test]
async fn test_delete_memory() {
    let h = harness().await;
    let stored = h
        .service
        .add_memory(memory(1, "Birthday is in May", MemoryType::Fact))
        .await
        .data
        .unwrap();

    assert!(h.service.delete_memory(1, stored.id).await.is_ok());
    assert!(h.index.ids(MEMORY_COLLECTION).is_empty());
    assert_eq!(h.service.delete_memory(1, stored.id).await.code, CODE_NOT_FOUND);
}

#[tokio::test]
async fn test_update_reembeds_content() {
    let h = harness().await;
    let stored = h
        .service
        .add_memory(memory(1, "Drives a blue car", MemoryType::Fact))
        .await
        .data
        .unwrap();

    let updated = h
        .service
        .update_memory(
            1,
            stored.id,
            MemoryUpdate {
                content: Some("Rides a red bicycle".to_string()),
                importance: Some(0.9),
                metadata: None,
            },
        )
        .await
        .data
        .unwrap();
    assert_eq!(updated.content, "Rides a red bicycle");
    assert_eq!(updated.importance, 0.9);

    let hits = h
        .service
        .search_memories(1, "red bicycle", 1)
        .await
        .data
        .unwrap();
    assert_eq!(hits[0].memory.id, stored.id);
    assert!(hits[0].similarity > 0.5);
}

#[tokio::test]
async fn test_update_restores_row_on_vector_failure() {
    let h = harness().await;
    let stored = h
        .service
        .add_memory(memory(1, "Drives a blue car", MemoryType::Fact))
        .await
        .data
        .unwrap();

    h.index.fail_inserts(true);
    let resp = h
        .service
        .update_memory(
            1,
            stored.id,
            MemoryUpdate {
                content: Some("Sold the car".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert_eq!(resp.code, CODE_UNAVAILABLE);

    let current = h.store.get_memory(stored.id).await.unwrap().unwrap();
    assert_eq!(current.content, "Drives a blue car");

    // The stored embedding still belongs to the restored content
    let embedding = h.store.memory_embedding(stored.id).await.unwrap();
    assert_eq!(embedding, Some(h.embedder.vectorize("Drives a blue car")));
}

#[tokio::test]
async fn test_stats_and_related() {
    let h = harness().await;
    let mut first = memory(1, "Speaks Spanish", MemoryType::Fact);
    first.importance = 0.4;
    let first = h.service.add_memory(first).await.data.unwrap();

    let mut second = memory(1, "Studied physics", MemoryType::Fact);
    second.importance = 0.8;
    let second = h.service.add_memory(second).await.data.unwrap();

    h.service
        .add_memory(memory(1, "Prefers short answers", MemoryType::Preference))
        .await
        .data
        .unwrap();

    let stats = h.service.memory_stats(1).await.data.unwrap();
    let facts = stats
        .iter()
        .find(|s| s.memory_type == MemoryType::Fact)
        .unwrap();
    assert_eq!(facts.count, 2);
    assert!((facts.avg_importance - 0.6).abs() < 1e-6);
    assert_eq!(stats.len(), 2);

    let related = h
        .service
        .related_memories(1, first.id, 10)
        .await
        .data
        .unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].id, second.id);

    let mut lapsed = memory(1, "Lived in Lisbon", MemoryType::Fact);
    lapsed.importance = 1.0;
    lapsed.expires_at = Some(Utc::now() - Duration::minutes(1));
    h.service.add_memory(lapsed).await.data.unwrap();

    // Expired rows count for neither stats nor related until swept
    let stats = h.service.memory_stats(1).await.data.unwrap();
    let facts = stats
        .iter()
        .find(|s| s.memory_type == MemoryType::Fact)
        .unwrap();
    assert_eq!(facts.count, 2);
    let related = h
        .service
        .related_memories(1, first.id, 10)
        .await
        .data
        .unwrap();
    assert_eq!(related.iter().map(|m| m.id).collect::<Vec<_>>(), vec![second.id]);
}

#[tokio::test]
async fn test_sweeper_removes_expired_until_stopped() {
    let h = harness().await;
    let mut stale = memory(1, "Temporary note", MemoryType::Context);
    stale.expires_at = Some(Utc::now() - Duration::seconds(1));
    let stale = h.service.add_memory(stale).await.data.unwrap();

    let sweeper = h
        .service
        .memories()
        .spawn_sweeper(StdDuration::from_millis(20));
    tokio::time::sleep(StdDuration::from_millis(150)).await;

    assert!(h.store.get_memory(stale.id).await.unwrap().is_none());
    assert!(!sweeper.is_finished());
    sweeper.stop().await;
}

#[tokio::test]
async fn test_new_memory_defaults() {
    let h = harness().await;
    let stored = h
        .service
        .add_memory(NewMemory::new(3, "Standup at 9am", MemoryType::Reminder))
        .await
        .data
        .unwrap();
    assert_eq!(stored.importance, MemoryType::Reminder.default_importance());
    assert_eq!(stored.session_id, 0);
}
