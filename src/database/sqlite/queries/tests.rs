use super::*;
use crate::attributes::AttributeValue;
use crate::database::sqlite::Database;
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database = Database::new(temp_dir.path().join("test.db"))
        .await
        .expect("Failed to create test database");
    (temp_dir, database.pool().clone())
}

fn new_document(source_id: &str) -> NewDocument {
    let mut attributes = crate::attributes::Attributes::new();
    attributes.insert("owner".to_string(), AttributeValue::from("ops"));
    NewDocument {
        source_id: source_id.to_string(),
        title: format!("Title of {}", source_id),
        content: "Some document body".to_string(),
        attributes,
    }
}

fn new_chunk(chunk_index: i64) -> NewChunk {
    NewChunk {
        chunk_index,
        content: format!("chunk {}", chunk_index),
        embedding: vec![0.5, -0.25, 1.0],
        attributes: Default::default(),
    }
}

#[tokio::test]
async fn only_one_staging_generation_at_a_time() {
    let (_temp_dir, pool) = create_test_pool().await;

    let first = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine)
        .await
        .expect("first staging generation should be created");
    assert!(first.is_staging());
    assert_eq!(first.distance_metric, "cosine");

    let second = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine).await;
    assert!(matches!(second, Err(RagError::SyncInProgress)));

    GenerationQueries::mark_failed(&pool, first.id, "boom")
        .await
        .expect("mark failed should succeed");
    let third = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine).await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn activate_swaps_pointer_and_removes_other_generations() {
    let (_temp_dir, pool) = create_test_pool().await;

    let old = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine)
        .await
        .expect("create staging");
    let old_doc = DocumentQueries::insert(&pool, old.id, &new_document("a"))
        .await
        .expect("insert document");
    ChunkQueries::insert(&pool, old_doc, &new_chunk(0))
        .await
        .expect("insert chunk");

    let mut conn = pool.acquire().await.expect("acquire connection");
    GenerationQueries::activate(&mut conn, old.id)
        .await
        .expect("activate old generation");
    drop(conn);

    let active = GenerationQueries::get_active(&pool)
        .await
        .expect("get active")
        .expect("active generation should exist");
    assert_eq!(active.id, old.id);
    assert!(active.is_active());
    assert!(active.committed_at.is_some());

    let new = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine)
        .await
        .expect("create staging");
    DocumentQueries::insert(&pool, new.id, &new_document("b"))
        .await
        .expect("insert document");

    let mut transaction = pool.begin().await.expect("begin transaction");
    GenerationQueries::activate(&mut transaction, new.id)
        .await
        .expect("activate new generation");
    transaction.commit().await.expect("commit");

    let generations = GenerationQueries::list_all(&pool).await.expect("list");
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0].id, new.id);

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .expect("count chunks");
    assert_eq!(chunk_count, 0);
}

#[tokio::test]
async fn activate_rejects_non_staging_generation() {
    let (_temp_dir, pool) = create_test_pool().await;

    let generation = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine)
        .await
        .expect("create staging");
    GenerationQueries::mark_failed(&pool, generation.id, "cancelled")
        .await
        .expect("mark failed");

    let mut conn = pool.acquire().await.expect("acquire connection");
    let result = GenerationQueries::activate(&mut conn, generation.id).await;
    assert!(matches!(result, Err(RagError::Storage(_))));
}

#[tokio::test]
async fn touch_and_mark_failed_only_affect_staging() {
    let (_temp_dir, pool) = create_test_pool().await;

    let generation = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine)
        .await
        .expect("create staging");

    assert!(GenerationQueries::touch(&pool, generation.id).await.expect("touch"));
    assert!(
        GenerationQueries::mark_failed(&pool, generation.id, "provider down")
            .await
            .expect("mark failed")
    );
    assert!(!GenerationQueries::touch(&pool, generation.id).await.expect("touch"));
    assert!(
        !GenerationQueries::mark_failed(&pool, generation.id, "again")
            .await
            .expect("mark failed")
    );

    let stored = GenerationQueries::get_by_id(&pool, generation.id)
        .await
        .expect("get by id")
        .expect("generation should exist");
    assert_eq!(stored.status, GenerationStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("provider down"));

    let purged = GenerationQueries::purge_failed(&pool).await.expect("purge");
    assert_eq!(purged, 1);
    assert!(GenerationQueries::get_staging(&pool).await.expect("get staging").is_none());
}

#[tokio::test]
async fn duplicate_source_id_in_one_generation_is_rejected() {
    let (_temp_dir, pool) = create_test_pool().await;

    let generation = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine)
        .await
        .expect("create staging");
    DocumentQueries::insert(&pool, generation.id, &new_document("dup"))
        .await
        .expect("first insert");

    let result = DocumentQueries::insert(&pool, generation.id, &new_document("dup")).await;
    match result {
        Err(RagError::Storage(message)) => assert!(message.contains("dup")),
        other => panic!("expected storage error, got {:?}", other),
    }
}

#[tokio::test]
async fn documents_and_chunks_round_trip() {
    let (_temp_dir, pool) = create_test_pool().await;

    let generation = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine)
        .await
        .expect("create staging");
    let document_id = DocumentQueries::insert(&pool, generation.id, &new_document("doc"))
        .await
        .expect("insert document");
    for index in 0..3 {
        ChunkQueries::insert(&pool, document_id, &new_chunk(index))
            .await
            .expect("insert chunk");
    }

    let document = DocumentQueries::get_by_source_id(&pool, generation.id, "doc")
        .await
        .expect("get document")
        .expect("document should exist");
    assert_eq!(document.title, "Title of doc");
    assert_eq!(document.attributes.0["owner"], AttributeValue::from("ops"));

    let chunks = ChunkQueries::list_for_generation(&pool, generation.id)
        .await
        .expect("list chunks");
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.source_id == "doc"));
    assert_eq!(
        chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(chunks[0].embedding.len(), 12);

    assert_eq!(
        ChunkQueries::list_for_document(&pool, document_id)
            .await
            .expect("list for document")
            .len(),
        3
    );
    assert_eq!(
        DocumentQueries::count_for_generation(&pool, generation.id)
            .await
            .expect("count documents"),
        1
    );
    assert_eq!(
        ChunkQueries::count_for_generation(&pool, generation.id)
            .await
            .expect("count chunks"),
        3
    );
    assert_eq!(
        DocumentQueries::list_for_generation(&pool, generation.id)
            .await
            .expect("list documents")
            .len(),
        1
    );
}

#[tokio::test]
async fn chunk_index_is_unique_per_document() {
    let (_temp_dir, pool) = create_test_pool().await;

    let generation = GenerationQueries::create_staging(&pool, 3, DistanceMetric::Cosine)
        .await
        .expect("create staging");
    let document_id = DocumentQueries::insert(&pool, generation.id, &new_document("doc"))
        .await
        .expect("insert document");
    ChunkQueries::insert(&pool, document_id, &new_chunk(0))
        .await
        .expect("insert chunk");

    let result = ChunkQueries::insert(&pool, document_id, &new_chunk(0)).await;
    assert!(matches!(result, Err(RagError::Storage(_))));
}
