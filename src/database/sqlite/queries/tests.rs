use super::*;
use crate::database::{HEADING_KEY, Metadata};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::raw_sql(include_str!("../migrations/001_initial_schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
}

fn chunk(document_id: &str, index: usize, content: &str) -> Chunk {
    Chunk::new(document_id, index, content)
}

#[tokio::test]
async fn chunk_upsert_and_lookup() {
    let (_temp_dir, pool) = create_test_pool().await;
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");

    let mut metadata = Metadata::new();
    metadata.insert(HEADING_KEY.to_string(), "Intro".into());
    let first = chunk("guide", 0, "First chunk").with_metadata(metadata);

    ChunkQueries::upsert(&mut conn, &first)
        .await
        .expect("Failed to insert chunk");

    let row = ChunkQueries::get_by_id(&mut conn, "guide-0")
        .await
        .expect("Failed to get chunk")
        .expect("Chunk should exist");
    assert_eq!(row.content, "First chunk");
    let original_seq = row.seq;

    let stored = row.into_chunk().expect("valid row converts");
    assert_eq!(stored, first);

    let replacement = chunk("guide", 0, "Rewritten chunk");
    ChunkQueries::upsert(&mut conn, &replacement)
        .await
        .expect("Failed to replace chunk");

    let row = ChunkQueries::get_by_id(&mut conn, "guide-0")
        .await
        .expect("Failed to get chunk")
        .expect("Chunk should exist");
    assert_eq!(row.content, "Rewritten chunk");
    assert_eq!(row.metadata, "{}");
    assert_eq!(row.seq, original_seq, "replace keeps insertion position");
    assert_eq!(ChunkQueries::count(&mut conn).await.expect("count"), 1);

    assert!(
        ChunkQueries::get_by_id(&mut conn, "missing-0")
            .await
            .expect("Failed to get chunk")
            .is_none()
    );
}

#[tokio::test]
async fn document_listing_and_stats() {
    let (_temp_dir, pool) = create_test_pool().await;
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");

    for (doc, index, content) in [
        ("zeta", 0, "abc"),
        ("alpha", 0, "hello"),
        ("alpha", 1, "world!"),
    ] {
        ChunkQueries::upsert(&mut conn, &chunk(doc, index, content))
            .await
            .expect("Failed to insert chunk");
    }

    let documents = ChunkQueries::list_document_ids(&mut conn)
        .await
        .expect("Failed to list documents");
    assert_eq!(documents, vec!["alpha".to_string(), "zeta".to_string()]);

    let stats = ChunkQueries::document_stats(&mut conn, "alpha")
        .await
        .expect("Failed to get stats");
    assert_eq!(stats.chunk_count, 2);
    assert_eq!(stats.total_chars, 11);

    let empty = ChunkQueries::document_stats(&mut conn, "unknown")
        .await
        .expect("Failed to get stats");
    assert_eq!(empty, DocumentStats::default());

    let summaries = ChunkQueries::list_document_summaries(&mut conn)
        .await
        .expect("Failed to summarize");
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].document_id, "alpha");
    assert_eq!(summaries[0].chunk_count, 2);
    assert!(summaries[0].last_indexed.is_some());

    let ids = ChunkQueries::ids_for_document(&mut conn, "alpha")
        .await
        .expect("Failed to list ids");
    assert_eq!(ids, vec!["alpha-0".to_string(), "alpha-1".to_string()]);

    let ordered = ChunkQueries::list_in_order(&mut conn, None, 10)
        .await
        .expect("Failed to list chunks");
    let ordered_ids: Vec<&str> = ordered.iter().map(|row| row.id.as_str()).collect();
    assert_eq!(ordered_ids, vec!["zeta-0", "alpha-0", "alpha-1"]);

    let filtered = ChunkQueries::list_in_order(&mut conn, Some("alpha"), 1)
        .await
        .expect("Failed to list chunks");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, "alpha-0");
}

#[tokio::test]
async fn deleting_chunks_cascades_to_embeddings() {
    let (_temp_dir, pool) = create_test_pool().await;
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");

    for (doc, index) in [("a", 0), ("a", 1), ("b", 0)] {
        let chunk = chunk(doc, index, "text");
        ChunkQueries::upsert(&mut conn, &chunk)
            .await
            .expect("Failed to insert chunk");
        EmbeddingQueries::upsert(&mut conn, &chunk.id, &[1.0, 0.0])
            .await
            .expect("Failed to insert embedding");
    }
    assert_eq!(EmbeddingQueries::count(&mut conn).await.expect("count"), 3);

    let deleted = ChunkQueries::delete_by_document(&mut conn, "a")
        .await
        .expect("Failed to delete document");
    assert_eq!(deleted, 2);
    assert_eq!(EmbeddingQueries::count(&mut conn).await.expect("count"), 1);

    let deleted = ChunkQueries::delete_by_document(&mut conn, "a")
        .await
        .expect("Failed to delete document");
    assert_eq!(deleted, 0);

    ChunkQueries::delete_all(&mut conn)
        .await
        .expect("Failed to clear chunks");
    assert_eq!(ChunkQueries::count(&mut conn).await.expect("count"), 0);
    assert_eq!(EmbeddingQueries::count(&mut conn).await.expect("count"), 0);
}

#[tokio::test]
async fn embedding_upsert_stores_vector_and_norm() {
    let (_temp_dir, pool) = create_test_pool().await;
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");

    let first = chunk("doc", 0, "text");
    let second = chunk("doc", 1, "more text");
    for c in [&first, &second] {
        ChunkQueries::upsert(&mut conn, c)
            .await
            .expect("Failed to insert chunk");
    }

    EmbeddingQueries::upsert(&mut conn, &first.id, &[3.0, 4.0])
        .await
        .expect("Failed to insert embedding");
    EmbeddingQueries::upsert(&mut conn, &second.id, &[0.0, 0.0])
        .await
        .expect("Failed to insert embedding");

    let stored = EmbeddingQueries::get(&mut conn, &first.id)
        .await
        .expect("Failed to get embedding")
        .expect("Embedding should exist");
    assert_eq!(decode_vector(&stored.vector).expect("decode"), vec![3.0, 4.0]);
    assert!((stored.norm - 5.0).abs() < 1e-9);

    EmbeddingQueries::upsert(&mut conn, &first.id, &[1.0, 0.0])
        .await
        .expect("Failed to replace embedding");
    let all = EmbeddingQueries::list_all(&mut conn)
        .await
        .expect("Failed to list embeddings");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].chunk_id, first.id);
    assert!((all[0].norm - 1.0).abs() < 1e-9);

    let zero = EmbeddingQueries::zero_norm_chunks(&mut conn, None, 10)
        .await
        .expect("Failed to list zero-norm chunks");
    assert_eq!(zero.len(), 1);
    assert_eq!(zero[0].id, second.id);

    let other_doc = EmbeddingQueries::zero_norm_chunks(&mut conn, Some("other"), 10)
        .await
        .expect("Failed to list zero-norm chunks");
    assert!(other_doc.is_empty());
}

#[tokio::test]
async fn embedding_requires_existing_chunk() {
    let (_temp_dir, pool) = create_test_pool().await;
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");

    let result = EmbeddingQueries::upsert(&mut conn, "ghost-0", &[1.0]).await;
    assert!(matches!(result, Err(RagError::Storage(_))));
}

#[tokio::test]
async fn store_meta_dimension_is_enforced() {
    let (_temp_dir, pool) = create_test_pool().await;
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");

    assert!(
        StoreMetaQueries::get(&mut conn, StoreMetaQueries::DIMENSION_KEY)
            .await
            .expect("Failed to read")
            .is_none()
    );

    StoreMetaQueries::ensure_dimension(&mut conn, 384)
        .await
        .expect("first dimension is recorded");
    StoreMetaQueries::ensure_dimension(&mut conn, 384)
        .await
        .expect("same dimension is accepted");

    let result = StoreMetaQueries::ensure_dimension(&mut conn, 768).await;
    assert!(matches!(
        result,
        Err(RagError::DimensionMismatch {
            expected: 384,
            actual: 768
        })
    ));

    StoreMetaQueries::set(&mut conn, StoreMetaQueries::VECTOR_INDEX_STALE_KEY, "1")
        .await
        .expect("Failed to write");
    assert_eq!(
        StoreMetaQueries::get(&mut conn, StoreMetaQueries::VECTOR_INDEX_STALE_KEY)
            .await
            .expect("Failed to read")
            .as_deref(),
        Some("1")
    );
    StoreMetaQueries::remove(&mut conn, StoreMetaQueries::VECTOR_INDEX_STALE_KEY)
        .await
        .expect("Failed to remove");
    assert!(
        StoreMetaQueries::get(&mut conn, StoreMetaQueries::VECTOR_INDEX_STALE_KEY)
            .await
            .expect("Failed to read")
            .is_none()
    );
}
