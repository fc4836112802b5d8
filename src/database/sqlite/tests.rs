use super::*;
use crate::database::Chunk;
use crate::database::sqlite::queries::{ChunkQueries, EmbeddingQueries};
use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::initialize_from_base_dir(temp_dir.path(), 2, None).await?;
    Ok((temp_dir, database))
}

#[tokio::test]
async fn integration_schema_migration() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> =
        ["store_meta", "chunks", "embeddings", "_sqlx_migrations"]
            .into_iter()
            .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);
    assert!(database.vector_extension().is_none());

    Ok(())
}

#[tokio::test]
async fn integration_store_file_location() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let base_dir = temp_dir.path().join("nested").join("base");

    let database = Database::initialize_from_base_dir(&base_dir, 1, None).await?;
    assert!(base_dir.join(STORE_FILE_NAME).exists());
    database.close().await;

    Ok(())
}

#[tokio::test]
async fn integration_foreign_key_constraints() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let mut conn = database.pool().acquire().await?;

    let chunk = Chunk::new("doc", 0, "content");
    ChunkQueries::upsert(&mut conn, &chunk).await?;
    EmbeddingQueries::upsert(&mut conn, &chunk.id, &[0.5, 0.5]).await?;

    assert!(EmbeddingQueries::upsert(&mut conn, "doc-9", &[0.5, 0.5]).await.is_err());

    ChunkQueries::delete_by_document(&mut conn, "doc").await?;
    assert_eq!(EmbeddingQueries::count(&mut conn).await?, 0);

    Ok(())
}

#[tokio::test]
async fn integration_reopen_keeps_data() -> Result<()> {
    let temp_dir = TempDir::new()?;

    {
        let database = Database::initialize_from_base_dir(temp_dir.path(), 1, None).await?;
        let mut conn = database.pool().acquire().await?;
        ChunkQueries::upsert(&mut conn, &Chunk::new("kept", 0, "persisted")).await?;
        drop(conn);
        database.close().await;
        assert!(database.is_closed());
    }

    let database = Database::initialize_from_base_dir(temp_dir.path(), 1, None).await?;
    let mut conn = database.pool().acquire().await?;
    assert_eq!(ChunkQueries::count(&mut conn).await?, 1);

    Ok(())
}

#[tokio::test]
async fn integration_optimize() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database.optimize().await?;
    Ok(())
}

#[tokio::test]
async fn missing_extension_fails_to_open() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let result = Database::with_vector_extension(
        temp_dir.path().join(STORE_FILE_NAME),
        1,
        "definitely_not_a_sqlite_extension",
    )
    .await;

    assert!(matches!(result, Err(RagError::Storage(_))));
    Ok(())
}

#[tokio::test]
async fn bundled_vector_extension_registers_on_every_connection() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let database = Database::with_vector_extension(
        temp_dir.path().join(STORE_FILE_NAME),
        2,
        BUNDLED_VECTOR_EXTENSION,
    )
    .await?;
    assert_eq!(database.vector_extension(), Some(BUNDLED_VECTOR_EXTENSION));

    let mut first = database.pool().acquire().await?;
    let mut second = database.pool().acquire().await?;
    for conn in [&mut first, &mut second] {
        let version: String = sqlx::query_scalar("SELECT vec_version()")
            .fetch_one(&mut **conn)
            .await?;
        assert!(version.starts_with('v'));
    }

    let plain = Database::new(temp_dir.path().join("plain.db"), 1).await?;
    let result: std::result::Result<String, _> = sqlx::query_scalar("SELECT vec_version()")
        .fetch_one(plain.pool())
        .await;
    assert!(result.is_err());
    Ok(())
}
