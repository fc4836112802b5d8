#[cfg(test)]
mod tests;

use super::models::*;
use crate::database::{Chunk, DocumentStats};
use crate::{RagError, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

pub(crate) const CHUNK_COLUMNS: &str = "c.rowid AS seq, c.id, c.document_id, c.chunk_index, c.content, c.metadata";

pub struct ChunkQueries;

impl ChunkQueries {
    /// Insert a chunk or replace the text/metadata of an existing chunk with the same id.
    ///
    /// The row keeps its original rowid on replace, so insertion order is stable
    /// across reindexing.
    #[inline]
    pub async fn upsert(conn: &mut SqliteConnection, chunk: &Chunk) -> Result<()> {
        let metadata = serde_json::to_string(&chunk.metadata)?;
        let chunk_index = i64::try_from(chunk.index).map_err(|_| {
            RagError::InvalidInput(format!("Chunk index {} is out of range", chunk.index))
        })?;
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, content, metadata, indexed_date)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                chunk_index = excluded.chunk_index,
                content = excluded.content,
                metadata = excluded.metadata,
                indexed_date = excluded.indexed_date
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk_index)
        .bind(&chunk.content)
        .bind(metadata)
        .bind(now)
        .execute(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to upsert chunk {}: {}", chunk.id, e)))?;

        Ok(())
    }

    #[inline]
    pub async fn get_by_id(conn: &mut SqliteConnection, id: &str) -> Result<Option<ChunkRow>> {
        let query = format!("SELECT {} FROM chunks c WHERE c.id = ?", CHUNK_COLUMNS);
        let row = sqlx::query_as::<_, ChunkRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to get chunk by id: {}", e)))?;

        Ok(row)
    }

    #[inline]
    pub async fn ids_for_document(
        conn: &mut SqliteConnection,
        document_id: &str,
    ) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM chunks WHERE document_id = ? ORDER BY rowid",
        )
        .bind(document_id)
        .fetch_all(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to list chunk ids: {}", e)))?;

        Ok(ids)
    }

    /// Chunks in insertion order, optionally restricted to one document
    #[inline]
    pub async fn list_in_order(
        conn: &mut SqliteConnection,
        document_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ChunkRow>> {
        let query = format!(
            "SELECT {} FROM chunks c WHERE (?1 IS NULL OR c.document_id = ?1) ORDER BY c.rowid LIMIT ?2",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChunkRow>(&query)
            .bind(document_id)
            .bind(limit)
            .fetch_all(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to list chunks: {}", e)))?;

        Ok(rows)
    }

    /// Delete every chunk of a document; embeddings follow through the foreign key cascade
    #[inline]
    pub async fn delete_by_document(
        conn: &mut SqliteConnection,
        document_id: &str,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to delete document chunks: {}", e)))?;

        debug!(
            "Deleted {} chunks for document {}",
            result.rows_affected(),
            document_id
        );
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn delete_all(conn: &mut SqliteConnection) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks")
            .execute(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to clear chunks: {}", e)))?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn list_document_ids(conn: &mut SqliteConnection) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT document_id FROM chunks ORDER BY document_id",
        )
        .fetch_all(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to list documents: {}", e)))?;

        Ok(ids)
    }

    #[inline]
    pub async fn document_stats(
        conn: &mut SqliteConnection,
        document_id: &str,
    ) -> Result<DocumentStats> {
        let (chunk_count, total_chars): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(content)), 0) FROM chunks WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_one(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to get document stats: {}", e)))?;

        Ok(DocumentStats {
            chunk_count: chunk_count.unsigned_abs(),
            total_chars: total_chars.unsigned_abs(),
        })
    }

    /// Per-document summaries, ordered by document id
    #[inline]
    pub async fn list_document_summaries(
        conn: &mut SqliteConnection,
    ) -> Result<Vec<DocumentSummary>> {
        let rows: Vec<(String, i64, i64, Option<NaiveDateTime>)> = sqlx::query_as(
            r#"
            SELECT document_id,
                   COUNT(*),
                   COALESCE(SUM(LENGTH(content)), 0),
                   MAX(indexed_date)
            FROM chunks
            GROUP BY document_id
            ORDER BY document_id
            "#,
        )
        .fetch_all(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to summarize documents: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(
                |(document_id, chunk_count, total_chars, last_indexed)| DocumentSummary {
                    document_id,
                    chunk_count,
                    total_chars,
                    last_indexed,
                },
            )
            .collect())
    }

    #[inline]
    pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks")
            .fetch_one(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to count chunks: {}", e)))?;

        Ok(count)
    }
}

pub struct EmbeddingQueries;

impl EmbeddingQueries {
    #[inline]
    pub async fn upsert(
        conn: &mut SqliteConnection,
        chunk_id: &str,
        vector: &[f32],
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, vector, norm) VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET vector = excluded.vector, norm = excluded.norm
            "#,
        )
        .bind(chunk_id)
        .bind(encode_vector(vector))
        .bind(vector_norm(vector))
        .execute(conn)
        .await
        .map_err(|e| {
            RagError::Storage(format!(
                "Failed to upsert embedding for chunk {}: {}",
                chunk_id, e
            ))
        })?;

        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn get(
        conn: &mut SqliteConnection,
        chunk_id: &str,
    ) -> Result<Option<StoredEmbedding>> {
        let row = sqlx::query_as::<_, StoredEmbedding>(
            "SELECT chunk_id, vector, norm FROM embeddings WHERE chunk_id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to get embedding: {}", e)))?;

        Ok(row)
    }

    #[inline]
    pub async fn list_all(conn: &mut SqliteConnection) -> Result<Vec<StoredEmbedding>> {
        let rows = sqlx::query_as::<_, StoredEmbedding>(
            "SELECT e.chunk_id, e.vector, e.norm FROM embeddings e JOIN chunks c ON c.id = e.chunk_id ORDER BY c.rowid",
        )
        .fetch_all(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to list embeddings: {}", e)))?;

        Ok(rows)
    }

    /// Chunks whose stored vector has zero norm, in insertion order
    #[inline]
    pub async fn zero_norm_chunks(
        conn: &mut SqliteConnection,
        document_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ChunkRow>> {
        let query = format!(
            r#"
            SELECT {} FROM chunks c JOIN embeddings e ON e.chunk_id = c.id
            WHERE e.norm = 0 AND (?1 IS NULL OR c.document_id = ?1)
            ORDER BY c.rowid LIMIT ?2
            "#,
            CHUNK_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChunkRow>(&query)
            .bind(document_id)
            .bind(limit)
            .fetch_all(conn)
            .await
            .map_err(|e| {
                RagError::Storage(format!("Failed to list zero-norm embeddings: {}", e))
            })?;

        Ok(rows)
    }

    #[inline]
    pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM embeddings")
            .fetch_one(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to count embeddings: {}", e)))?;

        Ok(count)
    }
}

pub struct StoreMetaQueries;

impl StoreMetaQueries {
    pub const DIMENSION_KEY: &'static str = "dimension";
    pub const VECTOR_INDEX_STALE_KEY: &'static str = "vector_index_stale";

    #[inline]
    pub async fn get(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM store_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to read store setting {}: {}", key, e)))?;

        Ok(value)
    }

    #[inline]
    pub async fn set(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO store_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to write store setting {}: {}", key, e)))?;

        Ok(())
    }

    #[inline]
    pub async fn remove(conn: &mut SqliteConnection, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM store_meta WHERE key = ?")
            .bind(key)
            .execute(conn)
            .await
            .map_err(|e| {
                RagError::Storage(format!("Failed to remove store setting {}: {}", key, e))
            })?;

        Ok(())
    }

    /// Record the store dimensionality on first use and reject a different one afterwards
    #[inline]
    pub async fn ensure_dimension(conn: &mut SqliteConnection, dimension: usize) -> Result<()> {
        match Self::get(conn, Self::DIMENSION_KEY).await? {
            Some(stored) => {
                let expected = stored.parse::<usize>().map_err(|_| {
                    RagError::Storage(format!("Corrupt stored dimension: {}", stored))
                })?;
                if expected != dimension {
                    return Err(RagError::DimensionMismatch {
                        expected,
                        actual: dimension,
                    });
                }
                Ok(())
            }
            None => {
                Self::set(conn, Self::DIMENSION_KEY, &dimension.to_string()).await?;
                debug!("Recorded store dimension {}", dimension);
                Ok(())
            }
        }
    }
}
