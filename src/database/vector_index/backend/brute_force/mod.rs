use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::SqliteConnection;
use tracing::debug;

use super::{BackendKind, ScoredChunk, SearchBackend, cosine_with_norms, rank};
use crate::database::sqlite::models::{EmbeddedChunkRow, decode_vector, vector_norm};
use crate::database::sqlite::queries::{CHUNK_COLUMNS, StoreMetaQueries};
use crate::{RagError, Result};

/// Exact search by scanning every stored embedding
#[derive(Debug, Clone)]
pub struct BruteForceBackend {
    dimension: usize,
}

impl BruteForceBackend {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Any native index left on disk no longer matches the embeddings table
    async fn mark_native_index_stale(conn: &mut SqliteConnection) -> Result<()> {
        StoreMetaQueries::set(conn, StoreMetaQueries::VECTOR_INDEX_STALE_KEY, "1").await
    }
}

#[async_trait]
impl SearchBackend for BruteForceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::BruteForce
    }

    async fn prepare(&self, _conn: &mut SqliteConnection) -> Result<()> {
        Ok(())
    }

    async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        _chunk_id: &str,
        _vector: &[f32],
    ) -> Result<()> {
        Self::mark_native_index_stale(conn).await
    }

    async fn remove_document(&self, conn: &mut SqliteConnection, _document_id: &str) -> Result<()> {
        Self::mark_native_index_stale(conn).await
    }

    async fn clear(&self, conn: &mut SqliteConnection) -> Result<()> {
        Self::mark_native_index_stale(conn).await
    }

    async fn search(
        &self,
        conn: &mut SqliteConnection,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            r#"
            SELECT {}, e.vector, e.norm
            FROM chunks c JOIN embeddings e ON e.chunk_id = c.id
            WHERE (?1 IS NULL OR c.document_id = ?1)
            ORDER BY c.rowid
            "#,
            CHUNK_COLUMNS
        );

        let query_norm = vector_norm(query);
        let mut scored = Vec::new();
        let mut rows = sqlx::query_as::<_, EmbeddedChunkRow>(&sql)
            .bind(document_id)
            .fetch(&mut *conn);

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| RagError::Storage(format!("Failed to scan embeddings: {}", e)))?
        {
            let vector = decode_vector(&row.vector)?;
            if vector.len() != self.dimension {
                return Err(RagError::Storage(format!(
                    "Stored embedding for chunk {} has {} dimensions, expected {}",
                    row.chunk.id,
                    vector.len(),
                    self.dimension
                )));
            }

            let similarity = cosine_with_norms(query, query_norm, &vector, row.norm);
            scored.push((row.chunk, similarity));
        }

        debug!("Brute-force scan scored {} candidates", scored.len());
        rank(&mut scored, k);
        Ok(scored)
    }
}
