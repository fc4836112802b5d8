
use async_trait::async_trait;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::{
    BackendKind, ScoredChunk, SearchBackend, cosine_similarity, rank, similarity_from_distance,
    sql_limit,
};
use crate::database::sqlite::models::{DistanceRow, decode_vector, encode_vector, vector_norm};
use crate::database::sqlite::queries::{
    CHUNK_COLUMNS, ChunkQueries, EmbeddingQueries, StoreMetaQueries,
};
use crate::{RagError, Result};

/// Largest `k` the `vec0` k-NN query accepts; larger requests fall back to a scored scan
pub const KNN_MAX_K: usize = 4096;

/// Maximum disagreement between the extension's `1 - cosine distance` and
/// [`cosine_similarity`] accepted by the startup probe
pub const IDENTITY_TOLERANCE: f64 = 1e-4;

/// Probe pairs covering identical, orthogonal, opposite and partially aligned vectors
const PROBE_PAIRS: [([f32; 3], [f32; 3]); 4] = [
    ([1.0, 0.0, 0.0], [1.0, 0.0, 0.0]),
    ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([1.0, 2.0, 3.0], [-1.0, -2.0, -3.0]),
    ([3.0, 4.0, 0.0], [4.0, 3.0, 0.0]),
];

/// k-NN search through a sqlite-vec `vec0` virtual table keyed by chunk id.
///
/// Zero-norm vectors have no defined cosine distance and are kept out of the
/// virtual table; they are merged into results with similarity 0.
#[derive(Debug, Clone)]
pub struct SqliteVecBackend {
    dimension: usize,
}

impl SqliteVecBackend {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Check that the extension is loaded and that its cosine distance is
    /// exactly `1 - cosine similarity` on known vectors.
    ///
    /// # Returns
    /// * The extension version string on success
    #[inline]
    pub async fn probe(conn: &mut SqliteConnection) -> Result<String> {
        let version = sqlx::query_scalar::<_, String>("SELECT vec_version()")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| RagError::Storage(format!("sqlite-vec is not available: {}", e)))?;

        for (a, b) in PROBE_PAIRS {
            let distance = sqlx::query_scalar::<_, Option<f64>>("SELECT vec_distance_cosine(?, ?)")
                .bind(encode_vector(&a))
                .bind(encode_vector(&b))
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    RagError::Storage(format!("sqlite-vec distance probe failed: {}", e))
                })?;

            let native = distance.map(|d| 1.0 - d);
            let expected = f64::from(cosine_similarity(&a, &b));
            match native {
                Some(similarity) if (similarity - expected).abs() <= IDENTITY_TOLERANCE => {}
                _ => {
                    return Err(RagError::Storage(format!(
                        "sqlite-vec {} cosine distance disagrees with cosine similarity: \
                         1 - distance = {:?}, expected {:.6}",
                        version, native, expected
                    )));
                }
            }
        }

        debug!("sqlite-vec {} passed the distance identity probe", version);
        Ok(version)
    }

    async fn table_exists(conn: &mut SqliteConnection) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'vec_chunks')",
        )
        .fetch_one(conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to inspect schema: {}", e)))?;

        Ok(exists)
    }

    async fn insert_vector(conn: &mut SqliteConnection, chunk_id: &str, vector: &[f32]) -> Result<()> {
        sqlx::query("INSERT INTO vec_chunks (chunk_id, embedding) VALUES (?, ?)")
            .bind(chunk_id)
            .bind(encode_vector(vector))
            .execute(conn)
            .await
            .map_err(|e| {
                RagError::Storage(format!(
                    "Failed to index vector for chunk {}: {}",
                    chunk_id, e
                ))
            })?;

        Ok(())
    }

    async fn delete_vector(conn: &mut SqliteConnection, chunk_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vec_chunks WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(conn)
            .await
            .map_err(|e| {
                RagError::Storage(format!(
                    "Failed to remove vector for chunk {}: {}",
                    chunk_id, e
                ))
            })?;

        Ok(())
    }

    /// Repopulate the virtual table from the embeddings table
    async fn rebuild(&self, conn: &mut SqliteConnection) -> Result<usize> {
        sqlx::query("DELETE FROM vec_chunks")
            .execute(&mut *conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to reset vector index: {}", e)))?;

        let mut indexed = 0;
        for stored in EmbeddingQueries::list_all(conn).await? {
            if stored.norm == 0.0 {
                continue;
            }
            let vector = decode_vector(&stored.vector)?;
            if vector.len() != self.dimension {
                return Err(RagError::Storage(format!(
                    "Stored embedding for chunk {} has {} dimensions, expected {}",
                    stored.chunk_id,
                    vector.len(),
                    self.dimension
                )));
            }
            Self::insert_vector(conn, &stored.chunk_id, &vector).await?;
            indexed += 1;
        }

        Ok(indexed)
    }

    async fn knn(&self, conn: &mut SqliteConnection, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            r#"
            WITH knn AS (
                SELECT chunk_id, distance FROM vec_chunks
                WHERE embedding MATCH ?1 AND k = ?2
            )
            SELECT {}, knn.distance AS distance
            FROM knn JOIN chunks c ON c.id = knn.chunk_id
            "#,
            CHUNK_COLUMNS
        );

        let rows = sqlx::query_as::<_, DistanceRow>(&sql)
            .bind(encode_vector(query))
            .bind(sql_limit(k))
            .fetch_all(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Vector k-NN query failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.chunk, similarity_from_distance(row.distance)))
            .collect())
    }

    async fn scan(
        &self,
        conn: &mut SqliteConnection,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            r#"
            SELECT {}, vec_distance_cosine(v.embedding, ?1) AS distance
            FROM chunks c JOIN vec_chunks v ON v.chunk_id = c.id
            WHERE (?2 IS NULL OR c.document_id = ?2)
            ORDER BY distance, c.rowid
            LIMIT ?3
            "#,
            CHUNK_COLUMNS
        );

        let rows = sqlx::query_as::<_, DistanceRow>(&sql)
            .bind(encode_vector(query))
            .bind(document_id)
            .bind(sql_limit(k))
            .fetch_all(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Vector distance query failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.chunk, similarity_from_distance(row.distance)))
            .collect())
    }
}

#[async_trait]
impl SearchBackend for SqliteVecBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SqliteVec
    }

    async fn prepare(&self, conn: &mut SqliteConnection) -> Result<()> {
        let existed = Self::table_exists(conn).await?;

        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(chunk_id TEXT PRIMARY KEY, embedding float[{}] distance_metric=cosine)",
            self.dimension
        ))
        .execute(&mut *conn)
        .await
        .map_err(|e| RagError::Storage(format!("Failed to create vector index: {}", e)))?;

        let stale = StoreMetaQueries::get(conn, StoreMetaQueries::VECTOR_INDEX_STALE_KEY)
            .await?
            .is_some();

        if stale || !existed {
            let indexed = self.rebuild(conn).await?;
            StoreMetaQueries::remove(conn, StoreMetaQueries::VECTOR_INDEX_STALE_KEY).await?;
            info!("Rebuilt sqlite-vec index with {} vectors", indexed);
        }

        Ok(())
    }

    async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        chunk_id: &str,
        vector: &[f32],
    ) -> Result<()> {
        // vec0 has no upsert
        Self::delete_vector(conn, chunk_id).await?;
        if vector_norm(vector) > 0.0 {
            Self::insert_vector(conn, chunk_id, vector).await?;
        }
        Ok(())
    }

    async fn remove_document(&self, conn: &mut SqliteConnection, document_id: &str) -> Result<()> {
        for chunk_id in ChunkQueries::ids_for_document(conn, document_id).await? {
            Self::delete_vector(conn, &chunk_id).await?;
        }
        Ok(())
    }

    async fn clear(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DELETE FROM vec_chunks")
            .execute(conn)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to clear vector index: {}", e)))?;
        Ok(())
    }

    async fn search(
        &self,
        conn: &mut SqliteConnection,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>> {
        let mut scored = if document_id.is_none() && k <= KNN_MAX_K {
            self.knn(conn, query, k).await?
        } else {
            self.scan(conn, query, k, document_id).await?
        };

        let zero_norm = EmbeddingQueries::zero_norm_chunks(conn, document_id, sql_limit(k)).await?;
        scored.extend(zero_norm.into_iter().map(|row| (row, 0.0)));

        debug!("sqlite-vec search produced {} candidates", scored.len());
        rank(&mut scored, k);
        Ok(scored)
    }
}
