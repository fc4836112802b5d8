
pub mod backend;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::{BUNDLED_VECTOR_EXTENSION, BackendPreference, ConfigError, StoreConfig};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{DocumentSummary, vector_norm};
use crate::database::sqlite::queries::{ChunkQueries, EmbeddingQueries, StoreMetaQueries};
use crate::database::{Chunk, DocumentStats, SearchResult};
use crate::{RagError, Result};

pub use backend::{
    BackendKind, BruteForceBackend, SearchBackend, SqliteVecBackend, cosine_similarity,
};

/// Persistent chunk + embedding store with cosine similarity search.
///
/// Bound to a single embedding dimensionality for the life of the store. At
/// open time the sqlite-vec extension is probed and, when it loads and agrees
/// with [`cosine_similarity`], used for k-NN; otherwise every search scans
/// the embeddings table.
#[derive(Debug)]
pub struct VectorIndex {
    database: Database,
    backend: Box<dyn SearchBackend>,
    dimension: usize,
    closed: AtomicBool,
}

impl VectorIndex {
    /// Open (or create) the store at `path`
    ///
    /// # Arguments
    /// * `path` - SQLite file holding chunks, embeddings and the native index
    /// * `dimension` - Embedding dimensionality; must match any existing store
    /// * `config` - Backend preference, extension name and pool size
    ///
    /// # Errors
    /// * `DimensionMismatch` if the store was created with another dimensionality
    /// * `Config` if `sqlite-vec` is required but cannot be loaded or verified
    #[inline]
    pub async fn open<P: AsRef<Path>>(
        path: P,
        dimension: usize,
        config: &StoreConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        if dimension == 0 {
            return Err(RagError::InvalidInput(
                "Embedding dimension must be at least 1".to_string(),
            ));
        }
        config.validate()?;

        let (database, backend): (Database, Box<dyn SearchBackend>) = match config.backend {
            BackendPreference::BruteForce => (
                Self::open_scan_only(path, config).await?,
                Box::new(BruteForceBackend::new(dimension)),
            ),
            BackendPreference::SqliteVec => {
                let database = Self::open_native(path, config).await.map_err(|e| {
                    error!("Required sqlite-vec backend is unavailable: {}", e);
                    RagError::Config(ConfigError::VectorExtensionUnavailable(e.to_string()))
                })?;
                (database, Box::new(SqliteVecBackend::new(dimension)))
            }
            BackendPreference::Auto => match Self::open_native(path, config).await {
                Ok(database) => (database, Box::new(SqliteVecBackend::new(dimension))),
                Err(e) => {
                    warn!(
                        "sqlite-vec unavailable ({}), falling back to brute-force search",
                        e
                    );
                    (
                        Self::open_scan_only(path, config).await?,
                        Box::new(BruteForceBackend::new(dimension)),
                    )
                }
            },
        };

        let index = Self {
            database,
            backend,
            dimension,
            closed: AtomicBool::new(false),
        };

        if let Err(e) = index.initialize().await {
            index.database.close().await;
            return Err(e);
        }

        info!(
            "Vector index opened at {} ({} dimensions, {} backend)",
            path.display(),
            dimension,
            index.backend.kind()
        );
        Ok(index)
    }

    /// Open `store.db` inside `base_dir`, creating the directory if needed
    #[inline]
    pub async fn open_in_dir(
        base_dir: &Path,
        dimension: usize,
        config: &StoreConfig,
    ) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Self::open(
            base_dir.join(crate::database::sqlite::STORE_FILE_NAME),
            dimension,
            config,
        )
        .await
    }

    /// Open for brute-force search. The linked sqlite-vec module is still
    /// registered when possible so a `vec0` table left by an earlier native
    /// open stays readable for `VACUUM`.
    async fn open_scan_only(path: &Path, config: &StoreConfig) -> Result<Database> {
        match Database::with_vector_extension(
            path,
            config.max_connections,
            BUNDLED_VECTOR_EXTENSION,
        )
        .await
        {
            Ok(database) => Ok(database),
            Err(e) => {
                debug!("Opening without the linked sqlite-vec module: {}", e);
                Database::new(path, config.max_connections).await
            }
        }
    }

    async fn open_native(path: &Path, config: &StoreConfig) -> Result<Database> {
        let database = Database::with_vector_extension(
            path,
            config.max_connections,
            &config.vector_extension,
        )
        .await?;

        let probed = match database.pool().acquire().await {
            Ok(mut conn) => SqliteVecBackend::probe(&mut conn).await,
            Err(e) => Err(e.into()),
        };

        match probed {
            Ok(version) => {
                info!("Using sqlite-vec {} for vector search", version);
                Ok(database)
            }
            Err(e) => {
                database.close().await;
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<()> {
        let mut tx = self.database.pool().begin().await?;
        StoreMetaQueries::ensure_dimension(&mut tx, self.dimension).await?;
        self.backend.prepare(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RagError::ClosedStore);
        }
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Store chunks and their embeddings in one transaction.
    ///
    /// `vectors[i]` belongs to `chunks[i]`. Existing chunk ids are replaced.
    /// Nothing is written if any input is rejected or any write fails.
    #[inline]
    pub async fn add_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        self.ensure_open()?;

        if chunks.len() != vectors.len() {
            return Err(RagError::InvalidInput(format!(
                "Got {} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        for vector in vectors {
            self.check_dimension(vector)?;
        }
        if let Some(chunk) = chunks.iter().find(|c| c.id.is_empty() || c.document_id.is_empty()) {
            return Err(RagError::InvalidInput(format!(
                "Chunk {:?} of document {:?} has an empty identifier",
                chunk.id, chunk.document_id
            )));
        }
        for chunk in chunks {
            if let Some((key, _)) = chunk.metadata.iter().find(|(_, value)| !value.is_finite()) {
                return Err(RagError::InvalidInput(format!(
                    "Metadata {:?} of chunk {} holds a non-finite number",
                    key, chunk.id
                )));
            }
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.database.pool().begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            ChunkQueries::upsert(&mut tx, chunk).await?;
            EmbeddingQueries::upsert(&mut tx, &chunk.id, vector).await?;
            self.backend.upsert(&mut tx, &chunk.id, vector).await?;
        }
        tx.commit().await?;

        debug!("Stored {} chunks", chunks.len());
        Ok(())
    }

    /// Up to `k` chunks ordered by cosine similarity to `query`, optionally
    /// restricted to one document. Ties keep insertion order.
    #[inline]
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        self.check_dimension(query)?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.database.pool().acquire().await?;

        let scored = if vector_norm(query) == 0.0 {
            // Every candidate scores 0 against a zero query
            ChunkQueries::list_in_order(&mut conn, document_id, backend::sql_limit(k))
                .await?
                .into_iter()
                .map(|row| (row, 0.0))
                .collect()
        } else {
            self.backend
                .search(&mut conn, query, k, document_id)
                .await?
        };

        let results = scored
            .into_iter()
            .map(|(row, similarity)| row.into_search_result(similarity))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Search returned {} results (k={}, document={:?})",
            results.len(),
            k,
            document_id
        );
        Ok(results)
    }

    /// Remove every chunk and embedding of a document; unknown documents are a no-op
    #[inline]
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.ensure_open()?;

        let mut tx = self.database.pool().begin().await?;
        self.backend.remove_document(&mut tx, document_id).await?;
        let removed = ChunkQueries::delete_by_document(&mut tx, document_id).await?;
        tx.commit().await?;

        if removed > 0 {
            info!("Deleted {} chunks of document {}", removed, document_id);
        }
        Ok(())
    }

    /// Point lookup; the similarity of a direct fetch is 1.0
    #[inline]
    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<SearchResult>> {
        self.ensure_open()?;

        let mut conn = self.database.pool().acquire().await?;
        ChunkQueries::get_by_id(&mut conn, chunk_id)
            .await?
            .map(|row| row.into_search_result(1.0))
            .transpose()
    }

    /// Distinct document ids in lexicographic order
    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<String>> {
        self.ensure_open()?;

        let mut conn = self.database.pool().acquire().await?;
        ChunkQueries::list_document_ids(&mut conn).await
    }

    /// Per-document chunk counts, sizes and last indexing time
    #[inline]
    pub async fn list_document_summaries(&self) -> Result<Vec<DocumentSummary>> {
        self.ensure_open()?;

        let mut conn = self.database.pool().acquire().await?;
        ChunkQueries::list_document_summaries(&mut conn).await
    }

    /// Chunk count and total characters of a document; zeros when unknown
    #[inline]
    pub async fn get_document_stats(&self, document_id: &str) -> Result<DocumentStats> {
        self.ensure_open()?;

        let mut conn = self.database.pool().acquire().await?;
        ChunkQueries::document_stats(&mut conn, document_id).await
    }

    /// Total number of stored chunks
    #[inline]
    pub async fn chunk_count(&self) -> Result<u64> {
        self.ensure_open()?;

        let mut conn = self.database.pool().acquire().await?;
        Ok(ChunkQueries::count(&mut conn).await?.unsigned_abs())
    }

    /// Total number of stored embeddings; equals `chunk_count` in a consistent store
    #[inline]
    pub async fn embedding_count(&self) -> Result<u64> {
        self.ensure_open()?;

        let mut conn = self.database.pool().acquire().await?;
        Ok(EmbeddingQueries::count(&mut conn).await?.unsigned_abs())
    }

    /// Remove every chunk and embedding
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        self.ensure_open()?;

        let mut tx = self.database.pool().begin().await?;
        self.backend.clear(&mut tx).await?;
        let removed = ChunkQueries::delete_all(&mut tx).await?;
        tx.commit().await?;

        info!("Cleared vector index ({} chunks removed)", removed);
        Ok(())
    }

    /// Reclaim space and refresh query planner statistics
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        self.ensure_open()?;
        self.database.optimize().await
    }

    /// Release the connection pool. Later calls on this index fail with
    /// `ClosedStore`; closing again is a no-op.
    #[inline]
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.database.close().await;
        info!("Vector index closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
