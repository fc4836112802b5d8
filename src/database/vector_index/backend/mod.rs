// Similarity-search backends
// Both rank by cosine similarity and break ties by chunk insertion order


pub mod brute_force;
pub mod sqlite_vec;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::cmp::Ordering;
use std::fmt;

use crate::Result;
use crate::database::sqlite::models::ChunkRow;

pub use brute_force::BruteForceBackend;
pub use sqlite_vec::SqliteVecBackend;

/// A candidate chunk and its cosine similarity to the query
pub type ScoredChunk = (ChunkRow, f32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// k-NN through the sqlite-vec `vec0` virtual table
    SqliteVec,
    /// Full scan of the embeddings table, scored in Rust
    BruteForce,
}

impl fmt::Display for BackendKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SqliteVec => "sqlite-vec",
            Self::BruteForce => "brute-force",
        })
    }
}

/// Storage-side half of the vector index.
///
/// Every method runs on the caller's connection so that writes join the
/// caller's transaction. The chunk and embedding tables are maintained by
/// the index itself; backends only keep their own structures in sync.
#[async_trait]
pub trait SearchBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Bring backend structures up to date after the store is opened
    async fn prepare(&self, conn: &mut SqliteConnection) -> Result<()>;

    /// Called after the embedding row for `chunk_id` has been written
    async fn upsert(&self, conn: &mut SqliteConnection, chunk_id: &str, vector: &[f32])
    -> Result<()>;

    /// Called before the chunk rows of `document_id` are deleted
    async fn remove_document(&self, conn: &mut SqliteConnection, document_id: &str) -> Result<()>;

    /// Called before every chunk row is deleted
    async fn clear(&self, conn: &mut SqliteConnection) -> Result<()>;

    /// Up to `k` chunks ranked by similarity to a non-zero `query`
    async fn search(
        &self,
        conn: &mut SqliteConnection,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Cosine similarity, accumulated in f64; 0 when either vector has zero norm
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_with_norms(a, norm(a), b, norm(b))
}

/// Cosine similarity with precomputed norms
#[inline]
pub fn cosine_with_norms(a: &[f32], a_norm: f64, b: &[f32], b_norm: f64) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 || !a_norm.is_finite() || !b_norm.is_finite() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();

    let similarity = dot / (a_norm * b_norm);
    if similarity.is_nan() {
        return 0.0;
    }
    similarity.clamp(-1.0, 1.0) as f32
}

/// Convert a cosine distance reported by the native extension back to similarity
#[inline]
pub fn similarity_from_distance(distance: Option<f64>) -> f32 {
    match distance {
        Some(d) if d.is_finite() => (1.0 - d).clamp(-1.0, 1.0) as f32,
        _ => 0.0,
    }
}

fn norm(vector: &[f32]) -> f64 {
    crate::database::sqlite::models::vector_norm(vector)
}

/// Sort by similarity descending, then insertion order, and keep the best `k`
pub(crate) fn rank(scored: &mut Vec<ScoredChunk>, k: usize) {
    scored.sort_by(|(a_row, a_sim), (b_row, b_sim)| {
        b_sim
            .partial_cmp(a_sim)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a_row.seq.cmp(&b_row.seq))
    });
    scored.truncate(k);
}

/// Saturating conversion for SQL `LIMIT` / `k` parameters
#[inline]
pub(crate) fn sql_limit(k: usize) -> i64 {
    i64::try_from(k).unwrap_or(i64::MAX)
}
