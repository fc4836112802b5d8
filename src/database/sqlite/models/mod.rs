
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::{Metadata, SearchResult};
use crate::{RagError, Result};

/// Size in bytes of one stored vector component
const F32_BYTES: usize = std::mem::size_of::<f32>();

/// A row of the `chunks` table; `seq` is the SQLite rowid (insertion order)
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChunkRow {
    pub seq: i64,
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: String,
}

/// A chunk row joined with its stored embedding
#[derive(Debug, Clone, FromRow)]
pub struct EmbeddedChunkRow {
    #[sqlx(flatten)]
    pub chunk: ChunkRow,
    pub vector: Vec<u8>,
    pub norm: f64,
}

/// A chunk row scored by the native extension.
///
/// `distance` is `NULL` when the stored vector is not part of the native index.
#[derive(Debug, Clone, FromRow)]
pub struct DistanceRow {
    #[sqlx(flatten)]
    pub chunk: ChunkRow,
    pub distance: Option<f64>,
}

/// A raw `embeddings` row
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StoredEmbedding {
    pub chunk_id: String,
    pub vector: Vec<u8>,
    pub norm: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub chunk_count: i64,
    pub total_chars: i64,
    pub last_indexed: Option<NaiveDateTime>,
}

impl ChunkRow {
    #[inline]
    pub fn parse_metadata(&self) -> Result<Metadata> {
        serde_json::from_str(&self.metadata).map_err(|e| {
            RagError::Storage(format!(
                "Corrupt metadata for chunk {}: {}",
                self.id, e
            ))
        })
    }

    #[inline]
    pub fn into_search_result(self, similarity: f32) -> Result<SearchResult> {
        let metadata = self.parse_metadata()?;
        Ok(SearchResult {
            chunk_id: self.id,
            document_id: self.document_id,
            content: self.content,
            similarity,
            metadata,
        })
    }

    #[cfg(test)]
    pub(crate) fn into_chunk(self) -> Result<crate::database::Chunk> {
        let metadata = self.parse_metadata()?;
        let index = usize::try_from(self.chunk_index).map_err(|_| {
            RagError::Storage(format!(
                "Invalid chunk index {} for chunk {}",
                self.chunk_index, self.id
            ))
        })?;
        Ok(crate::database::Chunk {
            id: self.id,
            document_id: self.document_id,
            content: self.content,
            index,
            metadata,
        })
    }
}

/// Encode a vector as little-endian f32 bytes, the layout used by both the
/// `embeddings` table and the sqlite-vec extension
#[inline]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

#[inline]
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % F32_BYTES != 0 {
        return Err(RagError::Storage(format!(
            "Corrupt embedding blob of {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(F32_BYTES)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Euclidean norm, accumulated in f64
#[inline]
pub fn vector_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt()
}
