// Database module
// Chunk/embedding persistence (SQLite) and the similarity-search index built on top of it

#[cfg(test)]
mod tests;

pub mod sqlite;
pub mod vector_index;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use vector_index::{BackendKind, VectorIndex};

/// Open key/value metadata attached to a chunk.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Metadata key the chunker uses to record the enclosing markdown heading.
pub const HEADING_KEY: &str = "heading";

/// A single metadata value.
///
/// The set of kinds is closed so that metadata always survives a JSON round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Whether every number in this value, nested ones included, is finite.
    /// JSON has no encoding for NaN or infinity.
    #[inline]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Number(value) => value.is_finite(),
            Self::Map(map) => map.values().all(Self::is_finite),
            Self::Bool(_) | Self::String(_) => true,
        }
    }
}

impl From<&str> for MetadataValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    #[inline]
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for MetadataValue {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for MetadataValue {
    #[inline]
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Build the deterministic identifier of the `index`-th chunk of a document.
#[inline]
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{}-{}", document_id, index)
}

/// A bounded slice of a source document, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{document_id}-{index}`
    pub id: String,
    /// Document this chunk was cut from
    pub document_id: String,
    /// Trimmed, non-empty chunk text
    pub content: String,
    /// Zero-based position within the document
    pub index: usize,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    #[inline]
    pub fn new(document_id: &str, index: usize, content: impl Into<String>) -> Self {
        Self {
            id: chunk_id(document_id, index),
            document_id: document_id.to_string(),
            content: content.into(),
            index,
            metadata: Metadata::new(),
        }
    }

    #[inline]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Heading recorded by structure-aware chunking, if any
    #[inline]
    pub fn heading(&self) -> Option<&str> {
        self.metadata.get(HEADING_KEY).and_then(MetadataValue::as_str)
    }
}

/// A ranked (or directly fetched) chunk returned from the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    /// Cosine similarity in [-1, 1]; 1.0 for point lookups
    pub similarity: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SearchResult {
    #[inline]
    pub fn heading(&self) -> Option<&str> {
        self.metadata.get(HEADING_KEY).and_then(MetadataValue::as_str)
    }
}

/// Aggregate statistics over one document's chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub chunk_count: u64,
    /// Sum of chunk lengths in characters
    pub total_chars: u64,
}
