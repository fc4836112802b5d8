// Retrieval module
// Document-level indexing and query-level context assembly over the vector index


use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunking::Chunker;
use crate::config::RetrievalConfig;
use crate::database::{BackendKind, DocumentStats, Metadata, SearchResult, VectorIndex};
use crate::embeddings::EmbeddingGenerator;
use crate::{RagError, Result};

/// Candidates fetched per requested result, leaving room for similarity filtering
const CANDIDATE_FACTOR: usize = 2;

/// Per-query retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveOptions {
    pub max_results: usize,
    /// Results scoring below this are discarded; exactly zero disables filtering
    pub min_similarity: f32,
    /// Restrict the search to one document
    pub document_id: Option<String>,
    /// Annotate each source in the context block with its similarity
    pub show_scores: bool,
}

impl Default for RetrieveOptions {
    #[inline]
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrieveOptions {
    #[inline]
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            max_results: config.max_results,
            min_similarity: config.min_similarity,
            document_id: None,
            show_scores: config.show_scores,
        }
    }
}

impl RetrieveOptions {
    #[inline]
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }
}

/// Formatted context plus the structured results it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub context: String,
    /// Number of results actually returned after filtering and truncation
    pub chunk_count: usize,
    pub results: Vec<SearchResult>,
}

impl RetrievalResponse {
    /// A response with no context, for callers that proceed without retrieval
    #[inline]
    pub fn empty() -> Self {
        Self {
            context: String::new(),
            chunk_count: 0,
            results: Vec::new(),
        }
    }

    fn from_results(results: Vec<SearchResult>, show_scores: bool) -> Self {
        Self {
            context: format_context(&results, show_scores),
            chunk_count: results.len(),
            results,
        }
    }
}

/// Render results as numbered `[Source N]` sections separated by a blank line
#[inline]
pub fn format_context(results: &[SearchResult], show_scores: bool) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let score = if show_scores {
                format!(" (similarity: {:.3})", result.similarity)
            } else {
                String::new()
            };
            let heading = result
                .heading()
                .map(|heading| format!("Section: {}\n", heading))
                .unwrap_or_default();
            format!("[Source {}]{}\n{}{}", i + 1, score, heading, result.content)
        })
        .join("\n\n")
}

/// Chunks, embeds and stores documents; embeds queries and assembles context
pub struct RetrievalService {
    index: VectorIndex,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingGenerator>,
}

impl std::fmt::Debug for RetrievalService {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalService")
            .field("index", &self.index)
            .field("chunker", &self.chunker)
            .field("dimensions", &self.embedder.dimensions())
            .finish()
    }
}

impl RetrievalService {
    /// # Errors
    /// * `DimensionMismatch` if the generator's dimensionality differs from the index's
    #[inline]
    pub fn new(
        index: VectorIndex,
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> Result<Self> {
        if embedder.dimensions() != index.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimensions(),
            });
        }

        Ok(Self {
            index,
            chunker,
            embedder,
        })
    }

    /// Replace everything stored for `document_id` with freshly embedded chunks of `text`.
    ///
    /// The old chunks are removed before embedding; if embedding fails the
    /// document is left unindexed and the call can be retried.
    ///
    /// # Returns
    /// * The number of chunks stored
    #[inline]
    pub async fn index_document(
        &self,
        document_id: &str,
        text: &str,
        metadata: Option<&Metadata>,
    ) -> Result<usize> {
        if document_id.is_empty() {
            return Err(RagError::InvalidInput(
                "Document id must not be empty".to_string(),
            ));
        }

        self.index.delete_document(document_id).await?;

        let empty = Metadata::new();
        let chunks = self
            .chunker
            .chunk(document_id, text, metadata.unwrap_or(&empty));
        if chunks.is_empty() {
            warn!("Document {} produced no chunks", document_id);
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "Expected {} embeddings for document {}, got {}",
                chunks.len(),
                document_id,
                vectors.len()
            )));
        }

        self.index.add_chunks(&chunks, &vectors).await?;

        info!("Indexed document {} ({} chunks)", document_id, chunks.len());
        Ok(chunks.len())
    }

    /// Embed `query` and return the best matching chunks as a context block.
    ///
    /// Zero matches is not an error; the response is simply empty.
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<RetrievalResponse> {
        if options.max_results == 0 {
            return Ok(RetrievalResponse::empty());
        }

        let query_vector = self.embedder.embed(query).await?;
        let candidates = self
            .index
            .search(
                &query_vector,
                options.max_results.saturating_mul(CANDIDATE_FACTOR),
                options.document_id.as_deref(),
            )
            .await?;
        let fetched = candidates.len();

        let results: Vec<SearchResult> = candidates
            .into_iter()
            .filter(|r| options.min_similarity == 0.0 || r.similarity >= options.min_similarity)
            .take(options.max_results)
            .collect();

        debug!(
            "Retrieved {} of {} candidates (min similarity {})",
            results.len(),
            fetched,
            options.min_similarity
        );
        Ok(RetrievalResponse::from_results(results, options.show_scores))
    }

    #[inline]
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.index.delete_document(document_id).await
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<String>> {
        self.index.list_documents().await
    }

    #[inline]
    pub async fn get_document_stats(&self, document_id: &str) -> Result<DocumentStats> {
        self.index.get_document_stats(document_id).await
    }

    #[inline]
    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<SearchResult>> {
        self.index.get_chunk(chunk_id).await
    }

    #[inline]
    pub async fn clear(&self) -> Result<()> {
        self.index.clear().await
    }

    #[inline]
    pub async fn close(&self) {
        self.index.close().await;
    }

    #[inline]
    pub fn get_dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    #[inline]
    pub fn backend_kind(&self) -> BackendKind {
        self.index.backend_kind()
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }
}
