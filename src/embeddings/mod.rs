// Embeddings module
// The embedding generator interface and its Ollama implementation

pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use ollama::OllamaClient;

/// A provider that turns text into fixed-length vectors
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts; the output preserves input order.
    ///
    /// An empty input returns an empty output without calling the provider.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimensionality of every vector this generator returns
    fn dimensions(&self) -> usize;
}
