#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance
// Run with: cargo test --test integration_ollama -- --ignored

use rag_index::chunking::Chunker;
use rag_index::config::{OllamaConfig, StoreConfig};
use rag_index::database::VectorIndex;
use rag_index::embeddings::{EmbeddingGenerator, OllamaClient};
use rag_index::retrieval::{RetrievalService, RetrieveOptions};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

const TEST_MODEL: &str = "nomic-embed-text:latest";
const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

fn integration_config() -> OllamaConfig {
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
    let port = env::var("OLLAMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_OLLAMA_PORT);
    let model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_MODEL.to_string());
    let embedding_dimension = env::var("OLLAMA_DIMENSION")
        .ok()
        .and_then(|d| d.parse().ok())
        .unwrap_or(768);

    OllamaConfig {
        host,
        port,
        model,
        batch_size: 5, // Smaller batch size for testing
        embedding_dimension,
        ..OllamaConfig::default()
    }
}

fn create_integration_test_client() -> OllamaClient {
    OllamaClient::new(&integration_config())
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60)) // Longer timeout for embedding generation
        .with_retry_attempts(3)
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok(); // Ignore error if already initialized
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();

    let client = create_integration_test_client();
    let result = client.health_check();

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a local Ollama instance"]
async fn real_ollama_batch_embeddings() {
    init_test_tracing();

    let client = create_integration_test_client();
    let texts: Vec<String> = (0..12)
        .map(|i| format!("Sentence number {} about vector search.", i))
        .collect();

    let vectors = client
        .embed_batch(&texts)
        .await
        .expect("Batch embedding should succeed");

    assert_eq!(vectors.len(), texts.len());
    assert!(vectors.iter().all(|v| v.len() == client.dimensions()));
    info!("Generated {} embeddings", vectors.len());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a local Ollama instance"]
async fn real_ollama_retrieval() {
    init_test_tracing();

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let client = create_integration_test_client();
    let index = VectorIndex::open_in_dir(
        temp_dir.path(),
        client.dimensions(),
        &StoreConfig::default(),
    )
    .await
    .expect("Failed to open index");
    let service = RetrievalService::new(index, Chunker::default(), Arc::new(client))
        .expect("dimensions agree");

    service
        .index_document(
            "animals",
            "Cats are small carnivorous mammals.\n\nSalmon swim upstream to spawn.",
            None,
        )
        .await
        .expect("indexing succeeds");
    service
        .index_document(
            "databases",
            "SQLite is an embedded relational database engine.",
            None,
        )
        .await
        .expect("indexing succeeds");

    let response = service
        .retrieve("Which database runs inside the application?", &RetrieveOptions::default())
        .await
        .expect("retrieval succeeds");

    info!("Retrieved context:\n{}", response.context);
    assert_eq!(response.results[0].document_id, "databases");
}
