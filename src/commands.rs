use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chunking::Chunker;
use crate::config::{BackendPreference, Config};
use crate::database::{Metadata, MetadataValue, VectorIndex};
use crate::embeddings::{EmbeddingGenerator, OllamaClient};
use crate::RagError;
use crate::retrieval::{RetrievalService, RetrieveOptions};

/// Configuration changes requested on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model: Option<String>,
    pub batch_size: Option<u32>,
    pub embedding_dimension: Option<u32>,
    pub backend: Option<BackendPreference>,
    pub vector_extension: Option<String>,
    pub max_chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub max_results: Option<usize>,
    pub min_similarity: Option<f32>,
}

impl ConfigUpdate {
    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply every requested change, validating each against the current settings
    #[inline]
    pub fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(protocol) = self.protocol {
            config.ollama.set_protocol(protocol)?;
        }
        if let Some(host) = self.host {
            config.ollama.set_host(host)?;
        }
        if let Some(port) = self.port {
            config.ollama.set_port(port)?;
        }
        if let Some(model) = self.model {
            config.ollama.set_model(model)?;
        }
        if let Some(batch_size) = self.batch_size {
            config.ollama.set_batch_size(batch_size)?;
        }
        if let Some(dimension) = self.embedding_dimension {
            config.ollama.set_embedding_dimension(dimension)?;
        }
        if let Some(backend) = self.backend {
            config.store.backend = backend;
        }
        if let Some(extension) = self.vector_extension {
            config.store.vector_extension = extension;
        }
        if let Some(max_chunk_size) = self.max_chunk_size {
            config.chunking.max_chunk_size = max_chunk_size;
        }
        if let Some(chunk_overlap) = self.chunk_overlap {
            config.chunking.chunk_overlap = chunk_overlap;
        }
        if let Some(max_results) = self.max_results {
            config.retrieval.max_results = max_results;
        }
        if let Some(min_similarity) = self.min_similarity {
            config.retrieval.min_similarity = min_similarity;
        }

        config.validate()?;
        Ok(())
    }
}

/// Per-invocation overrides of the retrieval defaults
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub limit: Option<usize>,
    pub min_similarity: Option<f32>,
    pub document: Option<String>,
    pub no_scores: bool,
    pub json: bool,
}

impl QueryArgs {
    #[inline]
    pub fn options(&self, config: &Config) -> RetrieveOptions {
        let mut options = RetrieveOptions::from(&config.retrieval);
        if let Some(limit) = self.limit {
            options.max_results = limit;
        }
        if let Some(min_similarity) = self.min_similarity {
            options.min_similarity = min_similarity;
        }
        if self.no_scores {
            options.show_scores = false;
        }
        options.document_id.clone_from(&self.document);
        options
    }
}

async fn open_index(config: &Config) -> Result<VectorIndex> {
    VectorIndex::open_in_dir(
        config.get_base_dir(),
        config.embedding_dimension(),
        &config.store,
    )
    .await
    .with_context(|| format!("Failed to open store at {}", config.store_path().display()))
}

async fn open_service(config: &Config) -> Result<RetrievalService> {
    let client = OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?;
    let chunker = Chunker::new(config.chunking.clone()).context("Invalid chunking settings")?;
    let index = open_index(config).await?;

    RetrievalService::new(index, chunker, Arc::new(client) as Arc<dyn EmbeddingGenerator>)
        .context("Embedding model does not match the store")
}

/// Update and save the configuration
#[inline]
pub fn configure(mut config: Config, update: ConfigUpdate) -> Result<()> {
    if update.is_empty() {
        eprintln!("No changes requested. Use --show to print the current configuration.");
        return Ok(());
    }

    update.apply(&mut config)?;
    config.save()?;

    eprintln!(
        "{} Configuration saved to {}",
        style("✓").green(),
        style(config.config_file_path().display()).cyan()
    );
    Ok(())
}

/// Read `files` and index their concatenated text as one document
#[inline]
pub async fn index_files(
    mut config: Config,
    document_id: &str,
    files: &[PathBuf],
    structure: bool,
) -> Result<()> {
    if structure {
        config.chunking.preserve_structure = true;
    }

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(files.len() as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };

    let mut sections = Vec::with_capacity(files.len());
    for file in files {
        bar.set_message(format!("Reading {}", file.display()));
        let text = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        sections.push(text);
        bar.inc(1);
    }

    let mut metadata = Metadata::new();
    let sources: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
    metadata.insert("source".to_string(), MetadataValue::from(sources.join(", ")));

    bar.set_message(format!("Embedding {}", document_id));
    let service = open_service(&config).await?;
    let text = sections.join(&config.chunking.separator);
    let result = service.index_document(document_id, &text, Some(&metadata)).await;
    bar.finish_and_clear();
    service.close().await;

    let count = result.with_context(|| format!("Failed to index document {}", document_id))?;
    info!("Indexed {} from {} files", document_id, files.len());
    eprintln!(
        "{} Indexed {} ({} chunks, {} backend)",
        style("✓").green(),
        style(document_id).cyan(),
        count,
        service.backend_kind()
    );
    Ok(())
}

/// Retrieve context for `query` and print it to stdout
#[inline]
pub async fn query(config: Config, text: &str, args: &QueryArgs) -> Result<()> {
    let service = open_service(&config).await?;
    let options = args.options(&config);
    let response = service.retrieve(text, &options).await;
    service.close().await;
    let response = response.context("Retrieval failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else if response.chunk_count == 0 {
        eprintln!("No matching chunks found.");
    } else {
        println!("{}", response.context);
    }
    Ok(())
}

#[inline]
pub async fn delete_document(config: Config, document_id: &str) -> Result<()> {
    let index = open_index(&config).await?;
    let stats = index.get_document_stats(document_id).await?;
    index.delete_document(document_id).await?;
    index.close().await;

    if stats.chunk_count == 0 {
        eprintln!("Document {} was not indexed", style(document_id).yellow());
    } else {
        eprintln!(
            "{} Deleted {} ({} chunks)",
            style("✓").green(),
            style(document_id).cyan(),
            stats.chunk_count
        );
    }
    Ok(())
}

#[inline]
pub async fn list_documents(config: Config) -> Result<()> {
    let index = open_index(&config).await?;
    let summaries = index.list_document_summaries().await;
    index.close().await;
    let summaries = summaries?;

    if summaries.is_empty() {
        println!("No documents have been indexed yet.");
        println!("Use 'rag-index index <document-id> <file>' to add one.");
        return Ok(());
    }

    println!("Indexed Documents ({} total):", summaries.len());
    println!();
    for summary in &summaries {
        println!("📄 {}", style(&summary.document_id).bold());
        println!("   Chunks: {}", summary.chunk_count);
        println!("   Characters: {}", summary.total_chars);
        if let Some(indexed) = summary.last_indexed {
            println!("   Last Indexed: {}", indexed.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    Ok(())
}

#[inline]
pub async fn show_document_stats(config: Config, document_id: &str) -> Result<()> {
    let index = open_index(&config).await?;
    let stats = index.get_document_stats(document_id).await;
    index.close().await;
    let stats = stats?;

    println!("{}", style(document_id).bold());
    println!("  Chunks: {}", stats.chunk_count);
    println!("  Characters: {}", stats.total_chars);
    Ok(())
}

#[inline]
pub async fn clear_store(config: Config) -> Result<()> {
    let index = open_index(&config).await?;
    let removed = index.chunk_count().await?;
    let result = index.clear().await;
    index.close().await;
    result?;

    eprintln!("{} Removed {} chunks", style("✓").green(), removed);
    Ok(())
}

#[inline]
pub async fn optimize_store(config: Config) -> Result<()> {
    let index = open_index(&config).await?;
    let result = index.optimize().await;
    index.close().await;
    result?;

    eprintln!("{} Store optimized", style("✓").green());
    Ok(())
}

/// Report Ollama connectivity and store health
#[inline]
pub async fn show_status(config: Config) -> Result<()> {
    println!("📊 rag-index Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            let checked = client.clone();
            match tokio::task::spawn_blocking(move || checked.health_check()).await? {
                Ok(()) => {
                    println!("   ✅ Ollama: Connected ({})", client.base_url());
                    println!("   📋 Model: {}", client.model());
                }
                Err(e) => {
                    warn!("Ollama health check failed: {:#}", e);
                    println!("   ⚠️  Ollama: Unhealthy - {:#}", e);
                }
            }
        }
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }
    println!(
        "   🔢 Embedding Dimension: {}",
        config.ollama.embedding_dimension
    );

    println!();
    println!("🗄️  Store Status:");
    match open_index(&config).await {
        Ok(index) => {
            println!("   ✅ Store: {}", config.store_path().display());
            println!(
                "   🔍 Backend: {} (preference: {})",
                index.backend_kind(),
                config.store.backend
            );
            match (
                index.list_documents().await,
                index.chunk_count().await,
                index.embedding_count().await,
            ) {
                (Ok(documents), Ok(chunks), Ok(embeddings)) => {
                    println!("   📚 Documents: {}", documents.len());
                    println!("   📄 Chunks: {}", chunks);
                    if embeddings == chunks {
                        println!("   🧮 Embeddings: {}", embeddings);
                    } else {
                        println!("   ⚠️  Embeddings: {} (expected {})", embeddings, chunks);
                    }
                }
                (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                    println!("   ❌ Failed to read store: {}", e);
                }
            }
            index.close().await;
        }
        Err(e) => {
            println!("   ❌ Store: {:#}", e);
            if e
                .downcast_ref::<RagError>()
                .is_some_and(RagError::is_configuration)
            {
                println!("   💡 Review the settings with 'rag-index config --show'");
            }
        }
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • Use 'rag-index index <document-id> <file>' to index a document");
    println!("   • Use 'rag-index query <text>' to retrieve context");
    Ok(())
}
