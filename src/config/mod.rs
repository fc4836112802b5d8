// Configuration management module
// TOML settings for the embedding client, chunker, store and retrieval defaults

pub mod settings;


use anyhow::Result;
use console::style;
use std::path::{Path, PathBuf};

pub use settings::{
    BUNDLED_VECTOR_EXTENSION, BackendPreference, Config, ConfigError, OllamaConfig,
    RetrievalConfig, StoreConfig,
};

/// Resolve the application base directory, preferring an explicit override
#[inline]
pub fn resolve_base_dir(override_dir: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Config::default_base_dir(),
    }
}

/// Print the effective configuration to stderr
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Protocol: {}", style(&config.ollama.protocol).cyan());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!(
        "  Max Chunk Size: {}",
        style(config.chunking.max_chunk_size).cyan()
    );
    eprintln!("  Overlap: {}", style(config.chunking.chunk_overlap).cyan());
    eprintln!(
        "  Separator: {}",
        style(config.chunking.separator.escape_debug()).cyan()
    );
    eprintln!(
        "  Preserve Structure: {}",
        style(config.chunking.preserve_structure).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Store:").bold().yellow());
    eprintln!("  Backend: {}", style(config.store.backend).cyan());
    eprintln!(
        "  Vector Extension: {}",
        style(&config.store.vector_extension).cyan()
    );
    eprintln!(
        "  Max Connections: {}",
        style(config.store.max_connections).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Max Results: {}", style(config.retrieval.max_results).cyan());
    eprintln!(
        "  Min Similarity: {}",
        style(config.retrieval.min_similarity).cyan()
    );
    eprintln!("  Show Scores: {}", style(config.retrieval.show_scores).cyan());

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    eprintln!("Store file: {}", style(config.store_path().display()).dim());

    Ok(())
}
