use anyhow::Result;
use clap::{Parser, Subcommand};
use rag_index::commands::{
    ConfigUpdate, QueryArgs, clear_store, configure, delete_document, index_files, list_documents,
    optimize_store, query, show_document_stats, show_status,
};
use rag_index::config::{BackendPreference, Config, resolve_base_dir, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag-index")]
#[command(about = "Chunk, embed and search documents for retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the store (default: ~/.rag-index)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Ollama protocol (http or https)
        #[arg(long)]
        protocol: Option<String>,
        /// Ollama host
        #[arg(long)]
        host: Option<String>,
        /// Ollama port
        #[arg(long)]
        port: Option<u16>,
        /// Embedding model
        #[arg(long)]
        model: Option<String>,
        /// Texts per embedding request
        #[arg(long)]
        batch_size: Option<u32>,
        /// Dimensionality of the embedding model's vectors
        #[arg(long)]
        embedding_dimension: Option<u32>,
        /// Similarity search backend
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
        /// SQLite extension providing vec0 ("bundled" or a loadable extension path)
        #[arg(long)]
        vector_extension: Option<String>,
        /// Maximum chunk size in characters
        #[arg(long)]
        max_chunk_size: Option<usize>,
        /// Characters shared between consecutive chunks
        #[arg(long)]
        chunk_overlap: Option<usize>,
        /// Default number of results per query
        #[arg(long)]
        max_results: Option<usize>,
        /// Default similarity threshold
        #[arg(long, allow_negative_numbers = true)]
        min_similarity: Option<f32>,
    },
    /// Index files as one document, replacing any previous version
    Index {
        /// Identifier of the document
        document_id: String,
        /// Files whose text makes up the document
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Split on markdown headings and tag chunks with their section
        #[arg(long)]
        structure: bool,
    },
    /// Retrieve context for a query
    Query {
        /// Query text
        text: String,
        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,
        /// Discard results below this similarity
        #[arg(long, allow_negative_numbers = true)]
        min_similarity: Option<f32>,
        /// Only search this document
        #[arg(long)]
        document: Option<String>,
        /// Omit similarity scores from the context
        #[arg(long)]
        no_scores: bool,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a document and all of its chunks
    Delete {
        /// Identifier of the document
        document_id: String,
    },
    /// List indexed documents
    List,
    /// Show chunk statistics for a document
    Stats {
        /// Identifier of the document
        document_id: String,
    },
    /// Remove every document from the store
    Clear,
    /// Show Ollama and store status
    Status,
    /// Compact the store and refresh query statistics
    Optimize,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum BackendArg {
    Auto,
    SqliteVec,
    BruteForce,
}

impl From<BackendArg> for BackendPreference {
    fn from(backend: BackendArg) -> Self {
        match backend {
            BackendArg::Auto => Self::Auto,
            BackendArg::SqliteVec => Self::SqliteVec,
            BackendArg::BruteForce => Self::BruteForce,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = resolve_base_dir(cli.base_dir.as_deref())?;
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Config {
            show,
            protocol,
            host,
            port,
            model,
            batch_size,
            embedding_dimension,
            backend,
            vector_extension,
            max_chunk_size,
            chunk_overlap,
            max_results,
            min_similarity,
        } => {
            let update = ConfigUpdate {
                protocol,
                host,
                port,
                model,
                batch_size,
                embedding_dimension,
                backend: backend.map(BackendPreference::from),
                vector_extension,
                max_chunk_size,
                chunk_overlap,
                max_results,
                min_similarity,
            };
            if show && update.is_empty() {
                show_config(&config)?;
            } else {
                configure(config, update)?;
            }
        }
        Commands::Index {
            document_id,
            files,
            structure,
        } => {
            index_files(config, &document_id, &files, structure).await?;
        }
        Commands::Query {
            text,
            limit,
            min_similarity,
            document,
            no_scores,
            json,
        } => {
            let args = QueryArgs {
                limit,
                min_similarity,
                document,
                no_scores,
                json,
            };
            query(config, &text, &args).await?;
        }
        Commands::Delete { document_id } => {
            delete_document(config, &document_id).await?;
        }
        Commands::List => {
            list_documents(config).await?;
        }
        Commands::Stats { document_id } => {
            show_document_stats(config, &document_id).await?;
        }
        Commands::Clear => {
            clear_store(config).await?;
        }
        Commands::Status => {
            show_status(config).await?;
        }
        Commands::Optimize => {
            optimize_store(config).await?;
        }
    }

    Ok(())
}
