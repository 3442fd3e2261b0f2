//! # Docuchat CLI
//!
//! The `docuchat` binary drives the document chat service: database
//! initialization, document ingestion, asset inspection, retrieval
//! debugging, and the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! docuchat --config ./config/docuchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docuchat init` | Create the SQLite database and run schema migrations |
//! | `docuchat process <file>` | Ingest a document and print its asset id |
//! | `docuchat assets` | List ingested assets with status and chunk counts |
//! | `docuchat search <query> --asset <id>` | Run a retrieval query directly |
//! | `docuchat serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use docuchat::config;
use docuchat::db;
use docuchat::embedding::create_embedder;
use docuchat::index::VectorIndex;
use docuchat::ingest;
use docuchat::migrate;
use docuchat::registry::AssetRegistry;
use docuchat::retrieve::Retriever;
use docuchat::server;

/// Docuchat — a retrieval-augmented document chat service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docuchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docuchat",
    about = "Docuchat — ingest documents, index them, talk to them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docuchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (assets,
    /// chunks, chunk_vectors, threads, turns). Idempotent — running it
    /// multiple times is safe.
    Init,

    /// Ingest a document.
    ///
    /// Loads the file, chunks and embeds its text, and stores everything
    /// under a fresh asset id. Blocks until the asset is Indexed (or
    /// reports the stage error that marked it Failed).
    Process {
        /// Path to the document (.pdf, .txt, .md, .docx).
        file: PathBuf,
    },

    /// List ingested assets.
    Assets,

    /// Run a retrieval query against one asset.
    ///
    /// Embeds the query and prints the top-k chunks with scores. Useful
    /// for inspecting what a chat thread would be grounded on.
    Search {
        /// The query string.
        query: String,

        /// Asset id to search.
        #[arg(long)]
        asset: String,

        /// Override the configured number of results.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Start the HTTP API server.
    ///
    /// Serves document ingestion, chat threads, and streamed replies on
    /// the address configured in `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Process { file } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let registry = AssetRegistry::new(pool.clone());
            let index = VectorIndex::new(pool.clone());
            let embedder = create_embedder(&cfg.embedding)?;

            let outcome =
                ingest::process_document(&cfg, &registry, &index, embedder.as_ref(), &file).await?;

            println!("process {}", file.display());
            println!("  asset: {}", outcome.asset_id);
            println!("  chunks: {}", outcome.chunk_count);
            println!("  status: {}", outcome.status.as_str());
            pool.close().await;
        }
        Commands::Assets => {
            let pool = db::connect(&cfg.db.path).await?;
            let registry = AssetRegistry::new(pool.clone());
            let assets = registry.list().await?;

            if assets.is_empty() {
                println!("No assets.");
            }
            for asset in assets {
                println!(
                    "{}  [{}]  {} chunks  {}",
                    asset.id,
                    asset.status.as_str(),
                    asset.chunk_count,
                    asset.source_path
                );
                if let Some(err) = asset.error {
                    println!("    error: {}", err);
                }
            }
            pool.close().await;
        }
        Commands::Search { query, asset, k } => {
            let pool = db::connect(&cfg.db.path).await?;
            let registry = AssetRegistry::new(pool.clone());
            let index = VectorIndex::new(pool.clone());
            let embedder = create_embedder(&cfg.embedding)?;
            let retriever = Retriever::new(
                registry,
                index,
                embedder,
                k.unwrap_or(cfg.retrieval.k),
            );

            let results = retriever.retrieve(&asset, &query).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, chunk) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] chunk {} (page {})",
                    i + 1,
                    chunk.score,
                    chunk.chunk_index,
                    chunk.page
                );
                println!(
                    "    \"{}\"",
                    chunk.text.replace('\n', " ").chars().take(160).collect::<String>()
                );
            }
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
