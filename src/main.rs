//! # docchat CLI
//!
//! The `docchat` binary runs the document question-answering service and
//! provides local commands for the same pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Create the SQLite database and run schema migrations |
//! | `docchat ingest <file.pdf>` | Parse, chunk, embed, and index a PDF |
//! | `docchat ask "<question>"` | Answer a one-shot question from the index |
//! | `docchat serve` | Start the HTTP server |
//!
//! All commands accept a `--config` flag pointing to a TOML configuration
//! file; built-in defaults apply when the file is absent. Embedding and
//! generation use the OpenAI API and require `OPENAI_API_KEY` in the
//! environment (a `.env` file is honored).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docchat::config;
use docchat::embedding::OpenAiEmbedder;
use docchat::history::SessionStore;
use docchat::index::VectorIndex;
use docchat::llm::OpenAiChatModel;
use docchat::rag::RagService;
use docchat::server::{self, AppState};
use docchat::{db, migrate};

/// docchat: upload PDFs, ask questions, get cited answers.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "A document question-answering service: upload PDFs, ask questions, get cited answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the chunk/vector tables.
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Parse, chunk, embed, and index a PDF from disk.
    Ingest {
        /// Path to the PDF file.
        file: PathBuf,
    },

    /// Ask a one-shot question against the indexed documents.
    ///
    /// History lives in-process, so each invocation starts a fresh
    /// session; use the HTTP server for multi-turn conversations.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Start the HTTP server on the configured bind address.
    Serve,
}

fn build_service(cfg: &config::Config, index: VectorIndex) -> Result<RagService> {
    let embedder = Arc::new(OpenAiEmbedder::new(&cfg.embedding)?);
    let llm = Arc::new(OpenAiChatModel::new(&cfg.llm)?);
    Ok(RagService::new(cfg.clone(), Arc::new(index), embedder, llm))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docchat=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file } => {
            let index = VectorIndex::open(&cfg.db.path).await?;
            let service = build_service(&cfg, index)?;
            let filename = file
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| file.display().to_string());
            let report = service
                .add_document(&file, &filename)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("ingest {}", report.filename);
            println!("  pages: {}", report.num_pages);
            println!("  chunks indexed: {}", report.num_chunks);
            println!("ok");
        }
        Commands::Ask { question } => {
            let index = VectorIndex::open(&cfg.db.path).await?;
            let service = build_service(&cfg, index)?;
            let answer = service
                .answer_query(&question, &[])
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            println!("{}", answer.answer);
            let mut sources: Vec<String> = answer.sources.into_iter().collect();
            sources.sort();
            if !sources.is_empty() {
                println!();
                println!("sources: {}", sources.join(", "));
            }
        }
        Commands::Serve => {
            let index = VectorIndex::open(&cfg.db.path).await?;
            let service = build_service(&cfg, index)?;
            let state = AppState {
                rag: Arc::new(service),
                sessions: Arc::new(SessionStore::new()),
            };
            server::run_server(&cfg.server.bind, state).await?;
        }
    }

    Ok(())
}
