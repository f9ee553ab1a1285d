//! # kbchat CLI
//!
//! The `kbchat` binary runs the chat API server and administers the
//! knowledge base behind it.
//!
//! ## Usage
//!
//! ```bash
//! kbchat --config ./config/kbchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbchat init` | Create the SQLite database and run schema migrations |
//! | `kbchat serve` | Start the HTTP API |
//! | `kbchat ingest <path>` | Ingest a file or every matching file under a directory |
//! | `kbchat seed` | Load the built-in warehouse-operations sample documents |
//! | `kbchat ask "<question>"` | Answer a question from the knowledge base |
//! | `kbchat search "<query>"` | Show the best-matching chunks |
//! | `kbchat docs list\|get\|delete\|download\|reingest` | Manage documents |
//! | `kbchat reconcile` | Repair interrupted deletes and orphaned data |
//! | `kbchat reindex` | Re-embed everything after an embedding-model change |
//! | `kbchat stats` | Knowledge-base statistics |
//!
//! ## Examples
//!
//! ```bash
//! kbchat init
//! kbchat seed
//! kbchat ask "How does FIFO rotation work?"
//! kbchat ingest ./handbook
//! kbchat serve
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kbchat::app::App;
use kbchat::{config, docs_cmd, migrate, search, server, stats};

/// kbchat: a retrieval-augmented chatbot over your own documents.
///
/// All commands except `completions` read the TOML file given by `--config`.
#[derive(Parser)]
#[command(
    name = "kbchat",
    about = "kbchat — answer questions from an uploaded document knowledge base",
    version,
    long_about = "kbchat ingests PDF, Office, text and HTML documents, embeds their chunks into \
    a vector store, and answers questions with a chat model grounded in the retrieved passages. \
    It exposes the same operations over an HTTP API and this CLI."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbchat.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Ingest a file, or every file under a directory matching
    /// `[ingest].include_globs`.
    Ingest {
        path: PathBuf,
    },

    /// Load the sample warehouse-operations documents that are not present yet.
    Seed,

    /// Answer a question from the knowledge base, with sources.
    Ask {
        question: String,

        /// Number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show the chunks most similar to a query, without generating an answer.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage uploaded documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Finish interrupted deletes, fail interrupted ingests and remove orphans.
    Reconcile,

    /// Drop all vectors and re-embed every document with the configured model.
    Reindex,

    /// Show knowledge-base statistics.
    Stats,

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    /// List documents, newest first.
    List,

    /// Show a document's record.
    Get {
        id: String,

        /// Also print its chunks.
        #[arg(long)]
        chunks: bool,
    },

    /// Delete a document, its chunks and its raw file.
    Delete {
        id: String,
    },

    /// Save the raw uploaded file.
    Download {
        id: String,

        /// Output path. Defaults to the original filename in the current directory.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Re-run extraction, chunking and embedding from the stored file.
    Reingest {
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "kbchat=debug,tower_http=debug"
    } else {
        "kbchat=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "kbchat", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let app = App::from_config(cfg).await?;

    let result = match cli.command {
        Commands::Serve => {
            let app = Arc::new(app);
            return server::run_server(app).await;
        }
        Commands::Ingest { path } => docs_cmd::run_ingest(&app, &path).await,
        Commands::Seed => docs_cmd::run_seed(&app).await,
        Commands::Ask { question, top_k } => search::run_ask(&app, &question, top_k).await,
        Commands::Search { query, limit } => search::run_search(&app, &query, limit).await,
        Commands::Docs { action } => match action {
            DocsAction::List => docs_cmd::run_list(&app).await,
            DocsAction::Get { id, chunks } => docs_cmd::run_get(&app, &id, chunks).await,
            DocsAction::Delete { id } => docs_cmd::run_delete(&app, &id).await,
            DocsAction::Download { id, out } => {
                docs_cmd::run_download(&app, &id, out.as_deref()).await
            }
            DocsAction::Reingest { id } => docs_cmd::run_reingest(&app, &id).await,
        },
        Commands::Reconcile => stats::run_reconcile(&app).await,
        Commands::Reindex => docs_cmd::run_reindex(&app).await,
        Commands::Stats => stats::run_stats(&app).await,
        // Handled above
        Commands::Init | Commands::Completions { .. } => Ok(()),
    };

    app.close().await;
    result
}
