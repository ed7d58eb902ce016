//! # pdf-qa CLI (`pdfqa`)
//!
//! ## Usage
//!
//! ```bash
//! pdfqa --config ./config/pdfqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdfqa index` | Build the vector index from a folder of PDFs |
//! | `pdfqa ask "<question>"` | Answer one question |
//! | `pdfqa chat` | Interactive question-answering session |
//! | `pdfqa info` | Summarize a persisted index |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pdf_qa::config::{self, Config};
use pdf_qa::indexer;
use pdf_qa::info;
use pdf_qa::progress::ProgressMode;
use pdf_qa::repl;
use pdf_qa::session::Session;

/// pdf-qa: ask questions about a folder of PDFs, with page citations.
#[derive(Parser)]
#[command(
    name = "pdfqa",
    about = "pdf-qa: document-grounded question answering over PDF collections",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pdfqa.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index from a directory of PDFs.
    ///
    /// Extracts page text, splits it into overlapping chunks, embeds each
    /// chunk and writes `<name>.vec` and `<name>.json` into the output
    /// directory.
    Index {
        /// Directory containing the PDF files.
        #[arg(long)]
        pdf_dir: Option<PathBuf>,

        /// Directory to write the index into.
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Base name of the index files.
        #[arg(long)]
        index_name: Option<String>,

        /// Maximum chunk length in characters.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared between consecutive chunks.
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Embedding model identifier.
        #[arg(long)]
        embed_model: Option<String>,

        /// Load and split only; print counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Answer a single question and exit.
    Ask {
        /// The question.
        question: String,

        #[command(flatten)]
        query: QueryArgs,

        /// Print the full turn outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive question-answering session.
    Chat {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show a summary of the persisted index.
    Info {
        /// Directory containing the index.
        #[arg(long)]
        index_dir: Option<PathBuf>,

        /// Base name of the index files.
        #[arg(long)]
        index_name: Option<String>,
    },
}

/// Options shared by `ask` and `chat`.
#[derive(clap::Args)]
struct QueryArgs {
    /// Directory containing the index.
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Base name of the index files.
    #[arg(long)]
    index_name: Option<String>,

    /// Number of passages to retrieve.
    #[arg(long)]
    top_k: Option<usize>,

    /// Minimum similarity in [0, 1] for a document-grounded answer.
    #[arg(long)]
    threshold: Option<f64>,

    /// Never answer from general knowledge.
    #[arg(long)]
    no_fallback: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

impl QueryArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(dir) = &self.index_dir {
            cfg.index.dir = dir.clone();
        }
        if let Some(name) = &self.index_name {
            cfg.index.name = name.clone();
        }
        if let Some(k) = self.top_k {
            cfg.retrieval.top_k = k;
        }
        if let Some(t) = self.threshold {
            cfg.retrieval.threshold = t;
        }
        if self.no_fallback {
            cfg.retrieval.allow_fallback = false;
        }
    }
}

/// Session with the key from the environment, if any.
fn session_from_env(cfg: &Config) -> anyhow::Result<Session> {
    let mut session = Session::live(cfg);
    if let Some(key) = cfg.api_key_from_env() {
        session.set_api_key(&key)?;
    }
    Ok(session)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Index {
            pdf_dir,
            out_dir,
            index_name,
            chunk_size,
            chunk_overlap,
            embed_model,
            dry_run,
            progress,
        } => {
            if let Some(dir) = pdf_dir {
                cfg.ingest.pdf_dir = dir;
            }
            if let Some(dir) = out_dir {
                cfg.index.dir = dir;
            }
            if let Some(name) = index_name {
                cfg.index.name = name;
            }
            if let Some(size) = chunk_size {
                cfg.chunking.chunk_size = size;
            }
            if let Some(overlap) = chunk_overlap {
                cfg.chunking.chunk_overlap = overlap;
            }
            if let Some(model) = embed_model {
                cfg.embedding.model = model;
            }
            cfg.validate().context("invalid index options")?;

            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            let api_key = cfg.api_key_from_env();
            let report =
                indexer::run_index(&cfg, api_key.as_deref(), dry_run, reporter.as_ref()).await?;
            println!("{}", report.summary());
        }
        Commands::Ask {
            question,
            query,
            json,
        } => {
            query.apply(&mut cfg);
            cfg.validate().context("invalid query options")?;

            let mut session = session_from_env(&cfg)?;
            if !session.is_ready() {
                cfg.require_api_key()?;
            }
            let Some(turn) = session.handle_turn(&question).await? else {
                anyhow::bail!("question must not be empty");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&turn)?);
            } else {
                println!("{}", repl::render_turn(&turn));
            }
        }
        Commands::Chat { query } => {
            query.apply(&mut cfg);
            cfg.validate().context("invalid query options")?;
            repl::run_chat(session_from_env(&cfg)?).await?;
        }
        Commands::Info {
            index_dir,
            index_name,
        } => {
            if let Some(dir) = index_dir {
                cfg.index.dir = dir;
            }
            if let Some(name) = index_name {
                cfg.index.name = name;
            }
            info::run_info(&cfg)?;
        }
    }

    Ok(())
}
