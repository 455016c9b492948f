//! # Course RAG CLI (`crag`)
//!
//! Index course transcripts and ask questions about them.
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag init` | Create the SQLite database and schema |
//! | `crag ingest <path>` | Index course documents, skipping unchanged ones |
//! | `crag rebuild <path>` | Clear the index and ingest from scratch |
//! | `crag ask "<query>"` | Answer a question with the language model |
//! | `crag search "<query>"` | Run the content search tool directly |
//! | `crag outline "<course>"` | Print a course outline |
//! | `crag stats` | Show what is indexed |
//! | `crag serve` | Start the HTTP server |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use course_rag::config::{self, Config};
use course_rag::ingest::IngestReport;
use course_rag::models::Source;
use course_rag::rag::{open_index, RagSystem};
use course_rag::tools::ToolRegistry;
use course_rag::{db, migrate, server, stats};

/// Question answering over course transcripts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/crag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Question answering over course transcripts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Index course documents from a file or directory.
    ///
    /// Courses whose document is unchanged since the last run are skipped;
    /// changed documents replace their course's chunks.
    Ingest {
        /// File or directory of course transcripts.
        path: PathBuf,
    },

    /// Clear the index and ingest from scratch.
    ///
    /// Required after switching embedding models.
    Rebuild {
        /// File or directory of course transcripts.
        path: PathBuf,
    },

    /// Answer a question about the indexed courses.
    ///
    /// Each invocation is a fresh conversation; use `serve` for sessions.
    Ask { query: String },

    /// Search course content without the language model.
    Search {
        query: String,

        /// Course name (partial names are matched semantically).
        #[arg(long)]
        course: Option<String>,

        /// Restrict to one lesson number.
        #[arg(long)]
        lesson: Option<u32>,
    },

    /// Print the outline of a course.
    Outline {
        /// Course name (partial names are matched semantically).
        course: String,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve {
        /// Ingest this folder before serving. Already indexed courses are skipped.
        #[arg(long)]
        docs: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_report(report: &IngestReport) {
    println!(
        "Ingested: {} added, {} updated, {} skipped, {} failed ({} chunks written)",
        report.added, report.updated, report.skipped, report.failed, report.chunks
    );
}

fn print_sources(sources: &[Source]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for s in sources {
        match &s.link {
            Some(link) => println!("  - {} ({})", s.label(), link),
            None => println!("  - {}", s.label()),
        }
    }
}

/// Run one tool outside the model loop and print its output and citations.
async fn run_tool(cfg: &Config, name: &str, params: serde_json::Value) -> anyhow::Result<()> {
    let index = open_index(cfg).await?;
    let limit = cfg.retrieval.result_limit()?;
    let mut registry = ToolRegistry::with_course_tools(index, limit);

    let output = registry.execute(name, params).await;
    println!("{}", output);
    print_sources(&registry.drain_last_sources());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest { path } => {
            let index = open_index(&cfg).await?;
            let report = course_rag::ingest::ingest_path(&index, &cfg, &path).await?;
            print_report(&report);
        }
        Commands::Rebuild { path } => {
            let index = open_index(&cfg).await?;
            let report = course_rag::ingest::rebuild(&index, &cfg, &path).await?;
            print_report(&report);
        }
        Commands::Ask { query } => {
            let rag = RagSystem::from_config(cfg).await?;
            let answer = rag.answer_query(&query, None).await;
            println!("{}", answer.answer);
            print_sources(&answer.sources);
        }
        Commands::Search {
            query,
            course,
            lesson,
        } => {
            let mut params = json!({ "query": query });
            if let Some(course) = course {
                params["course_name"] = json!(course);
            }
            if let Some(lesson) = lesson {
                params["lesson_number"] = json!(lesson);
            }
            run_tool(&cfg, "search_course_content", params).await?;
        }
        Commands::Outline { course } => {
            run_tool(&cfg, "get_course_outline", json!({ "course_name": course })).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve { docs } => {
            let bind = cfg.server.bind.clone();
            let rag = RagSystem::from_config(cfg).await?;
            if let Some(docs) = docs {
                let report = rag.ingest_path(&docs).await?;
                print_report(&report);
            }
            server::run_server(Arc::new(rag), &bind).await?;
        }
    }

    Ok(())
}
