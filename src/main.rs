//! # Finance RAG CLI (`finrag`)
//!
//! ## Usage
//!
//! ```bash
//! finrag --config ./config/finrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `finrag init` | Create the SQLite database and schema |
//! | `finrag ingest <paths…>` | Chunk, embed, and index files or directories |
//! | `finrag ask "<question>"` | Answer a question from the indexed documents |
//! | `finrag search "<query>"` | Show the passages a question would retrieve |
//! | `finrag analyze <files…>` | Summarize documents with the LLM backends |
//! | `finrag status` | Index counts and backend health |
//! | `finrag collections` | List collections in the index |
//! | `finrag documents` | List indexed documents |
//!
//! Log verbosity follows `RUST_LOG` (default `finance_rag=info`); logs go to
//! stderr so `--json` output stays clean.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use finance_rag::config;
use finance_rag::engine::RagEngine;
use finance_rag::migrate;
use finance_rag::core::models::{ChatResponse, IngestReport, Outcome};

/// Finance RAG: question answering over your finance documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/finrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "finrag",
    about = "Question answering over finance documents with hosted and local LLMs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/finrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Ingest files or directories.
    ///
    /// Directories are walked recursively and filtered by
    /// `ingest.include_globs` / `ingest.exclude_globs`.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Print the ingest report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question using the indexed documents.
    ///
    /// Without `--hosted` or `--local`, the hosted backend is used.
    Ask {
        question: String,

        /// Use the hosted backend (Gemini).
        #[arg(long)]
        hosted: bool,

        /// Use the local backend (Ollama).
        #[arg(long)]
        local: bool,

        /// Number of passages to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the passages retrieved for a query.
    Search {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Analyze one or more documents with the LLM backends.
    ///
    /// Prints one report per file with its size, type, and a short preview.
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long)]
        hosted: bool,

        #[arg(long)]
        local: bool,
    },

    /// Show index counts and backend health.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// List collections in the index.
    Collections,

    /// List indexed documents.
    Documents,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("finance_rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Default to the hosted backend when neither flag is given.
fn backend_flags(hosted: bool, local: bool) -> (bool, bool) {
    if !hosted && !local {
        (true, false)
    } else {
        (hosted, local)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = RagEngine::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Ingest { paths, json } => {
            let report = engine.ingest_paths(&paths).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_ingest_report(&report);
            }
        }
        Commands::Ask {
            question,
            hosted,
            local,
            top_k,
            json,
        } => {
            let (hosted, local) = backend_flags(hosted, local);
            let response = engine.ask(&question, top_k, hosted, local).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Commands::Search { query, top_k, json } => {
            let passages = engine.search(&query, top_k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&passages)?);
            } else if passages.is_empty() {
                println!("No results.");
            } else {
                for p in &passages {
                    println!(
                        "{}. [{:.2} {}] {} ({})",
                        p.rank,
                        p.score,
                        p.relevance.as_str(),
                        p.chunk.source(),
                        p.chunk.id
                    );
                    println!("   {}", snippet(&p.chunk.text, 200));
                }
            }
        }
        Commands::Analyze {
            files,
            hosted,
            local,
        } => {
            let (hosted, local) = backend_flags(hosted, local);
            let batch = engine.analyze_files(&files, hosted, local).await?;
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }
        Commands::Status { json } => {
            let report = engine.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        }
        Commands::Collections => {
            for c in engine.collections().await? {
                println!("{}", c);
            }
        }
        Commands::Documents => {
            let docs = engine.list_documents().await?;
            if docs.is_empty() {
                println!("No documents indexed.");
            } else {
                println!("{:<18} {:>6}  {:<20}  {}", "ID", "CHUNKS", "UPLOADED", "SOURCE");
                for d in docs {
                    println!(
                        "{:<18} {:>6}  {:<20}  {}",
                        d.document_id, d.chunks, d.uploaded_at, d.source
                    );
                }
            }
        }
    }

    engine.close().await;
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

fn print_ingest_report(report: &IngestReport) {
    println!("ingest");
    println!("  documents processed: {}", report.processed);
    println!("  chunks written: {}", report.total_chunks);
    println!("  failed: {}", report.failed.len());
    for f in &report.failed {
        println!("    {}: {}", f.filename, f.reason);
    }
    println!("ok");
}

/// The primary answer, or one headed section per backend when more than
/// one answered.
fn answer_text(response: &ChatResponse) -> String {
    let answered: Vec<_> = response
        .backends
        .iter()
        .filter_map(|b| b.answer().map(|a| (b, a)))
        .collect();
    if answered.len() < 2 {
        return response.answer.clone();
    }
    answered
        .iter()
        .map(|(b, a)| format!("== {} ({}) ==\n{}", b.backend, b.model, a.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn print_response(response: &ChatResponse) {
    println!("{}", answer_text(response));

    if !response.key_points.is_empty() {
        println!("\nKey points:");
        for point in &response.key_points {
            println!("  - {}", point);
        }
    }
    if !response.citations.is_empty() {
        println!("\nSources:");
        for c in &response.citations {
            println!(
                "  [{}] {} (score {:.2}, {})",
                c.label,
                c.chunk.source(),
                c.score,
                c.relevance.as_str()
            );
        }
    }
    if !response.next_steps.is_empty() {
        println!("\nNext steps:");
        for step in &response.next_steps {
            println!("  - {}", step);
        }
    }

    println!();
    for b in &response.backends {
        match &b.outcome {
            Outcome::Answered(_) => println!("  {} ({}): ok in {} ms", b.backend, b.model, b.elapsed_ms),
            Outcome::Failed(e) => println!("  {} ({}): {}", b.backend, b.model, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finance_rag::core::models::{
        BackendOutcome, OutputFormat, ResponseStatus, SynthesizedAnswer,
    };
    use finance_rag::core::BackendError;

    fn answered(backend: &str, text: &str) -> BackendOutcome {
        BackendOutcome {
            backend: backend.to_string(),
            model: format!("{}-model", backend),
            elapsed_ms: 10,
            outcome: Outcome::Answered(SynthesizedAnswer {
                answer: text.to_string(),
                key_points: Vec::new(),
                next_steps: Vec::new(),
                citations: Vec::new(),
                format: OutputFormat::PlainText,
                raw_output: text.to_string(),
            }),
        }
    }

    fn response(backends: Vec<BackendOutcome>) -> ChatResponse {
        ChatResponse {
            id: "r1".to_string(),
            query: "What is the APR?".to_string(),
            status: ResponseStatus::Complete,
            answer: "APR is 19.9%.".to_string(),
            key_points: Vec::new(),
            next_steps: Vec::new(),
            citations: Vec::new(),
            produced_by: Vec::new(),
            backends,
            passages_considered: 1,
        }
    }

    #[test]
    fn test_answer_text_shows_every_answering_backend() {
        let r = response(vec![
            answered("hosted", "APR is 19.9%."),
            answered("local", "The purchase APR is 19.9 percent."),
        ]);
        let text = answer_text(&r);
        assert!(text.contains("== hosted (hosted-model) ==\nAPR is 19.9%."));
        assert!(text.contains("== local (local-model) ==\nThe purchase APR is 19.9 percent."));
    }

    #[test]
    fn test_answer_text_single_backend_is_primary_answer() {
        let failed = BackendOutcome {
            backend: "local".to_string(),
            model: "llama3.2".to_string(),
            elapsed_ms: 3,
            outcome: Outcome::Failed(BackendError::unavailable("service not running")),
        };
        let r = response(vec![answered("hosted", "APR is 19.9%."), failed]);
        assert_eq!(answer_text(&r), "APR is 19.9%.");
    }
}
