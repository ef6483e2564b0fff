//! # Finance RAG Core
//!
//! Runtime-agnostic logic for Finance RAG: data models, the error
//! taxonomy, chunking, the embedder and vector index abstractions,
//! retrieval and ranking, prompt construction, and tolerant parsing of
//! model output into cited answers.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! embedding providers, the SQLite index, and the LLM backend adapters
//! live in the `finance-rag` app crate.

pub mod backend;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod next_steps;
pub mod parse;
pub mod prompt;
pub mod retrieve;
pub mod store;

pub use error::{BackendError, BackendErrorKind, RagError, Result};
