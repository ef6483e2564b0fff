//! # Finance RAG
//!
//! Question answering over uploaded finance documents with
//! retrieval-augmented generation and two interchangeable LLM backends.
//!
//! Documents are chunked, embedded, and stored in a local SQLite vector
//! index. A question retrieves the most relevant chunks, which are sent to
//! a hosted model (Google Gemini), a local model (Ollama), or both at once.
//! The answers come back as one response with cited passages and
//! suggested next steps.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ Uploads  │──▶│   Pipeline    │──▶│  SQLite   │
//! │ files    │   │ Chunk+Embed  │   │  vectors  │
//! └──────────┘   └──────────────┘   └────┬─────┘
//!                                        │ retrieve
//!                                        ▼
//!                   ┌────────────────────────────┐
//!                   │        Synthesizer         │
//!                   │  hosted ◀──┬──▶ local      │
//!                   └────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! finrag init
//! finrag ingest ./statements
//! finrag ask "What fees did I pay last quarter?" --hosted --local
//! finrag status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_index`] | SQLite-backed vector index |
//! | [`embedding`] | Embedding providers |
//! | [`backend`] | Gemini and Ollama generation backends |
//! | [`synth`] | Multi-backend answer synthesis |
//! | [`extract`] | Text extraction from uploads |
//! | [`ingest`] | Ingestion pipeline and path scanning |
//! | [`analyze`] | Single-document analysis |
//! | [`status`] | Index and backend health |
//! | [`engine`] | The assembled engine used by the CLI |

pub mod analyze;
pub mod backend;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod sqlite_index;
pub mod status;
pub mod synth;

pub use finance_rag_core as core;
