//! Sliding-window text chunker.
//!
//! Splits document text into fixed-size, overlapping character windows.
//! Sizes are counted in Unicode scalar values, so multi-byte text is never
//! split inside a character.
//!
//! # Algorithm
//!
//! 1. If the text has at most `chunk_size` characters, emit it as a
//!    single chunk (empty text included).
//! 2. Otherwise emit `[start, start + chunk_size)`, then advance `start`
//!    by `chunk_size - chunk_overlap`.
//! 3. Stop once a window reaches the end of the text; the final window
//!    may be shorter than `chunk_size`.
//!
//! For text longer than `chunk_size` the number of chunks is
//! `ceil((len - overlap) / (size - overlap))`.
//!
//! # Example
//!
//! ```rust
//! use finance_rag_core::chunk::{Chunker, ChunkingConfig};
//!
//! let chunker = Chunker::new(&ChunkingConfig { chunk_size: 4, chunk_overlap: 1 }).unwrap();
//! let spans = chunker.split("abcdefghij");
//! let texts: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
//! assert_eq!(texts, ["abcd", "defg", "ghij"]);
//! ```

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkMetadata, Document};

/// Chunk window parameters, in characters.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// A contiguous span of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub index: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// Validated chunker.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Fails with [`RagError::InvalidConfig`] when `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(RagError::InvalidConfig(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self {
            size: config.chunk_size,
            overlap: config.chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into overlapping spans.
    pub fn split(&self, text: &str) -> Vec<TextSpan> {
        // Byte offset of every char boundary, including the end of the text.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let len = bounds.len() - 1;

        if len <= self.size {
            return vec![TextSpan {
                index: 0,
                char_start: 0,
                char_end: len,
                text: text.to_string(),
            }];
        }

        let step = self.size - self.overlap;
        let mut spans = Vec::with_capacity(len.div_ceil(step));
        let mut start = 0;
        loop {
            let end = (start + self.size).min(len);
            spans.push(TextSpan {
                index: spans.len(),
                char_start: start,
                char_end: end,
                text: text[bounds[start]..bounds[end]].to_string(),
            });
            if end == len {
                break;
            }
            start += step;
        }
        spans
    }

    /// Split a document into [`Chunk`]s with empty embeddings.
    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        self.split(&doc.text)
            .into_iter()
            .map(|span| make_chunk(doc, span))
            .collect()
    }
}

fn make_chunk(doc: &Document, span: TextSpan) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(span.text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: format!("{}:{}", doc.id, span.index),
        document_id: doc.id.clone(),
        chunk_index: span.index as i64,
        text: span.text,
        hash,
        embedding: Vec::new(),
        metadata: ChunkMetadata {
            source: doc.filename.clone(),
            char_start: span.char_start,
            char_end: span.char_end,
            uploaded_at: doc.uploaded_at,
        },
    }
}
