//! Text extraction for uploaded documents.
//!
//! Uploads arrive either as text or as raw bytes plus a filename. A
//! [`TextExtractor`] turns them into UTF-8 text or an [`ExtractError`];
//! the ingestion pipeline records the error against that one document and
//! moves on.

use std::path::Path;
use thiserror::Error;

/// Extensions accepted by [`PlainTextExtractor`]. Files without an
/// extension are read as plain text too.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "csv", "tsv", "json", "log"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unsupported file type: .{0}")]
    UnsupportedExtension(String),
    #[error("file is not valid UTF-8 text")]
    NotUtf8,
    #[error("document contains no text")]
    Empty,
}

pub trait TextExtractor: Send + Sync {
    /// Extract text from `bytes`, using `filename` to pick a decoder.
    fn extract(&self, filename: &str, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Decodes UTF-8 text files; rejects anything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
        if let Some(ext) = Path::new(filename).extension() {
            let ext = ext.to_string_lossy().to_lowercase();
            if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
                return Err(ExtractError::UnsupportedExtension(ext));
            }
        }
        let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::NotUtf8)?;
        // Strip a UTF-8 BOM left by spreadsheet exports.
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        if text.trim().is_empty() {
            return Err(ExtractError::Empty);
        }
        Ok(text.to_string())
    }
}
