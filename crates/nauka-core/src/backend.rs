//! Seams for the three external collaborators of the pipeline: text
//! extraction, linguistic scoring and the corpus archive.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::DocumentStats;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text pulled out of a document, page by page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub pages: usize,
    /// Pages that could not be read and were skipped.
    pub failed_pages: usize,
}

/// Trait for document text extraction backends.
///
/// Implementations should skip pages they cannot read rather than fail the
/// whole document; an `Err` means the document could not be opened at all.
pub trait TextExtractor: Send {
    fn extract_text(&self, path: &Path) -> Result<ExtractedText, BackendError>;
}

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("text of length {length} exceeds maximum of {max_length}")]
    TooLong { length: usize, max_length: usize },
    #[error("scoring failed: {0}")]
    Other(String),
}

/// Counts produced by a linguistic tagger for one text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinguisticStats {
    pub sentences: u64,
    pub words: u64,
    pub verbs: u64,
    pub nouns: u64,
    pub punctuations: u64,
    pub symbols: u64,
}

/// A linguistic tagger. Instances are owned by a single worker.
pub trait Scorer: Send {
    /// Longest input (in characters) accepted by [`analyze`](Scorer::analyze).
    fn max_length(&self) -> usize;

    fn set_max_length(&mut self, max_length: usize);

    fn analyze(&mut self, text: &str) -> Result<LinguisticStats, ScoreError>;
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("archive already committed")]
    Committed,
}

/// Append-only corpus writer.
pub trait ArchiveSink: Send {
    fn add(&mut self, text: &str, meta: &DocumentStats) -> Result<(), ArchiveError>;

    /// Flush and compress everything added so far into a single file and
    /// return its path. A sink with no records still produces a file.
    fn commit(&mut self) -> Result<PathBuf, ArchiveError>;
}
