//! Stub collaborators shared by unit tests.

use std::path::Path;
use std::sync::Arc;

use crate::backend::{
    BackendError, ExtractedText, LinguisticStats, ScoreError, Scorer, TextExtractor,
};
use crate::ProgressFn;
use crate::pipeline::AnalyzerFactory;

/// Treats the downloaded file as UTF-8 text.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<ExtractedText, BackendError> {
        let text = std::fs::read_to_string(path)?;
        Ok(ExtractedText {
            text,
            pages: 1,
            failed_pages: 0,
        })
    }
}

/// Reports one word per character.
pub struct CountingScorer {
    pub max_length: usize,
}

impl Scorer for CountingScorer {
    fn max_length(&self) -> usize {
        self.max_length
    }

    fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    fn analyze(&mut self, text: &str) -> Result<LinguisticStats, ScoreError> {
        let length = text.chars().count();
        if length > self.max_length {
            return Err(ScoreError::TooLong {
                length,
                max_length: self.max_length,
            });
        }
        Ok(LinguisticStats {
            words: length as u64,
            ..Default::default()
        })
    }
}

pub fn no_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// Plain-text extraction with a [`CountingScorer`] limited to `max_length`.
pub fn plain_analyzers(max_length: usize) -> AnalyzerFactory {
    AnalyzerFactory::new(
        Arc::new(|| Box::new(PlainTextExtractor) as Box<dyn TextExtractor>),
        Arc::new(move || Box::new(CountingScorer { max_length }) as Box<dyn Scorer>),
    )
}
