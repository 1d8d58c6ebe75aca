use std::path::Path;

use mupdf::{Document, Page, TextPageFlags};

use nauka_core::{BackendError, ExtractedText, TextExtractor};

/// MuPDF-based implementation of [`TextExtractor`].
///
/// This crate is the sole AGPL island: it isolates the mupdf dependency
/// (which is AGPL-3.0) so that the rest of the harvester does not
/// transitively depend on it.
///
/// Every text block of every page is kept, in reading order. Pages that
/// MuPDF cannot load or lay out are skipped and counted in
/// [`ExtractedText::failed_pages`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MupdfBackend;

impl MupdfBackend {
    pub fn new() -> Self {
        Self
    }
}

fn page_text(page: &Page) -> Result<String, mupdf::Error> {
    let text_page = page.to_text_page(TextPageFlags::empty())?;

    let mut text = String::new();
    for block in text_page.blocks() {
        for line in block.lines() {
            text.extend(line.chars().map(|c| c.char().unwrap_or('\u{FFFD}')));
            text.push('\n');
        }
    }
    Ok(text)
}

impl TextExtractor for MupdfBackend {
    fn extract_text(&self, path: &Path) -> Result<ExtractedText, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;

        let mut extracted = ExtractedText::default();
        for (index, page_result) in document
            .pages()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?
            .enumerate()
        {
            extracted.pages += 1;
            match page_result.and_then(|page| page_text(&page)) {
                Ok(text) => extracted.text.push_str(&text),
                Err(e) => {
                    tracing::debug!(page = index, error = %e, "skipping unreadable page");
                    extracted.failed_pages += 1;
                }
            }
        }

        Ok(extracted)
    }
}
