//! Record filter: keeps records in the target language that link a PDF.

use crate::CatalogEntry;
use crate::xml_parser::OaiRecord;

pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Why a record did not become a [`CatalogEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRejection {
    Deleted,
    MissingLanguage,
    WrongLanguage(String),
    NoPdfLink,
    NoTitle,
}

/// Language and format criteria applied to every catalog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    /// Required value of the record language (ISO 639-2, e.g. `pol`).
    pub language: String,
    /// Preferred `xml:lang` of the title (ISO 639-1, e.g. `pl`).
    pub title_language: String,
    pub mime_type: String,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self::new("pol", "pl")
    }
}

impl RecordFilter {
    pub fn new(language: impl Into<String>, title_language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            title_language: title_language.into(),
            mime_type: PDF_MIME_TYPE.to_string(),
        }
    }

    /// Apply the filter to one record.
    ///
    /// The first file with a matching MIME type is used. The title tagged
    /// with `title_language` wins; otherwise the first untagged title, and
    /// failing that the first title in any language.
    pub fn select_entry(&self, record: &OaiRecord) -> Result<CatalogEntry, RecordRejection> {
        if record.deleted {
            return Err(RecordRejection::Deleted);
        }

        match record.language.as_deref().map(str::trim) {
            None | Some("") => return Err(RecordRejection::MissingLanguage),
            Some(lang) if lang != self.language => {
                return Err(RecordRejection::WrongLanguage(lang.to_string()));
            }
            Some(_) => {}
        }

        let file = record
            .files
            .iter()
            .find(|f| f.mime_type.as_deref() == Some(self.mime_type.as_str()))
            .ok_or(RecordRejection::NoPdfLink)?;

        let tagged = record.titles.iter().find(|t| {
            t.lang
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(&self.title_language))
        });
        let untagged = || record.titles.iter().find(|t| t.lang.is_none());
        let title = tagged
            .or_else(untagged)
            .or_else(|| record.titles.first())
            .ok_or(RecordRejection::NoTitle)?;

        Ok(CatalogEntry::new(file.url.clone(), title.text.clone()))
    }
}
