//! OAI-PMH catalog client for bibliotekanauki.pl.
//!
//! Walks the `ListRecords` listing of one or more repositories page by page,
//! following resumption tokens, and turns every record that passes the
//! language/format filter into a [`CatalogEntry`]. Entries are pushed into a
//! bounded channel so that downstream workers can start on the first page
//! while the rest of the catalog is still being listed.

pub mod crawler;
pub mod filter;
pub mod xml_parser;

use serde::Serialize;
use thiserror::Error;

pub use crawler::{
    CatalogCrawler, CatalogStream, CrawlSummary, CrawlerConfig, RepositoryOutcome,
    RepositorySummary, UrlGate,
};
pub use filter::{PDF_MIME_TYPE, RecordFilter, RecordRejection};
pub use xml_parser::{FileLink, ListRecordsPage, OaiRecord, ProtocolError, TitleEntry};

/// Default catalog host.
pub const DEFAULT_BASE_URL: &str = "https://bibliotekanauki.pl";

/// Metadata format requested on the first page of every repository.
pub const DEFAULT_METADATA_PREFIX: &str = "oai_openaire";

/// Repositories harvested when none are configured, in crawl order.
pub const DEFAULT_REPOSITORIES: &[&str] = &["books", "chapters", "articles"];

#[derive(Error, Debug)]
pub enum OaiError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Status(reqwest::StatusCode),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("OAI-PMH error {code}: {message}")]
    Protocol { code: String, message: String },
    #[error("invalid catalog URL: {0}")]
    Url(#[from] url::ParseError),
}

/// A downloadable document found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub download_url: String,
    pub title: String,
}

impl CatalogEntry {
    pub fn new(download_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            download_url: download_url.into(),
            title: title.into(),
        }
    }
}
