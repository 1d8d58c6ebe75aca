//! Parser for OAI-PMH `ListRecords` responses in the `oai_openaire` format.
//!
//! Uses SAX-style event processing and matches elements by local name within
//! their parent path, so the namespace prefixes chosen by the server do not
//! matter. Only the fields the harvester needs are kept: record language,
//! titles (with their `xml:lang` tag), file links (with their MIME type) and
//! the resumption token.

use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::OaiError;

/// A title of a record, optionally tagged with a language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleEntry {
    pub lang: Option<String>,
    pub text: String,
}

/// A file attached to a record (`oaire:file`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLink {
    pub mime_type: Option<String>,
    pub url: String,
}

/// The subset of an OAI-PMH record used for filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OaiRecord {
    pub identifier: Option<String>,
    /// `<header status="deleted">` records carry no metadata.
    pub deleted: bool,
    pub language: Option<String>,
    pub titles: Vec<TitleEntry>,
    pub files: Vec<FileLink>,
}

/// An `<error>` element returned instead of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}

impl ProtocolError {
    /// `noRecordsMatch` means the listing is empty, not that the request failed.
    pub fn is_no_records(&self) -> bool {
        self.code == "noRecordsMatch"
    }
}

/// One page of a `ListRecords` listing.
#[derive(Debug, Clone, Default)]
pub struct ListRecordsPage {
    pub records: Vec<OaiRecord>,
    /// `None` when the element is missing or empty: the listing is complete.
    pub resumption_token: Option<String>,
    pub complete_list_size: Option<u64>,
    pub error: Option<ProtocolError>,
}

/// Which value the text currently being read belongs to.
enum Capture {
    Identifier,
    Language,
    Title { lang: Option<String> },
    File { mime_type: Option<String> },
    Token,
    Error { code: String },
}

/// Parse a complete `ListRecords` response body.
///
/// Records with missing fields are still returned (with those fields empty) so
/// the filter can reject them individually; only an XML syntax error fails the
/// whole page.
pub fn parse_list_records<R: BufRead>(reader: R) -> Result<ListRecordsPage, OaiError> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(false);

    let mut buf = Vec::with_capacity(4096);
    let mut page = ListRecordsPage::default();

    // Local names of the currently open elements, outermost first.
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut record: Option<OaiRecord> = None;
    let mut capture: Option<(Capture, usize)> = None;
    let mut text_buf = String::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                path.push(e.local_name().as_ref().to_vec());
                if capture.is_none() {
                    capture = on_open(e, &path, &mut record, &mut page)
                        .map(|c| (c, path.len()));
                    text_buf.clear();
                }
            }

            Ok(Event::Empty(ref e)) => {
                // Self-closing elements have no text; only their attributes matter.
                path.push(e.local_name().as_ref().to_vec());
                if capture.is_none() {
                    if let Some(c) = on_open(e, &path, &mut record, &mut page) {
                        on_close(c, String::new(), &mut record, &mut page);
                    }
                }
                path.pop();
            }

            Ok(Event::Text(ref e)) => {
                if capture.is_some() {
                    let text = e
                        .unescape()
                        .map_err(|err| OaiError::Parse(err.to_string()))?;
                    text_buf.push_str(&text);
                }
            }

            Ok(Event::CData(ref e)) => {
                if capture.is_some() {
                    text_buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }

            Ok(Event::End(_)) => {
                if let Some((_, depth)) = capture {
                    if depth == path.len() {
                        if let Some((c, _)) = capture.take() {
                            let text = text_buf.trim().to_string();
                            on_close(c, text, &mut record, &mut page);
                        }
                    }
                }

                if path_ends_with(&path, &[b"ListRecords", b"record"]) {
                    if let Some(done) = record.take() {
                        page.records.push(done);
                    }
                }
                path.pop();
            }

            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(OaiError::Parse(format!(
                    "{} at byte {}",
                    e,
                    xml.buffer_position()
                )));
            }
            _ => {}
        }

        buf.clear();
    }

    Ok(page)
}

fn path_ends_with(path: &[Vec<u8>], suffix: &[&[u8]]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a.as_slice() == *b)
}

fn attribute(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == local)
        .map(|attr| String::from_utf8_lossy(&attr.value).trim().to_string())
}

/// Handle an opening tag; returns what to capture if the element carries a value.
fn on_open(
    e: &BytesStart<'_>,
    path: &[Vec<u8>],
    record: &mut Option<OaiRecord>,
    page: &mut ListRecordsPage,
) -> Option<Capture> {
    if path_ends_with(path, &[b"ListRecords", b"record"]) {
        *record = Some(OaiRecord::default());
        return None;
    }

    if path_ends_with(path, &[b"ListRecords", b"resumptionToken"]) {
        page.complete_list_size = attribute(e, b"completeListSize").and_then(|v| v.parse().ok());
        return Some(Capture::Token);
    }

    if path_ends_with(path, &[b"OAI-PMH", b"error"]) {
        let code = attribute(e, b"code").unwrap_or_default();
        return Some(Capture::Error { code });
    }

    let current = record.as_mut()?;

    if path_ends_with(path, &[b"record", b"header"]) {
        if attribute(e, b"status").as_deref() == Some("deleted") {
            current.deleted = true;
        }
        None
    } else if path_ends_with(path, &[b"header", b"identifier"]) {
        Some(Capture::Identifier)
    } else if path_ends_with(path, &[b"resource", b"language"]) {
        Some(Capture::Language)
    } else if path_ends_with(path, &[b"titles", b"title"]) {
        // `xml:lang` is the only attribute named `lang` used on titles.
        let lang = attribute(e, b"lang").filter(|l| !l.is_empty());
        Some(Capture::Title { lang })
    } else if path_ends_with(path, &[b"resource", b"file"]) {
        Some(Capture::File {
            mime_type: attribute(e, b"mimeType"),
        })
    } else {
        None
    }
}

fn on_close(
    capture: Capture,
    text: String,
    record: &mut Option<OaiRecord>,
    page: &mut ListRecordsPage,
) {
    match capture {
        Capture::Token => {
            page.resumption_token = Some(text).filter(|t| !t.is_empty());
        }
        Capture::Error { code } => {
            page.error = Some(ProtocolError {
                code,
                message: text,
            });
        }
        Capture::Identifier => {
            if let Some(r) = record.as_mut() {
                r.identifier = Some(text);
            }
        }
        Capture::Language => {
            if let Some(r) = record.as_mut() {
                if r.language.is_none() && !text.is_empty() {
                    r.language = Some(text);
                }
            }
        }
        Capture::Title { lang } => {
            if let Some(r) = record.as_mut() {
                if !text.is_empty() {
                    r.titles.push(TitleEntry { lang, text });
                }
            }
        }
        Capture::File { mime_type } => {
            if let Some(r) = record.as_mut() {
                if !text.is_empty() {
                    r.files.push(FileLink {
                        mime_type,
                        url: text,
                    });
                }
            }
        }
    }
}
