//! Corpus manifest: descriptive fields, archive size and corpus totals.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregator::CorpusTotals;
use crate::CoreError;

/// Descriptive manifest fields. Defaults describe the bibliotekanauki.pl corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    pub project: String,
    /// Corpus name; also the stem of the published file names.
    pub name: String,
    pub description: String,
    pub license: String,
    pub language: String,
    pub source_name: String,
    pub source_url: String,
    pub source_license: String,
}

impl Default for ManifestInfo {
    fn default() -> Self {
        Self {
            project: "SpeakLeash".to_string(),
            name: "biblioteka_nauki_pl_corpus".to_string(),
            description: "Collection of Polish science books, chapters and articles from bibliotekanauki.pl corpus".to_string(),
            license: "TBC".to_string(),
            language: "pl".to_string(),
            source_name: "biblioteka_nauki_pl_corpus".to_string(),
            source_url: "https://bibliotekanauki.pl".to_string(),
            source_license: "TBC".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSource {
    pub name: String,
    pub url: String,
    pub license: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStats {
    pub documents: u64,
    pub sentences: u64,
    pub words: u64,
    pub nouns: u64,
    pub verbs: u64,
    pub characters: u64,
    pub punctuations: u64,
    pub symbols: u64,
}

impl From<&CorpusTotals> for ManifestStats {
    fn from(t: &CorpusTotals) -> Self {
        Self {
            documents: t.documents,
            sentences: t.sentences,
            words: t.words,
            nouns: t.nouns,
            verbs: t.verbs,
            characters: t.characters,
            punctuations: t.punctuations,
            symbols: t.symbols,
        }
    }
}

/// The JSON document written next to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub project: String,
    pub name: String,
    pub description: String,
    pub license: String,
    pub language: String,
    /// Size of the published archive in bytes.
    pub file_size: u64,
    pub sources: Vec<ManifestSource>,
    pub stats: ManifestStats,
}

impl Manifest {
    pub fn new(info: &ManifestInfo, file_size: u64, totals: &CorpusTotals) -> Self {
        Self {
            project: info.project.clone(),
            name: info.name.clone(),
            description: info.description.clone(),
            license: info.license.clone(),
            language: info.language.clone(),
            file_size,
            sources: vec![ManifestSource {
                name: info.source_name.clone(),
                url: info.source_url.clone(),
                license: info.source_license.clone(),
            }],
            stats: ManifestStats::from(totals),
        }
    }

    /// Serialize with four-space indentation.
    pub fn to_json(&self) -> Result<String, CoreError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| CoreError::Task(e.to_string()))
    }

    pub fn write(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
