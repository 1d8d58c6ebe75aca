//! Single-writer fold of document results into the archive and the corpus totals.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::ArchiveSink;
use crate::manifest::{Manifest, ManifestInfo};
use crate::{CoreError, DocumentResult, DocumentStats, Outcome, ProgressEvent, ProgressFn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    Running,
    Finalizing,
    Done,
}

/// Sums over every accepted document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusTotals {
    pub documents: u64,
    pub characters: u64,
    pub sentences: u64,
    pub words: u64,
    pub verbs: u64,
    pub nouns: u64,
    pub punctuations: u64,
    pub symbols: u64,
}

impl CorpusTotals {
    pub fn add(&mut self, stats: &DocumentStats) {
        self.documents += 1;
        self.characters += stats.char_length;
        self.sentences += stats.sentences;
        self.words += stats.words;
        self.verbs += stats.verbs;
        self.nouns += stats.nouns;
        self.punctuations += stats.punctuations;
        self.symbols += stats.symbols;
    }
}

/// Where the finished corpus is published.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub archive_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: ManifestInfo,
}

/// Outcome of a finalized run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub totals: CorpusTotals,
    /// Rejected documents by reason.
    pub rejections: BTreeMap<&'static str, u64>,
    pub archive_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
}

impl RunReport {
    pub fn rejected(&self) -> u64 {
        self.rejections.values().sum()
    }
}

pub struct Aggregator<S: ArchiveSink> {
    sink: S,
    state: AggregatorState,
    totals: CorpusTotals,
    rejections: BTreeMap<&'static str, u64>,
    progress: ProgressFn,
}

impl<S: ArchiveSink> Aggregator<S> {
    pub fn new(sink: S, progress: ProgressFn) -> Self {
        Self {
            sink,
            state: AggregatorState::Running,
            totals: CorpusTotals::default(),
            rejections: BTreeMap::new(),
            progress,
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn totals(&self) -> &CorpusTotals {
        &self.totals
    }

    /// Append an accepted document to the archive, or count a rejection.
    pub fn ingest(&mut self, result: DocumentResult) -> Result<(), CoreError> {
        self.expect_running("ingest")?;

        let DocumentResult { entry, outcome } = result;
        match outcome {
            Outcome::Accepted { text, stats } => {
                self.sink.add(&text, &stats)?;
                self.totals.add(&stats);
                (self.progress)(ProgressEvent::Accepted {
                    url: entry.download_url,
                    title: entry.title,
                    documents: self.totals.documents,
                });
            }
            Outcome::Rejected(rejection) => {
                *self.rejections.entry(rejection.kind()).or_default() += 1;
                tracing::debug!(url = %entry.download_url, %rejection, "document rejected");
                (self.progress)(ProgressEvent::Rejected {
                    url: entry.download_url,
                    title: entry.title,
                    rejection,
                });
            }
        }
        Ok(())
    }

    /// Commit the archive, publish it under `target` and write the manifest.
    pub fn finalize(&mut self, target: &PublishTarget) -> Result<RunReport, CoreError> {
        self.expect_running("finalize")?;
        self.state = AggregatorState::Finalizing;
        (self.progress)(ProgressEvent::Finalizing);

        let committed = self.sink.commit()?;
        publish(&committed, &target.archive_path)?;
        let file_size = std::fs::metadata(&target.archive_path)?.len();

        let manifest = Manifest::new(&target.manifest, file_size, &self.totals);
        manifest.write(&target.manifest_path)?;

        tracing::info!(
            archive = %target.archive_path.display(),
            documents = self.totals.documents,
            file_size,
            "corpus published"
        );

        self.state = AggregatorState::Done;
        Ok(RunReport {
            totals: self.totals,
            rejections: self.rejections.clone(),
            archive_path: target.archive_path.clone(),
            manifest_path: target.manifest_path.clone(),
            manifest,
        })
    }

    fn expect_running(&self, action: &'static str) -> Result<(), CoreError> {
        if self.state == AggregatorState::Running {
            Ok(())
        } else {
            Err(CoreError::InvalidState {
                state: self.state,
                action,
            })
        }
    }
}

/// Move the committed artifact to its published name, copying across filesystems.
fn publish(committed: &Path, destination: &Path) -> Result<(), CoreError> {
    if committed == destination {
        return Ok(());
    }
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(committed, destination).is_err() {
        std::fs::copy(committed, destination)?;
        std::fs::remove_file(committed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ArchiveError;
    use crate::{CatalogEntry, LinguisticStats, Rejection};
    use std::sync::{Arc, Mutex};

    /// Keeps records in memory and writes one line per record on commit.
    struct MemorySink {
        dir: PathBuf,
        records: Vec<(String, DocumentStats)>,
        committed: bool,
    }

    impl ArchiveSink for MemorySink {
        fn add(&mut self, text: &str, meta: &DocumentStats) -> Result<(), ArchiveError> {
            if self.committed {
                return Err(ArchiveError::Committed);
            }
            self.records.push((text.to_string(), meta.clone()));
            Ok(())
        }

        fn commit(&mut self) -> Result<PathBuf, ArchiveError> {
            self.committed = true;
            let path = self.dir.join("chunk.jsonl");
            let lines: Vec<String> = self.records.iter().map(|(t, _)| t.clone()).collect();
            std::fs::write(&path, lines.join("\n"))?;
            Ok(path)
        }
    }

    fn sink(dir: &Path) -> MemorySink {
        MemorySink {
            dir: dir.to_path_buf(),
            records: Vec::new(),
            committed: false,
        }
    }

    fn accepted(n: u64) -> DocumentResult {
        let entry = CatalogEntry::new(format!("https://h/{n}.pdf"), format!("Doc {n}"));
        let text = "x".repeat(100 + n as usize);
        let stats = DocumentStats::new(
            &entry,
            text.len() as u64,
            LinguisticStats {
                sentences: n,
                words: 10 * n,
                verbs: n,
                nouns: 2 * n,
                punctuations: 3 * n,
                symbols: 1,
            },
        );
        DocumentResult::accepted(entry, text, stats)
    }

    fn target(dir: &Path) -> PublishTarget {
        PublishTarget {
            archive_path: dir.join("out").join("corpus.jsonl.gz"),
            manifest_path: dir.join("out").join("corpus.manifest"),
            manifest: ManifestInfo::default(),
        }
    }

    #[test]
    fn test_totals_are_sums_of_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let ev = events.clone();
        let mut agg = Aggregator::new(
            sink(dir.path()),
            Arc::new(move |e| ev.lock().unwrap().push(e)),
        );

        agg.ingest(accepted(1)).unwrap();
        agg.ingest(DocumentResult::rejected(
            CatalogEntry::new("https://h/bad.pdf", "Bad"),
            Rejection::EmptyTextLayer { chars: 3 },
        ))
        .unwrap();
        agg.ingest(accepted(2)).unwrap();
        agg.ingest(DocumentResult::rejected(
            CatalogEntry::new("https://h/no.pdf", "No"),
            Rejection::PolicyDenied,
        ))
        .unwrap();

        let report = agg.finalize(&target(dir.path())).unwrap();
        assert_eq!(agg.state(), AggregatorState::Done);

        let t = report.totals;
        assert_eq!(t.documents, 2);
        assert_eq!(t.characters, 101 + 102);
        assert_eq!(t.sentences, 3);
        assert_eq!(t.words, 30);
        assert_eq!(t.verbs, 3);
        assert_eq!(t.nouns, 6);
        assert_eq!(t.punctuations, 9);
        assert_eq!(t.symbols, 2);
        assert_eq!(report.rejected(), 2);
        assert_eq!(report.rejections["empty_text_layer"], 1);
        assert_eq!(report.rejections["policy_denied"], 1);

        assert_eq!(report.manifest.stats.words, 30);
        assert_eq!(report.manifest.stats.characters, 203);
        assert_eq!(
            report.manifest.file_size,
            std::fs::metadata(&report.archive_path).unwrap().len()
        );
        assert!(report.manifest_path.exists());
        assert!(!dir.path().join("chunk.jsonl").exists());

        let events = events.lock().unwrap();
        let accepted_events = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Accepted { .. }))
            .count();
        assert_eq!(accepted_events, 2);
        assert!(matches!(events.last(), Some(ProgressEvent::Finalizing)));
    }

    #[test]
    fn test_empty_run_publishes_zero_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut agg = Aggregator::new(sink(dir.path()), Arc::new(|_| {}));
        let report = agg.finalize(&target(dir.path())).unwrap();

        assert_eq!(report.totals, CorpusTotals::default());
        let written: Manifest =
            serde_json::from_str(&std::fs::read_to_string(&report.manifest_path).unwrap())
                .unwrap();
        assert_eq!(written.stats.documents, 0);
        assert_eq!(written.file_size, 0);
    }

    #[test]
    fn test_ingest_after_finalize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut agg = Aggregator::new(sink(dir.path()), Arc::new(|_| {}));
        agg.finalize(&target(dir.path())).unwrap();

        let err = agg.ingest(accepted(1)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidState {
                state: AggregatorState::Done,
                action: "ingest"
            }
        ));
        assert!(agg.finalize(&target(dir.path())).is_err());
        assert_eq!(agg.totals().documents, 0);
    }
}
