//! Per-document processing: gate, fetch, extract, threshold, score.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use crate::backend::{LinguisticStats, Scorer, TextExtractor};
use crate::fetcher::DocumentFetcher;
use crate::politeness::{PolitenessGate, RobotsFallback};
use crate::pool::WorkerFactory;
use crate::{CatalogEntry, Config, DocumentResult, DocumentStats, ProgressEvent, ProgressFn, Rejection};

/// Extra characters granted to the scorer when a text exceeds its limit.
pub const SCORER_HEADROOM: usize = 100;

pub type ExtractorFactory = Arc<dyn Fn() -> Box<dyn TextExtractor> + Send + Sync>;
pub type ScorerFactory = Arc<dyn Fn() -> Box<dyn Scorer> + Send + Sync>;

/// Extraction and scoring state owned by one worker.
pub struct Analyzer {
    extractor: Box<dyn TextExtractor>,
    scorer: Box<dyn Scorer>,
}

impl Analyzer {
    pub fn new(extractor: Box<dyn TextExtractor>, scorer: Box<dyn Scorer>) -> Self {
        Self { extractor, scorer }
    }

    /// Extract the file's text and score it.
    ///
    /// A document that cannot be opened is treated as having no text.
    pub fn analyze_file(
        &mut self,
        path: &Path,
        min_text_chars: usize,
    ) -> Result<(String, LinguisticStats), Rejection> {
        let text = match self.extractor.extract_text(path) {
            Ok(extracted) => {
                if extracted.failed_pages > 0 {
                    tracing::debug!(
                        pages = extracted.pages,
                        failed = extracted.failed_pages,
                        "skipped unreadable pages"
                    );
                }
                extracted.text
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "text extraction failed");
                String::new()
            }
        };
        self.analyze_text(&text, min_text_chars)
    }

    /// Trim, apply the minimum length and score. Returns the trimmed text.
    pub fn analyze_text(
        &mut self,
        text: &str,
        min_text_chars: usize,
    ) -> Result<(String, LinguisticStats), Rejection> {
        let trimmed = text.trim();
        let chars = trimmed.chars().count();
        if chars < min_text_chars {
            return Err(Rejection::EmptyTextLayer { chars });
        }

        if chars > self.scorer.max_length() {
            self.scorer.set_max_length(chars + SCORER_HEADROOM);
        }

        let stats = self
            .scorer
            .analyze(trimmed)
            .map_err(|e| Rejection::Scoring(e.to_string()))?;
        Ok((trimmed.to_string(), stats))
    }
}

/// Builds a fresh [`Analyzer`] from its two parts.
#[derive(Clone)]
pub struct AnalyzerFactory {
    extractor: ExtractorFactory,
    scorer: ScorerFactory,
}

impl AnalyzerFactory {
    pub fn new(extractor: ExtractorFactory, scorer: ScorerFactory) -> Self {
        Self { extractor, scorer }
    }

    pub fn build(&self) -> Analyzer {
        Analyzer::new((self.extractor)(), (self.scorer)())
    }
}

/// Everything one worker needs, never shared with other workers.
pub struct Worker {
    id: usize,
    gate: PolitenessGate,
    fetcher: DocumentFetcher,
    /// `None` while moved onto the blocking pool, or after a panic there.
    analyzer: Option<Analyzer>,
    analyzers: AnalyzerFactory,
    min_text_chars: usize,
    progress: ProgressFn,
}

impl Worker {
    pub fn new(
        id: usize,
        gate: PolitenessGate,
        fetcher: DocumentFetcher,
        analyzers: AnalyzerFactory,
        min_text_chars: usize,
        progress: ProgressFn,
    ) -> Self {
        Self {
            id,
            gate,
            fetcher,
            analyzer: Some(analyzers.build()),
            analyzers,
            min_text_chars,
            progress,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Turn one catalog entry into exactly one result.
    pub async fn process(&mut self, entry: CatalogEntry) -> DocumentResult {
        (self.progress)(ProgressEvent::Processing {
            worker: self.id,
            title: entry.title.clone(),
            url: entry.download_url.clone(),
        });

        if !self.gate.allowed(&entry.download_url) {
            tracing::debug!(url = %entry.download_url, "disallowed by robots.txt");
            return DocumentResult::rejected(entry, Rejection::PolicyDenied);
        }

        let progress = self.progress.clone();
        let worker = self.id;
        let url = entry.download_url.clone();
        let raw = match self
            .fetcher
            .fetch(&entry.download_url, |bytes_downloaded, total_bytes| {
                progress(ProgressEvent::Downloading {
                    worker,
                    url: url.clone(),
                    bytes_downloaded,
                    total_bytes,
                })
            })
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::info!(url = %entry.download_url, error = %e, "download failed");
                return DocumentResult::rejected(entry, e.into());
            }
        };

        let mut analyzer = match self.analyzer.take() {
            Some(analyzer) => analyzer,
            None => {
                tracing::info!(worker = self.id, "rebuilding text analyzer");
                self.analyzers.build()
            }
        };

        let min_text_chars = self.min_text_chars;
        let handle = tokio::task::spawn_blocking(move || {
            let result = analyzer.analyze_file(raw.path(), min_text_chars);
            raw.discard();
            (analyzer, result)
        });

        let analysis = match handle.await {
            Ok((analyzer, result)) => {
                self.analyzer = Some(analyzer);
                result
            }
            Err(e) => {
                tracing::error!(worker = self.id, error = %e, "analysis task panicked");
                Err(Rejection::Scoring(format!("analysis task panicked: {}", e)))
            }
        };

        match analysis {
            Ok((text, stats)) => {
                let stats = DocumentStats::new(&entry, text.chars().count() as u64, stats);
                DocumentResult::accepted(entry, text, stats)
            }
            Err(rejection) => DocumentResult::rejected(entry, rejection),
        }
    }
}

/// Builds production workers: robots.txt gate, streaming fetcher and
/// caller-supplied extractor and scorer.
pub struct StandardWorkerFactory {
    client: reqwest::Client,
    robots_url: String,
    user_agent: String,
    fallback: RobotsFallback,
    tmp_dir: PathBuf,
    min_text_chars: usize,
    analyzers: AnalyzerFactory,
    progress: ProgressFn,
}

impl StandardWorkerFactory {
    pub fn new(
        config: &Config,
        client: reqwest::Client,
        extractor_factory: ExtractorFactory,
        scorer_factory: ScorerFactory,
        progress: ProgressFn,
    ) -> Self {
        Self {
            client,
            robots_url: config.robots_url(),
            user_agent: config.user_agent.clone(),
            fallback: config.robots_fallback,
            tmp_dir: config.downloads_dir(),
            min_text_chars: config.min_text_chars,
            analyzers: AnalyzerFactory::new(extractor_factory, scorer_factory),
            progress,
        }
    }
}

impl WorkerFactory for StandardWorkerFactory {
    fn build(&self, id: usize) -> Pin<Box<dyn Future<Output = Worker> + Send + '_>> {
        Box::pin(async move {
            let gate =
                PolitenessGate::load(&self.client, &self.robots_url, &self.user_agent, self.fallback)
                    .await;
            let fetcher = DocumentFetcher::new(
                self.client.clone(),
                self.tmp_dir.join(format!("worker-{}", id)),
            );
            Worker::new(
                id,
                gate,
                fetcher,
                self.analyzers.clone(),
                self.min_text_chars,
                self.progress.clone(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, ExtractedText};
    use crate::test_support::{CountingScorer, PlainTextExtractor, no_progress, plain_analyzers};
    use crate::{Outcome, RuleScorer};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct BrokenExtractor;

    impl TextExtractor for BrokenExtractor {
        fn extract_text(&self, _path: &Path) -> Result<ExtractedText, BackendError> {
            Err(BackendError::OpenError("not a PDF".into()))
        }
    }

    fn analyzer(max_length: usize) -> Analyzer {
        Analyzer::new(
            Box::new(PlainTextExtractor),
            Box::new(CountingScorer { max_length }),
        )
    }

    #[test]
    fn test_min_text_boundary() {
        let mut a = analyzer(1_000);
        let short = format!("  {}\n", "ż".repeat(99));
        assert_eq!(
            a.analyze_text(&short, 100).unwrap_err(),
            Rejection::EmptyTextLayer { chars: 99 }
        );

        let exact = format!("  {}\n", "ż".repeat(100));
        let (text, stats) = a.analyze_text(&exact, 100).unwrap();
        assert_eq!(text.chars().count(), 100);
        assert_eq!(stats.words, 100);
    }

    #[test]
    fn test_long_text_widens_scorer_limit() {
        let mut a = analyzer(150);
        let text = "x".repeat(400);
        let (_, stats) = a.analyze_text(&text, 100).unwrap();
        assert_eq!(stats.words, 400);
        assert_eq!(a.scorer.max_length(), 400 + SCORER_HEADROOM);
    }

    #[test]
    fn test_unopenable_document_has_no_text() {
        let mut a = Analyzer::new(Box::new(BrokenExtractor), Box::new(RuleScorer::new()));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.pdf");
        std::fs::write(&path, b"garbage").unwrap();
        assert_eq!(
            a.analyze_file(&path, 100).unwrap_err(),
            Rejection::EmptyTextLayer { chars: 0 }
        );
    }

    fn worker(gate: PolitenessGate, tmp: &Path) -> Worker {
        Worker::new(
            0,
            gate,
            DocumentFetcher::new(reqwest::Client::new(), tmp),
            plain_analyzers(1_000_000),
            100,
            no_progress(),
        )
    }

    #[tokio::test]
    async fn test_process_accepts_document() {
        let server = MockServer::start().await;
        let body = format!("\n\n{}  \n", "Tekst naukowy. ".repeat(10));
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut w = worker(PolitenessGate::allow_all("nauka-harvester"), dir.path());
        let entry = CatalogEntry::new(format!("{}/doc.pdf", server.uri()), "Tytuł");
        let result = w.process(entry.clone()).await;

        match result.outcome {
            Outcome::Accepted { text, stats } => {
                assert_eq!(text, body.trim());
                assert_eq!(stats.char_length, body.trim().chars().count() as u64);
                assert_eq!(stats.url, entry.download_url);
                assert_eq!(stats.title, "Tytuł");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_process_denied_does_not_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut w = worker(PolitenessGate::deny_all("nauka-harvester"), dir.path());
        let result = w
            .process(CatalogEntry::new(format!("{}/doc.pdf", server.uri()), "t"))
            .await;

        assert_eq!(result.outcome, Outcome::Rejected(Rejection::PolicyDenied));
    }

    #[tokio::test]
    async fn test_process_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut w = worker(PolitenessGate::allow_all("nauka-harvester"), dir.path());
        let result = w
            .process(CatalogEntry::new(format!("{}/doc.pdf", server.uri()), "t"))
            .await;

        assert!(matches!(
            result.outcome,
            Outcome::Rejected(Rejection::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_process_short_text_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("   krótki   "))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut w = worker(PolitenessGate::allow_all("nauka-harvester"), dir.path());
        let result = w
            .process(CatalogEntry::new(format!("{}/doc.pdf", server.uri()), "t"))
            .await;

        assert_eq!(
            result.outcome,
            Outcome::Rejected(Rejection::EmptyTextLayer { chars: 6 })
        );
    }

    /// Panics on documents containing `PANIC`, otherwise reads them as text.
    struct FragileExtractor;

    impl TextExtractor for FragileExtractor {
        fn extract_text(&self, path: &Path) -> Result<ExtractedText, BackendError> {
            let text = std::fs::read_to_string(path)?;
            if text.contains("PANIC") {
                panic!("extractor crashed");
            }
            Ok(ExtractedText {
                text,
                pages: 1,
                failed_pages: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_worker_recovers_after_analysis_panic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_string("PANIC ".repeat(30)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/good.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_string("dobry ".repeat(30)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let analyzers = AnalyzerFactory::new(
            Arc::new(|| Box::new(FragileExtractor) as Box<dyn TextExtractor>),
            Arc::new(|| Box::new(CountingScorer { max_length: 10_000 }) as Box<dyn Scorer>),
        );
        let mut w = Worker::new(
            1,
            PolitenessGate::allow_all("nauka-harvester"),
            DocumentFetcher::new(reqwest::Client::new(), dir.path()),
            analyzers,
            100,
            no_progress(),
        );

        let bad = w
            .process(CatalogEntry::new(format!("{}/bad.pdf", server.uri()), "zły"))
            .await;
        assert!(matches!(bad.outcome, Outcome::Rejected(Rejection::Scoring(_))));

        let good = w
            .process(CatalogEntry::new(format!("{}/good.pdf", server.uri()), "dobry"))
            .await;
        assert!(good.is_accepted());
        assert_eq!(good.stats().unwrap().char_length, 179);
    }
}
