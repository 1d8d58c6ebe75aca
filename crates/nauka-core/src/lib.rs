use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod aggregator;
pub mod backend;
pub mod config_file;
pub mod fetcher;
pub mod harvest;
pub mod manifest;
pub mod pipeline;
pub mod politeness;
pub mod pool;
pub mod scoring;
#[cfg(test)]
mod test_support;

// Re-export for convenience
pub use aggregator::{Aggregator, AggregatorState, CorpusTotals, PublishTarget, RunReport};
pub use backend::{
    ArchiveError, ArchiveSink, BackendError, ExtractedText, LinguisticStats, ScoreError, Scorer,
    TextExtractor,
};
pub use fetcher::{DocumentFetcher, FetchError, RawDocument};
pub use harvest::HarvestReport;
pub use manifest::{Manifest, ManifestInfo};
pub use nauka_oai::{CatalogEntry, CrawlSummary};
pub use pipeline::{AnalyzerFactory, StandardWorkerFactory, Worker};
pub use politeness::{PolitenessGate, RobotsFallback};
pub use pool::{DocumentPool, WorkerFactory};
pub use scoring::RuleScorer;

/// Trimmed texts shorter than this carry no usable text layer.
pub const DEFAULT_MIN_TEXT_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog error: {0}")]
    Oai(#[from] nauka_oai::OaiError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("cannot {action} while aggregator is {state:?}")]
    InvalidState {
        state: AggregatorState,
        action: &'static str,
    },
    #[error("task failed: {0}")]
    Task(String),
}

/// Per-document metadata stored alongside the text in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub url: String,
    pub title: String,
    /// Length of the trimmed text in characters.
    #[serde(rename = "length")]
    pub char_length: u64,
    pub sentences: u64,
    pub words: u64,
    pub verbs: u64,
    pub nouns: u64,
    pub punctuations: u64,
    pub symbols: u64,
}

impl DocumentStats {
    pub fn new(entry: &CatalogEntry, char_length: u64, stats: LinguisticStats) -> Self {
        Self {
            url: entry.download_url.clone(),
            title: entry.title.clone(),
            char_length,
            sentences: stats.sentences,
            words: stats.words,
            verbs: stats.verbs,
            nouns: stats.nouns,
            punctuations: stats.punctuations,
            symbols: stats.symbols,
        }
    }
}

/// Why a document did not make it into the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// robots.txt disallows the download URL.
    PolicyDenied,
    /// Connection failure, timeout or non-success status.
    Transport(String),
    /// Fewer (or more) bytes arrived than the server declared.
    Incomplete { expected: u64, received: u64 },
    /// The trimmed text is shorter than the minimum.
    EmptyTextLayer { chars: usize },
    Scoring(String),
}

impl Rejection {
    /// Stable reason key used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::PolicyDenied => "policy_denied",
            Rejection::Transport(_) => "transport",
            Rejection::Incomplete { .. } => "incomplete",
            Rejection::EmptyTextLayer { .. } => "empty_text_layer",
            Rejection::Scoring(_) => "scoring",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::PolicyDenied => write!(f, "disallowed by robots.txt"),
            Rejection::Transport(msg) => write!(f, "download failed: {}", msg),
            Rejection::Incomplete { expected, received } => write!(
                f,
                "incomplete download ({} of {} bytes)",
                received, expected
            ),
            Rejection::EmptyTextLayer { chars } => {
                write!(f, "no usable text layer ({} characters)", chars)
            }
            Rejection::Scoring(msg) => write!(f, "scoring failed: {}", msg),
        }
    }
}

/// What happened to one catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted { text: String, stats: DocumentStats },
    Rejected(Rejection),
}

/// The single result produced for every entry a worker consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentResult {
    pub entry: CatalogEntry,
    pub outcome: Outcome,
}

impl DocumentResult {
    pub fn accepted(entry: CatalogEntry, text: String, stats: DocumentStats) -> Self {
        Self {
            entry,
            outcome: Outcome::Accepted { text, stats },
        }
    }

    pub fn rejected(entry: CatalogEntry, rejection: Rejection) -> Self {
        Self {
            entry,
            outcome: Outcome::Rejected(rejection),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, Outcome::Accepted { .. })
    }

    pub fn stats(&self) -> Option<&DocumentStats> {
        match &self.outcome {
            Outcome::Accepted { stats, .. } => Some(stats),
            Outcome::Rejected(_) => None,
        }
    }
}

/// Progress events emitted during a harvest.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Processing {
        worker: usize,
        title: String,
        url: String,
    },
    Downloading {
        worker: usize,
        url: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },
    Accepted {
        url: String,
        title: String,
        documents: u64,
    },
    Rejected {
        url: String,
        title: String,
        rejection: Rejection,
    },
    Finalizing,
}

/// Callback receiving [`ProgressEvent`]s from any task.
pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Resolved configuration for a harvest run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scheme and host of the catalog and of robots.txt.
    pub base_url: String,
    pub repositories: Vec<String>,
    pub metadata_prefix: String,
    /// Required record language (ISO 639-2).
    pub language: String,
    /// Preferred title language (ISO 639-1).
    pub title_language: String,
    pub request_interval: Option<Duration>,
    /// Check catalog pages against robots.txt as well as documents.
    pub gate_catalog: bool,
    pub num_workers: usize,
    /// Entries queued beyond one per worker.
    pub prefetch: usize,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub robots_fallback: RobotsFallback,
    pub min_text_chars: usize,
    /// Where the published archive and manifest are written.
    pub output_dir: PathBuf,
    /// Scratch directory for archive chunks and downloads.
    pub data_dir: PathBuf,
    pub manifest: ManifestInfo,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: nauka_oai::DEFAULT_BASE_URL.to_string(),
            repositories: nauka_oai::DEFAULT_REPOSITORIES
                .iter()
                .map(|r| r.to_string())
                .collect(),
            metadata_prefix: nauka_oai::DEFAULT_METADATA_PREFIX.to_string(),
            language: "pol".to_string(),
            title_language: "pl".to_string(),
            request_interval: None,
            gate_catalog: false,
            num_workers: default_num_workers(),
            prefetch: 2,
            user_agent: concat!("nauka-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 30,
            download_timeout_secs: 600,
            robots_fallback: RobotsFallback::Deny,
            min_text_chars: DEFAULT_MIN_TEXT_CHARS,
            output_dir: PathBuf::from("."),
            data_dir: PathBuf::from("./data"),
            manifest: ManifestInfo::default(),
        }
    }
}

impl Config {
    pub fn crawler_config(&self) -> nauka_oai::CrawlerConfig {
        nauka_oai::CrawlerConfig {
            base_url: self.base_url.clone(),
            metadata_prefix: self.metadata_prefix.clone(),
            filter: nauka_oai::RecordFilter::new(&self.language, &self.title_language),
            request_interval: self.request_interval,
            timeout: Duration::from_secs(self.download_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn robots_url(&self) -> String {
        politeness::robots_url(&self.base_url)
    }

    /// Catalog crawler on `client`, gated by robots.txt when `gate_catalog` is set.
    pub async fn catalog_crawler(&self, client: reqwest::Client) -> nauka_oai::CatalogCrawler {
        let gate = if self.gate_catalog {
            Some(
                PolitenessGate::load(
                    &client,
                    &self.robots_url(),
                    &self.user_agent,
                    self.robots_fallback,
                )
                .await,
            )
        } else {
            None
        };
        let crawler = nauka_oai::CatalogCrawler::with_client(client, self.crawler_config());
        match gate {
            Some(gate) => crawler.with_gate(Arc::new(move |url: &str| gate.allowed(url))),
            None => crawler,
        }
    }

    /// Parent of the per-worker download directories.
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    /// Capacity of the catalog queue feeding the workers.
    pub fn queue_capacity(&self) -> usize {
        self.num_workers.max(1) + self.prefetch
    }

    pub fn publish_target(&self) -> PublishTarget {
        let name = &self.manifest.name;
        PublishTarget {
            archive_path: self.output_dir.join(format!("{name}.jsonl.gz")),
            manifest_path: self.output_dir.join(format!("{name}.manifest")),
            manifest: self.manifest.clone(),
        }
    }

    /// Build an HTTP client with the configured user agent and timeouts.
    pub fn http_client(&self) -> Result<reqwest::Client, CoreError> {
        Ok(reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.download_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?)
    }
}

/// Number of parallel execution units, or 1 if unknown.
pub fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Crawl the catalog, process every qualifying document and publish the corpus.
///
/// The run ends when the catalog is exhausted or `cancel` fires; in both cases
/// whatever was collected is committed and a manifest is written.
pub async fn harvest<S: ArchiveSink + 'static>(
    config: &Config,
    factory: Arc<dyn WorkerFactory>,
    sink: S,
    progress: ProgressFn,
    cancel: CancellationToken,
) -> Result<HarvestReport, CoreError> {
    harvest::run(config, factory, sink, progress, cancel).await
}
