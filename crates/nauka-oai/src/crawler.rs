//! Paginated `ListRecords` crawl across repositories.
//!
//! The crawler is the single producer of [`CatalogEntry`] values. It pushes
//! them into a bounded channel; a full channel suspends the crawl, which is
//! what keeps a listing of tens of thousands of records from being buffered
//! ahead of the workers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::filter::RecordFilter;
use crate::xml_parser::{self, ListRecordsPage};
use crate::{CatalogEntry, DEFAULT_BASE_URL, DEFAULT_METADATA_PREFIX, OaiError};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Predicate deciding whether a catalog page URL may be requested.
pub type UrlGate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Scheme and host of the catalog, e.g. `https://bibliotekanauki.pl`.
    pub base_url: String,
    pub metadata_prefix: String,
    pub filter: RecordFilter,
    /// Minimum spacing between two catalog requests. `None` disables pacing.
    pub request_interval: Option<Duration>,
    /// Timeout for a single catalog page request.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
            filter: RecordFilter::default(),
            request_interval: None,
            timeout: Duration::from_secs(120),
            user_agent: concat!("nauka-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// How the crawl of one repository ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryOutcome {
    /// The last page carried no resumption token.
    Exhausted,
    /// A request, parse or protocol failure stopped pagination.
    Abandoned(String),
    /// The catalog gate refused the page URL.
    Disallowed,
    Cancelled,
    /// Nobody is consuming entries any more.
    ReceiverClosed,
}

#[derive(Debug, Clone)]
pub struct RepositorySummary {
    pub repository: String,
    pub pages: u64,
    pub records: u64,
    pub entries: u64,
    pub outcome: RepositoryOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub repositories: Vec<RepositorySummary>,
}

impl CrawlSummary {
    /// Total number of entries emitted across all repositories.
    pub fn entries(&self) -> u64 {
        self.repositories.iter().map(|r| r.entries).sum()
    }

    pub fn pages(&self) -> u64 {
        self.repositories.iter().map(|r| r.pages).sum()
    }
}

/// Position of the crawl within one repository.
///
/// The first request carries the metadata prefix; every following request
/// carries only the resumption token of the previous page. A token is never
/// requested twice, so a server echoing the same token cannot loop the crawl.
#[derive(Debug)]
struct ContinuationState {
    repository: String,
    resumption_token: Option<String>,
    used_tokens: HashSet<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Advance {
    Next,
    Exhausted,
    Repeated,
}

impl ContinuationState {
    fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            resumption_token: None,
            used_tokens: HashSet::new(),
        }
    }

    fn request_url(&self, base_url: &str, metadata_prefix: &str) -> Result<Url, OaiError> {
        let mut url = Url::parse(&format!(
            "{}/api/oai/{}",
            base_url.trim_end_matches('/'),
            self.repository
        ))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("verb", "ListRecords");
            match &self.resumption_token {
                Some(token) => query.append_pair("resumptionToken", token),
                None => query.append_pair("metadataPrefix", metadata_prefix),
            };
        }
        Ok(url)
    }

    fn advance(&mut self, token: Option<String>) -> Advance {
        match token {
            None => Advance::Exhausted,
            Some(token) if !self.used_tokens.insert(token.clone()) => Advance::Repeated,
            Some(token) => {
                self.resumption_token = Some(token);
                Advance::Next
            }
        }
    }
}

/// Receiving end of a crawl running in the background.
pub struct CatalogStream {
    pub entries: async_channel::Receiver<CatalogEntry>,
    pub handle: JoinHandle<CrawlSummary>,
}

pub struct CatalogCrawler {
    client: reqwest::Client,
    config: CrawlerConfig,
    gate: Option<UrlGate>,
    limiter: Option<DirectLimiter>,
}

impl CatalogCrawler {
    /// Create a crawler with its own HTTP client.
    pub fn new(config: CrawlerConfig) -> Result<Self, OaiError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: CrawlerConfig) -> Self {
        let limiter = config
            .request_interval
            .and_then(Quota::with_period)
            .map(DirectLimiter::direct);
        Self {
            client,
            config,
            gate: None,
            limiter,
        }
    }

    /// Check every catalog page URL against `gate` before requesting it.
    pub fn with_gate(mut self, gate: UrlGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Run the crawl in a background task, emitting into a channel of `capacity`.
    pub fn spawn(
        self,
        repositories: Vec<String>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> CatalogStream {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        let handle = tokio::spawn(async move {
            let summary = self.crawl(&repositories, &tx, &cancel).await;
            // Closing the sender is what tells consumers the catalog is exhausted.
            tx.close();
            summary
        });
        CatalogStream {
            entries: rx,
            handle,
        }
    }

    /// Crawl `repositories` in order, sending every accepted entry to `sink`.
    ///
    /// No failure is fatal: a repository whose page cannot be fetched or
    /// parsed is abandoned and the crawl moves on to the next one.
    pub async fn crawl(
        &self,
        repositories: &[String],
        sink: &async_channel::Sender<CatalogEntry>,
        cancel: &CancellationToken,
    ) -> CrawlSummary {
        let mut summary = CrawlSummary::default();

        for repository in repositories {
            let repo_summary = self.crawl_repository(repository, sink, cancel).await;
            tracing::info!(
                repository = %repository,
                pages = repo_summary.pages,
                records = repo_summary.records,
                entries = repo_summary.entries,
                outcome = ?repo_summary.outcome,
                "repository crawl finished"
            );
            let stop = matches!(
                repo_summary.outcome,
                RepositoryOutcome::Cancelled | RepositoryOutcome::ReceiverClosed
            );
            summary.repositories.push(repo_summary);
            if stop {
                break;
            }
        }

        summary
    }

    async fn crawl_repository(
        &self,
        repository: &str,
        sink: &async_channel::Sender<CatalogEntry>,
        cancel: &CancellationToken,
    ) -> RepositorySummary {
        let mut summary = RepositorySummary {
            repository: repository.to_string(),
            pages: 0,
            records: 0,
            entries: 0,
            outcome: RepositoryOutcome::Exhausted,
        };
        let mut state = ContinuationState::new(repository);

        loop {
            if cancel.is_cancelled() {
                summary.outcome = RepositoryOutcome::Cancelled;
                break;
            }

            let url = match state.request_url(&self.config.base_url, &self.config.metadata_prefix)
            {
                Ok(url) => url,
                Err(e) => {
                    summary.outcome = RepositoryOutcome::Abandoned(e.to_string());
                    break;
                }
            };

            if let Some(gate) = &self.gate
                && !gate(url.as_str())
            {
                tracing::warn!(url = %url, "catalog page disallowed by robots.txt");
                summary.outcome = RepositoryOutcome::Disallowed;
                break;
            }

            let page = match self.fetch_page(&url).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(repository, url = %url, error = %e, "abandoning repository");
                    summary.outcome = RepositoryOutcome::Abandoned(e.to_string());
                    break;
                }
            };
            summary.pages += 1;

            if let Some(error) = page.error {
                if !error.is_no_records() {
                    let e = OaiError::Protocol {
                        code: error.code,
                        message: error.message,
                    };
                    tracing::warn!(repository, error = %e, "abandoning repository");
                    summary.outcome = RepositoryOutcome::Abandoned(e.to_string());
                }
                break;
            }

            summary.records += page.records.len() as u64;
            tracing::debug!(
                repository,
                page = summary.pages,
                records = page.records.len(),
                complete_list_size = ?page.complete_list_size,
                "catalog page parsed"
            );

            for record in &page.records {
                let entry = match self.config.filter.select_entry(record) {
                    Ok(entry) => entry,
                    Err(reason) => {
                        tracing::trace!(identifier = ?record.identifier, ?reason, "record rejected");
                        continue;
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        summary.outcome = RepositoryOutcome::Cancelled;
                        return summary;
                    }
                    sent = sink.send(entry) => {
                        if sent.is_err() {
                            summary.outcome = RepositoryOutcome::ReceiverClosed;
                            return summary;
                        }
                        summary.entries += 1;
                    }
                }
            }

            match state.advance(page.resumption_token) {
                Advance::Next => {}
                Advance::Exhausted => break,
                Advance::Repeated => {
                    tracing::warn!(repository, "server repeated a resumption token");
                    summary.outcome =
                        RepositoryOutcome::Abandoned("repeated resumption token".to_string());
                    break;
                }
            }
        }

        summary
    }

    /// Request and parse one catalog page.
    pub async fn fetch_page(&self, url: &Url) -> Result<ListRecordsPage, OaiError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OaiError::Status(response.status()));
        }

        let body = response.bytes().await?;
        xml_parser::parse_list_records(body.as_ref())
    }
}
