//! Wiring of crawler, worker pool and aggregator for one run.

use std::path::Path;
use std::sync::Arc;

use nauka_oai::CrawlSummary;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, RunReport};
use crate::backend::ArchiveSink;
use crate::pool::{DocumentPool, WorkerFactory};
use crate::{Config, CoreError, ProgressFn};

/// Everything a finished run knows about itself.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub crawl: CrawlSummary,
    pub run: RunReport,
}

pub(crate) async fn run<S: ArchiveSink + 'static>(
    config: &Config,
    factory: Arc<dyn WorkerFactory>,
    sink: S,
    progress: ProgressFn,
    cancel: CancellationToken,
) -> Result<HarvestReport, CoreError> {
    let crawler = config.catalog_crawler(config.http_client()?).await;

    tracing::info!(
        repositories = ?config.repositories,
        workers = config.num_workers,
        "starting harvest"
    );

    let stream = crawler.spawn(
        config.repositories.clone(),
        config.queue_capacity(),
        cancel.clone(),
    );
    let pool = DocumentPool::new(stream.entries, factory, config.num_workers, cancel.clone());
    let results = pool.results();

    let mut aggregator = Aggregator::new(sink, progress);
    let mut failure = None;
    while let Ok(result) = results.recv().await {
        if failure.is_some() {
            // Draining in-flight documents so the workers can exit.
            continue;
        }
        if let Err(e) = aggregator.ingest(result) {
            tracing::error!(error = %e, "archive write failed, stopping harvest");
            cancel.cancel();
            failure = Some(e);
        }
    }
    drop(results);
    pool.join().await;
    remove_downloads(&config.downloads_dir());

    let crawl = stream.handle.await;
    if let Some(e) = failure {
        return Err(e);
    }
    let crawl = crawl.map_err(|e| CoreError::Task(format!("crawler task failed: {}", e)))?;

    if cancel.is_cancelled() {
        tracing::warn!("harvest cancelled, publishing partial corpus");
    }

    let target = config.publish_target();
    let run = tokio::task::spawn_blocking(move || aggregator.finalize(&target))
        .await
        .map_err(|e| CoreError::Task(format!("finalize task failed: {}", e)))??;

    Ok(HarvestReport { crawl, run })
}

fn remove_downloads(downloads: &Path) {
    if downloads.exists()
        && let Err(e) = std::fs::remove_dir_all(downloads)
    {
        tracing::warn!(path = %downloads.display(), error = %e, "failed to remove download directory");
    }
}
