//! Fixed-size worker pool between the catalog stream and the aggregator.
//!
//! Each worker task owns one [`Worker`] built by the [`WorkerFactory`] and
//! pulls entries from the shared bounded catalog channel, so the number of
//! documents in flight is bounded by the worker count plus the two channel
//! capacities. Results come back in completion order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipeline::Worker;
use crate::{CatalogEntry, DocumentResult};

/// Creates the private context for one worker task.
pub trait WorkerFactory: Send + Sync {
    fn build(&self, id: usize) -> Pin<Box<dyn Future<Output = Worker> + Send + '_>>;
}

/// A running pool of worker tasks.
pub struct DocumentPool {
    results: async_channel::Receiver<DocumentResult>,
    handle: JoinHandle<()>,
}

impl DocumentPool {
    /// Start `num_workers` tasks consuming `entries`.
    ///
    /// Workers stop when `entries` is closed and drained, when `cancel`
    /// fires (the document in hand is still finished), or when the results
    /// receiver is dropped.
    pub fn new(
        entries: async_channel::Receiver<CatalogEntry>,
        factory: Arc<dyn WorkerFactory>,
        num_workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let (result_tx, result_rx) = async_channel::bounded::<DocumentResult>(num_workers);

        let handle = tokio::spawn(async move {
            let mut worker_handles = Vec::with_capacity(num_workers);
            for id in 0..num_workers {
                worker_handles.push(tokio::spawn(worker_loop(
                    id,
                    entries.clone(),
                    factory.clone(),
                    result_tx.clone(),
                    cancel.clone(),
                )));
            }

            // Workers hold the last senders; results close when they all exit.
            drop(entries);
            drop(result_tx);

            for h in worker_handles {
                if let Err(e) = h.await {
                    tracing::error!(error = %e, "worker task failed");
                }
            }
        });

        Self {
            results: result_rx,
            handle,
        }
    }

    /// Receiver of per-document results. Closed once every worker has exited.
    pub fn results(&self) -> async_channel::Receiver<DocumentResult> {
        self.results.clone()
    }

    /// Wait for all worker tasks to finish.
    pub async fn join(self) {
        drop(self.results);
        let _ = self.handle.await;
    }
}

async fn worker_loop(
    id: usize,
    entries: async_channel::Receiver<CatalogEntry>,
    factory: Arc<dyn WorkerFactory>,
    result_tx: async_channel::Sender<DocumentResult>,
    cancel: CancellationToken,
) {
    let mut worker = factory.build(id).await;
    tracing::debug!(worker = id, "worker ready");

    let mut processed = 0usize;
    loop {
        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = entries.recv() => match next {
                Ok(entry) => entry,
                Err(_) => break,
            },
        };

        let result = worker.process(entry).await;
        processed += 1;
        if result_tx.send(result).await.is_err() {
            break;
        }
    }

    tracing::debug!(worker = id, processed, "worker finished");
}
