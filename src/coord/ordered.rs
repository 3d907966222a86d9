//! Ordered remote fetch.
//!
//! One task per key, at most `threads` of them talking to the service at a
//! time. Completions arrive in whatever order the service answers; they are
//! funnelled through a bounded channel into a [`SequenceBarrier`] and
//! handed to the caller strictly in key order.
//!
//! Outcomes:
//! - found: [`Retrieved::Found`]
//! - not found: [`Retrieved::NotFound`], the batch carries on
//! - anything else: every task still in flight is aborted and the run fails
//!   with [`FetchError::Remote`]. Results already handed out stay handed
//!   out; results still waiting in the barrier are dropped.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::barrier::{SequenceBarrier, SequenceError};
use crate::client::{ClientError, Object, RemoteClient};
use crate::settings::Threads;

/// Marker for a key the service has no object for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    pub key: String,
    pub collection: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Retrieved {
    Found(Object),
    NotFound(NotFound),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetching '{key}' failed")]
    Remote {
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("cancelled after {emitted} of {total} objects")]
    Cancelled { emitted: usize, total: usize },

    #[error("fetch task failed")]
    Task(#[from] JoinError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error("{missing} fetches never reported back")]
    Incomplete { missing: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub found: usize,
    pub not_found: usize,
}

impl FetchSummary {
    pub fn total(&self) -> usize {
        self.found + self.not_found
    }
}

struct Completion {
    order: usize,
    key: String,
    outcome: Result<Object, ClientError>,
}

pub struct OrderedFetch {
    client: Arc<dyn RemoteClient>,
    threads: Threads,
    cancel: CancellationToken,
}

impl OrderedFetch {
    pub fn new(client: Arc<dyn RemoteClient>, threads: Threads) -> Self {
        Self {
            client,
            threads,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop early (with [`FetchError::Cancelled`]) once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch every key from `collection`, calling `emit` once per key in
    /// input order.
    pub async fn run<F>(
        &self,
        collection: &str,
        keys: Vec<String>,
        mut emit: F,
    ) -> Result<FetchSummary, FetchError>
    where
        F: FnMut(Retrieved),
    {
        let total = keys.len();
        let permits = Arc::new(Semaphore::new(self.threads.get()));
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(self.threads.get());
        let mut tasks = JoinSet::new();

        debug!(collection, total, threads = self.threads.get(), "ordered fetch");

        for (order, key) in keys.into_iter().enumerate() {
            let client = Arc::clone(&self.client);
            let permits = Arc::clone(&permits);
            let done_tx = done_tx.clone();
            let collection = collection.to_string();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                trace!(order, %key, "fetch start");
                let outcome = client.fetch(&collection, &key).await;
                // Receiver gone means the run already ended; nothing to report to.
                let _ = done_tx.send(Completion { order, key, outcome }).await;
            });
        }
        drop(done_tx);

        let mut barrier = SequenceBarrier::new();
        let mut summary = FetchSummary::default();

        loop {
            let completion = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(FetchError::Cancelled {
                        emitted: barrier.next_expected(),
                        total,
                    });
                }
                completion = done_rx.recv() => completion,
            };
            let Some(Completion { order, key, outcome }) = completion else {
                break;
            };

            let payload = match outcome {
                Ok(object) => Retrieved::Found(object),
                Err(err) if err.is_not_found() => Retrieved::NotFound(NotFound {
                    key,
                    collection: collection.to_string(),
                    message: err.to_string(),
                }),
                Err(source) => {
                    warn!(order, %key, error = %source, "fatal fetch error, aborting batch");
                    tasks.abort_all();
                    if !barrier.is_empty() {
                        debug!(buffered = barrier.len(), "dropping out-of-order results");
                    }
                    return Err(FetchError::Remote { key, source });
                }
            };

            barrier.insert(order, payload)?;
            for node in barrier.drain_ready() {
                match &node.payload {
                    Retrieved::Found(_) => summary.found += 1,
                    Retrieved::NotFound(_) => summary.not_found += 1,
                }
                emit(node.payload);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            joined?;
        }

        let missing = total - barrier.next_expected();
        if missing > 0 {
            debug!(buffered = barrier.len(), "fetch ended with gaps");
            return Err(FetchError::Incomplete { missing });
        }
        debug!(found = summary.found, not_found = summary.not_found, "ordered fetch done");
        Ok(summary)
    }
}
