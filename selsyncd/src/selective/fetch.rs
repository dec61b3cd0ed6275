use std::sync::Arc;

use async_trait::async_trait;
use selsync_core::{DavClient, DavError, DirectoryListing};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, warn};

use super::tree::{FetchRequest, FetchTicket};
use crate::sync::backoff::RetryPolicy;

/// Lists one level of subfolders of a remote directory.
#[async_trait]
pub trait RemoteListingFetcher: Send + Sync {
    async fn list(
        &self,
        remote_dir: &str,
        properties: &[&str],
    ) -> Result<DirectoryListing, DavError>;
}

#[async_trait]
impl RemoteListingFetcher for DavClient {
    async fn list(
        &self,
        remote_dir: &str,
        properties: &[&str],
    ) -> Result<DirectoryListing, DavError> {
        self.list_subfolders(remote_dir, properties).await
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Dav(#[from] DavError),
    #[error("listing task did not finish: {0}")]
    Task(#[from] JoinError),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Dav(err) if err.is_not_found())
    }
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub ticket: FetchTicket,
    pub result: Result<DirectoryListing, FetchError>,
}

/// Runs listing requests off the control task. Each request gets its own
/// task; outcomes come back on a single channel in completion order. A
/// listing task that panics or is cancelled still reports an outcome.
pub struct FetchDriver {
    fetcher: Arc<dyn RemoteListingFetcher>,
    retry: RetryPolicy,
    tx: mpsc::UnboundedSender<FetchOutcome>,
    rx: mpsc::UnboundedReceiver<FetchOutcome>,
    in_flight: usize,
}

impl FetchDriver {
    pub fn new(fetcher: Arc<dyn RemoteListingFetcher>, retry: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            fetcher,
            retry,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn spawn(&mut self, request: FetchRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        let retry = self.retry;
        let tx = self.tx.clone();
        self.in_flight += 1;
        let ticket = request.ticket.clone();
        let listing =
            tokio::spawn(async move { list_with_retry(fetcher.as_ref(), &request, retry).await });
        tokio::spawn(async move {
            let result = match listing.await {
                Ok(result) => result.map_err(FetchError::from),
                Err(err) => {
                    warn!(address = ?ticket.address, "listing task failed: {err}");
                    Err(FetchError::from(err))
                }
            };
            let outcome = FetchOutcome { ticket, result };
            if tx.send(outcome).is_err() {
                debug!("fetch outcome dropped: driver is gone");
            }
        });
    }

    /// Waits for the next finished fetch. Returns `None` when nothing is
    /// outstanding.
    pub async fn next_outcome(&mut self) -> Option<FetchOutcome> {
        if self.in_flight == 0 {
            return None;
        }
        let outcome = self.rx.recv().await?;
        self.in_flight -= 1;
        Some(outcome)
    }
}

async fn list_with_retry(
    fetcher: &dyn RemoteListingFetcher,
    request: &FetchRequest,
    retry: RetryPolicy,
) -> Result<DirectoryListing, DavError> {
    let mut attempt = 0;
    loop {
        match fetcher.list(&request.remote_path, request.properties).await {
            Ok(listing) => return Ok(listing),
            Err(err) if retry.should_retry(attempt, err.is_retryable()) => {
                let delay = retry.delay(attempt);
                warn!(
                    remote_path = %request.remote_path,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "listing failed, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
