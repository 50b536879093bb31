use async_trait::async_trait;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use super::client::WorkerClient;
use crate::error::{Error, Result};
use crate::registry::types::MembershipSnapshot;
use crate::scoring::engine::{merge_scores, rank};
use crate::scoring::types::{ScoreTable, ScoringStrategy};
use crate::worker::service::{LocalFile, WorkerService};

/// Whether this process currently coordinates, and who does otherwise.
#[async_trait]
pub trait Leadership: Send + Sync {
    fn is_leader(&self) -> bool;

    async fn leader_address(&self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlacement {
    pub worker: String,
    pub document: String,
}

/// Leader-side query, upload and download fan-out over the live workers.
pub struct QueryCoordinator {
    snapshot: watch::Receiver<Arc<MembershipSnapshot>>,
    client: Arc<dyn WorkerClient>,
    local: Arc<WorkerService>,
    leadership: Arc<dyn Leadership>,
    request_timeout: Duration,
    /// Bound on the file transfer itself, which may be much larger than a query.
    upload_timeout: Duration,
    strategy: ScoringStrategy,
}

impl QueryCoordinator {
    pub fn new(
        snapshot: watch::Receiver<Arc<MembershipSnapshot>>,
        client: Arc<dyn WorkerClient>,
        local: Arc<WorkerService>,
        leadership: Arc<dyn Leadership>,
        request_timeout: Duration,
        upload_timeout: Duration,
        strategy: ScoringStrategy,
    ) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            client,
            local,
            leadership,
            request_timeout,
            upload_timeout,
            strategy,
        })
    }

    pub fn strategy(&self) -> ScoringStrategy {
        self.strategy
    }

    /// Fails with `NotLeader` naming the current leader when this node does
    /// not coordinate.
    pub async fn ensure_leader(&self) -> Result<()> {
        if self.leadership.is_leader() {
            Ok(())
        } else {
            Err(Error::NotLeader(self.leadership.leader_address().await))
        }
    }

    fn workers(&self) -> Arc<MembershipSnapshot> {
        self.snapshot.borrow().clone()
    }

    async fn bounded<T>(&self, address: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        self.bounded_by(self.request_timeout, address, call).await
    }

    async fn bounded_by<T>(
        &self,
        limit: Duration,
        address: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(address.to_string())),
        }
    }

    /// Scatter-gather search. Workers that fail or time out are left out of
    /// the answer; no workers at all yields an empty table.
    pub async fn start(&self, query: &str) -> Result<ScoreTable> {
        let workers = self.workers();
        if workers.is_empty() {
            info!("No workers registered; empty result for '{}'", query);
            return Ok(ScoreTable::new());
        }

        let table = match self.strategy {
            ScoringStrategy::TfIdf => {
                let calls = workers.addresses.iter().map(|address| async move {
                    let result = self.bounded(address, self.client.process(address, query)).await;
                    (address, result)
                });

                let mut reports = Vec::new();
                let mut responded = 0;
                for (address, result) in join_all(calls).await {
                    match result {
                        Ok(documents) => {
                            responded += 1;
                            tracing::debug!("{} reported {} documents", address, documents.len());
                            reports.extend(documents);
                        }
                        Err(e) => tracing::warn!("Excluding worker {} from '{}': {}", address, query, e),
                    }
                }

                info!(
                    "Query '{}' answered by {}/{} workers over {} documents",
                    query,
                    responded,
                    workers.len(),
                    reports.len()
                );
                rank(query, &reports)
            }
            ScoringStrategy::WorkerRelevance => {
                let calls = workers.addresses.iter().map(|address| async move {
                    let result = self.bounded(address, self.client.score(address, query)).await;
                    (address, result)
                });

                let mut scores = Vec::new();
                let mut responded = 0;
                for (address, result) in join_all(calls).await {
                    match result {
                        Ok(partial) => {
                            responded += 1;
                            scores.extend(partial);
                        }
                        Err(e) => tracing::warn!("Excluding worker {} from '{}': {}", address, query, e),
                    }
                }

                info!(
                    "Query '{}' scored by {}/{} workers",
                    query,
                    responded,
                    workers.len()
                );
                merge_scores(scores)
            }
        };

        Ok(table)
    }

    /// Sends the file to the worker reporting the smallest index. Ties go to
    /// the first worker in snapshot order. There is a single attempt.
    pub async fn upload_to_least_loaded_worker(&self, file_name: &str, bytes: Vec<u8>) -> Result<UploadPlacement> {
        if bytes.is_empty() {
            return Err(Error::InvalidRequest("uploaded file is empty".to_string()));
        }

        let workers = self.workers();
        if workers.is_empty() {
            return Err(Error::NoWorkers);
        }

        let probes = workers.addresses.iter().map(|address| async move {
            let result = self.bounded(address, self.client.index_size(address)).await;
            (address, result)
        });

        let mut target: Option<(&String, u64)> = None;
        for (address, result) in join_all(probes).await {
            match result {
                Ok(size) => {
                    tracing::debug!("{} index size {} bytes", address, size);
                    if target.is_none_or(|(_, best)| size < best) {
                        target = Some((address, size));
                    }
                }
                Err(e) => tracing::warn!("Worker {} did not report its index size: {}", address, e),
            }
        }

        let (worker, size) = target.ok_or(Error::NoHealthyWorkers)?;
        info!("Uploading {} to {} (index size {} bytes)", file_name, worker, size);

        let document = self
            .bounded_by(self.upload_timeout, worker, self.client.upload(worker, file_name, bytes))
            .await?;

        Ok(UploadPlacement {
            worker: worker.clone(),
            document,
        })
    }

    /// Serves a document from the local copy if present, otherwise from the
    /// first worker that has it, probing workers one at a time.
    pub async fn leader_download(&self, path: &str) -> Result<LocalFile> {
        let relative = normalize_path(&self.local.documents_root().to_string_lossy(), path);
        if relative.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }

        match self.local.download(&relative).await {
            Ok(file) => {
                tracing::debug!("Serving {} from the local copy", relative);
                return Ok(file);
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => tracing::warn!("Local read of {} failed: {}", relative, e),
        }

        let file_name = relative
            .rsplit('/')
            .next()
            .unwrap_or(relative.as_str())
            .to_string();

        for address in self.workers().addresses.iter() {
            match self
                .bounded(address, self.client.download(address, &relative))
                .await
            {
                Ok(Some(bytes)) => {
                    info!("Serving {} from worker {}", relative, address);
                    return Ok(LocalFile { file_name, bytes });
                }
                Ok(None) => tracing::debug!("{} does not hold {}", address, relative),
                Err(e) => tracing::debug!("Skipping {} for {}: {}", address, relative, e),
            }
        }

        Err(Error::NotFound(relative))
    }
}

/// Turns a client-supplied path into one relative to the document root:
/// strips the root itself when given absolutely, then any leading slashes.
pub fn normalize_path(root: &str, path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let root = root.replace('\\', "/");
    let root = root.trim_end_matches('/');

    let stripped = if !root.is_empty() {
        match path.strip_prefix(root) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => path.as_str(),
        }
    } else {
        path.as_str()
    };

    stripped.trim_start_matches('/').to_string()
}
