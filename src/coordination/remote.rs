//! Session against a coordination server reached over HTTP.
//!
//! Two background tasks keep the session usable: a heartbeat at a third of
//! the session timeout, and a long-poll loop that hands every fired watch to
//! the channel it was registered with. A session the server no longer knows
//! is marked closed and never revived; callers connect a new one.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::protocol::*;
use super::server::EVENTS_POLL_TIMEOUT;
use super::store::{Connector, MembershipStore};
use super::types::{CoordinationError, CoordinationResult, CreateMode, NodeStat, SessionId, Watcher};

const EVENTS_RETRY_DELAY: Duration = Duration::from_millis(200);

/// A watch registered over the wire, waiting for its event.
struct PendingWatch {
    path: String,
    /// Registered through `exists` rather than `get_children`.
    data: bool,
    watcher: Watcher,
}

struct SessionLink {
    base_url: String,
    client: reqwest::Client,
    id: SessionId,
    request_timeout: Duration,
    watches: DashMap<u64, PendingWatch>,
    closed: watch::Sender<bool>,
}

impl SessionLink {
    async fn call<Req, T>(&self, endpoint: &str, payload: &Req, timeout: Duration) -> CoordinationResult<T>
    where
        Req: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        if *self.closed.borrow() {
            return Err(CoordinationError::SessionExpired);
        }

        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .json(payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| CoordinationError::ConnectionLoss(e.to_string()))?;

        let result: CoordinationResult<T> = response
            .json()
            .await
            .map_err(|e| CoordinationError::ConnectionLoss(e.to_string()))?;

        if let Err(CoordinationError::SessionExpired) = &result {
            self.mark_closed();
        }
        result
    }

    fn mark_closed(&self) {
        if !self.closed.send_replace(true) {
            tracing::warn!("Coordination session {} ended", self.id);
        }
        // Dropping the senders tells every waiting actor no event is coming.
        self.watches.clear();
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn heartbeat_loop(self: Arc<Self>, session_timeout: Duration) {
        let interval = (session_timeout / 3).max(Duration::from_millis(50));
        let mut last_ok = Instant::now();

        loop {
            tokio::time::sleep(interval).await;
            if self.is_closed() {
                break;
            }

            let request = SessionRequest {
                session_id: self.id.clone(),
            };
            match self
                .call::<_, ()>(ENDPOINT_SESSION_HEARTBEAT, &request, self.request_timeout)
                .await
            {
                Ok(()) => last_ok = Instant::now(),
                Err(CoordinationError::SessionExpired) => break,
                Err(e) => {
                    tracing::warn!("Heartbeat for session {} failed: {}", self.id, e);
                    // The server will have expired us by now.
                    if last_ok.elapsed() > session_timeout {
                        self.mark_closed();
                        break;
                    }
                }
            }
        }
    }

    async fn events_loop(self: Arc<Self>) {
        let request = SessionRequest {
            session_id: self.id.clone(),
        };

        loop {
            if self.is_closed() {
                break;
            }

            match self
                .call::<_, EventsResponse>(
                    ENDPOINT_EVENTS,
                    &request,
                    EVENTS_POLL_TIMEOUT + self.request_timeout,
                )
                .await
            {
                Ok(response) => {
                    for fired in response.events {
                        match self.watches.remove(&fired.watch_id) {
                            Some((_, pending)) => {
                                let _ = pending.watcher.send(fired.event);
                            }
                            None => tracing::debug!("Event for unknown watch {}", fired.watch_id),
                        }
                    }
                }
                Err(CoordinationError::SessionExpired) => break,
                Err(e) => {
                    tracing::debug!("Event poll for session {} failed: {}", self.id, e);
                    tokio::time::sleep(EVENTS_RETRY_DELAY).await;
                }
            }
        }
    }
}

pub struct RemoteSession {
    link: Arc<SessionLink>,
    next_watch_id: AtomicU64,
    closed: watch::Receiver<bool>,
    heartbeat: JoinHandle<()>,
    events: JoinHandle<()>,
}

impl RemoteSession {
    pub async fn connect(base_url: &str, request_timeout: Duration) -> CoordinationResult<Arc<Self>> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::new();

        let opened: OpenSessionResponse = client
            .post(format!("{}{}", base_url, ENDPOINT_SESSION_OPEN))
            .timeout(request_timeout)
            .send()
            .await
            .map_err(|e| CoordinationError::ConnectionLoss(e.to_string()))?
            .json()
            .await
            .map_err(|e| CoordinationError::ConnectionLoss(e.to_string()))?;

        tracing::info!(
            "Connected to coordination service at {} (session {}, timeout {}ms)",
            base_url,
            opened.session_id,
            opened.timeout_ms
        );

        let (closed_tx, closed_rx) = watch::channel(false);
        let link = Arc::new(SessionLink {
            base_url,
            client,
            id: opened.session_id,
            request_timeout,
            watches: DashMap::new(),
            closed: closed_tx,
        });

        let session_timeout = Duration::from_millis(opened.timeout_ms);
        let heartbeat = tokio::spawn(link.clone().heartbeat_loop(session_timeout));
        let events = tokio::spawn(link.clone().events_loop());

        Ok(Arc::new(Self {
            link,
            next_watch_id: AtomicU64::new(1),
            closed: closed_rx,
            heartbeat,
            events,
        }))
    }

    fn register_watch(&self, path: &str, data: bool, watch: Option<Watcher>) -> Option<u64> {
        let watcher = watch?;
        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        self.link.watches.insert(
            id,
            PendingWatch {
                path: path.to_string(),
                data,
                watcher,
            },
        );
        Some(id)
    }

    fn forget_watch(&self, watch_id: Option<u64>) {
        if let Some(id) = watch_id {
            self.link.watches.remove(&id);
        }
    }

    async fn watched_call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        watch: Option<Watcher>,
    ) -> CoordinationResult<T> {
        let watch_id = self.register_watch(path, endpoint == ENDPOINT_EXISTS, watch);
        let request = WatchRequest {
            session_id: self.link.id.clone(),
            path: path.to_string(),
            watch_id,
        };

        let result = self
            .link
            .call(endpoint, &request, self.link.request_timeout)
            .await;
        if result.is_err() {
            self.forget_watch(watch_id);
        }
        result
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.events.abort();
    }
}

#[async_trait]
impl MembershipStore for RemoteSession {
    fn session_id(&self) -> &SessionId {
        &self.link.id
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> CoordinationResult<String> {
        let request = CreateRequest {
            session_id: self.link.id.clone(),
            path: path.to_string(),
            data,
            mode,
        };
        self.link
            .call(ENDPOINT_CREATE, &request, self.link.request_timeout)
            .await
    }

    async fn delete(&self, path: &str) -> CoordinationResult<()> {
        let request = PathRequest {
            session_id: self.link.id.clone(),
            path: path.to_string(),
        };
        self.link
            .call(ENDPOINT_DELETE, &request, self.link.request_timeout)
            .await
    }

    async fn exists(&self, path: &str, watch: Option<Watcher>) -> CoordinationResult<Option<NodeStat>> {
        let response: ExistsResponse = self.watched_call(ENDPOINT_EXISTS, path, watch).await?;
        Ok(response.stat)
    }

    async fn get_children(&self, path: &str, watch: Option<Watcher>) -> CoordinationResult<Vec<String>> {
        self.watched_call(ENDPOINT_CHILDREN, path, watch).await
    }

    async fn get_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        let request = PathRequest {
            session_id: self.link.id.clone(),
            path: path.to_string(),
        };
        self.link
            .call(ENDPOINT_GET_DATA, &request, self.link.request_timeout)
            .await
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordinationResult<NodeStat> {
        let request = SetDataRequest {
            session_id: self.link.id.clone(),
            path: path.to_string(),
            data,
        };
        self.link
            .call(ENDPOINT_SET_DATA, &request, self.link.request_timeout)
            .await
    }

    async fn remove_watches(&self, path: &str) -> CoordinationResult<()> {
        let request = PathRequest {
            session_id: self.link.id.clone(),
            path: path.to_string(),
        };
        self.link
            .call::<_, ()>(ENDPOINT_REMOVE_WATCHES, &request, self.link.request_timeout)
            .await?;
        self.link
            .watches
            .retain(|_, pending| !(pending.data && pending.path == path));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn close(&self) -> CoordinationResult<()> {
        let request = SessionRequest {
            session_id: self.link.id.clone(),
        };
        let result = self
            .link
            .call::<_, ()>(ENDPOINT_SESSION_CLOSE, &request, self.link.request_timeout)
            .await;
        self.link.mark_closed();
        match result {
            Err(CoordinationError::SessionExpired) => Ok(()),
            other => other,
        }
    }
}

pub struct RemoteConnector {
    base_url: String,
    request_timeout: Duration,
}

impl RemoteConnector {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl Connector for RemoteConnector {
    async fn connect(&self) -> CoordinationResult<Arc<dyn MembershipStore>> {
        let session: Arc<dyn MembershipStore> =
            RemoteSession::connect(&self.base_url, self.request_timeout).await?;
        Ok(session)
    }
}
