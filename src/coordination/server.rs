//! HTTP front for a `CoordinationState`.
//!
//! Remote sessions heartbeat to stay alive and long-poll `/coord/events` for
//! fired watches. Each watch registered over the wire gets a forwarding task
//! that moves its single event into the owning session's outbox.

use axum::{Extension, Json, Router, http::StatusCode, routing::post};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, mpsc};

use super::memory::CoordinationState;
use super::protocol::*;
use super::types::{CoordinationError, CoordinationResult, SessionId, Watcher};

/// How long an events request is held open when nothing has fired.
pub const EVENTS_POLL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Default)]
struct Outbox {
    events: Mutex<Vec<FiredWatch>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Outbox {
    async fn push(&self, fired: FiredWatch) {
        self.events.lock().await.push(fired);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    async fn wait_and_drain(&self, timeout: Duration) -> CoordinationResult<Vec<FiredWatch>> {
        {
            let mut events = self.events.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(CoordinationError::SessionExpired);
            }
            if !events.is_empty() {
                return Ok(std::mem::take(&mut *events));
            }
        }

        // A permit stored by an earlier notify_one completes this immediately.
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;

        if self.closed.load(Ordering::SeqCst) {
            return Err(CoordinationError::SessionExpired);
        }
        Ok(std::mem::take(&mut *self.events.lock().await))
    }
}

pub struct CoordinationServer {
    state: Arc<CoordinationState>,
    outboxes: DashMap<SessionId, Arc<Outbox>>,
}

impl CoordinationServer {
    pub fn new(state: Arc<CoordinationState>) -> Arc<Self> {
        Arc::new(Self {
            state,
            outboxes: DashMap::new(),
        })
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(ENDPOINT_SESSION_OPEN, post(handle_open_session))
            .route(ENDPOINT_SESSION_HEARTBEAT, post(handle_heartbeat))
            .route(ENDPOINT_SESSION_CLOSE, post(handle_close_session))
            .route(ENDPOINT_CREATE, post(handle_create))
            .route(ENDPOINT_DELETE, post(handle_delete))
            .route(ENDPOINT_EXISTS, post(handle_exists))
            .route(ENDPOINT_CHILDREN, post(handle_children))
            .route(ENDPOINT_GET_DATA, post(handle_get_data))
            .route(ENDPOINT_SET_DATA, post(handle_set_data))
            .route(ENDPOINT_REMOVE_WATCHES, post(handle_remove_watches))
            .route(ENDPOINT_EVENTS, post(handle_events))
            .layer(Extension(self))
    }

    async fn open_session(self: &Arc<Self>) -> OpenSessionResponse {
        let (session_id, mut closed) = self.state.open_session(true).await;
        let outbox = Arc::new(Outbox::default());
        self.outboxes.insert(session_id.clone(), outbox.clone());

        let server = self.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            let _ = closed.wait_for(|closed| *closed).await;
            server.outboxes.remove(&id);
            outbox.close();
        });

        OpenSessionResponse {
            session_id,
            timeout_ms: self.state.session_timeout().as_millis() as u64,
        }
    }

    /// Turns a wire watch id into a local watcher that lands in the outbox.
    fn forward_watch(&self, session_id: &SessionId, watch_id: Option<u64>) -> Option<Watcher> {
        let watch_id = watch_id?;
        let outbox = self.outboxes.get(session_id)?.value().clone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Some(event) = rx.recv().await {
                outbox.push(FiredWatch { watch_id, event }).await;
            }
        });

        Some(tx)
    }
}

fn reply<T: Serialize>(result: CoordinationResult<T>) -> (StatusCode, Json<CoordinationResult<T>>) {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(CoordinationError::NoNode(_)) => StatusCode::NOT_FOUND,
        Err(CoordinationError::NodeExists(_)) | Err(CoordinationError::NotEmpty(_)) => {
            StatusCode::CONFLICT
        }
        Err(CoordinationError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
        Err(CoordinationError::SessionExpired) => StatusCode::GONE,
        Err(CoordinationError::ConnectionLoss(_)) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(result))
}

async fn handle_open_session(
    Extension(server): Extension<Arc<CoordinationServer>>,
) -> (StatusCode, Json<OpenSessionResponse>) {
    let response = server.open_session().await;
    tracing::info!("Opened remote session {}", response.session_id);
    (StatusCode::OK, Json(response))
}

async fn handle_heartbeat(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<SessionRequest>,
) -> (StatusCode, Json<CoordinationResult<()>>) {
    reply(server.state.heartbeat(&req.session_id).await)
}

async fn handle_close_session(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<SessionRequest>,
) -> (StatusCode, Json<CoordinationResult<()>>) {
    reply(server.state.close_session(&req.session_id).await)
}

async fn handle_create(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<CreateRequest>,
) -> (StatusCode, Json<CoordinationResult<String>>) {
    reply(
        server
            .state
            .create(&req.session_id, &req.path, req.data, req.mode)
            .await,
    )
}

async fn handle_delete(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<PathRequest>,
) -> (StatusCode, Json<CoordinationResult<()>>) {
    reply(server.state.delete(&req.session_id, &req.path).await)
}

async fn handle_exists(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<WatchRequest>,
) -> (StatusCode, Json<CoordinationResult<ExistsResponse>>) {
    let watcher = server.forward_watch(&req.session_id, req.watch_id);
    let result = server
        .state
        .exists(&req.session_id, &req.path, watcher)
        .await
        .map(|stat| ExistsResponse { stat });
    reply(result)
}

async fn handle_children(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<WatchRequest>,
) -> (StatusCode, Json<CoordinationResult<Vec<String>>>) {
    let watcher = server.forward_watch(&req.session_id, req.watch_id);
    reply(
        server
            .state
            .get_children(&req.session_id, &req.path, watcher)
            .await,
    )
}

async fn handle_get_data(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<PathRequest>,
) -> (StatusCode, Json<CoordinationResult<Vec<u8>>>) {
    reply(server.state.get_data(&req.session_id, &req.path).await)
}

async fn handle_set_data(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<SetDataRequest>,
) -> (StatusCode, Json<CoordinationResult<super::types::NodeStat>>) {
    reply(
        server
            .state
            .set_data(&req.session_id, &req.path, req.data)
            .await,
    )
}

async fn handle_remove_watches(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<PathRequest>,
) -> (StatusCode, Json<CoordinationResult<()>>) {
    reply(server.state.remove_watches(&req.session_id, &req.path).await)
}

async fn handle_events(
    Extension(server): Extension<Arc<CoordinationServer>>,
    Json(req): Json<SessionRequest>,
) -> (StatusCode, Json<CoordinationResult<EventsResponse>>) {
    let outbox = match server.outboxes.get(&req.session_id) {
        Some(outbox) => outbox.value().clone(),
        None => return reply(Err(CoordinationError::SessionExpired)),
    };

    let result = outbox
        .wait_and_drain(EVENTS_POLL_TIMEOUT)
        .await
        .map(|events| EventsResponse { events });
    reply(result)
}
