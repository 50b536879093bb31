//! Coordination Network Protocol
//!
//! Endpoints and DTOs for reaching a `CoordinationState` from another process.
//! Every reply body is a JSON `Result<T, CoordinationError>` so that the
//! client can reproduce the exact error classification locally.

use serde::{Deserialize, Serialize};

use super::types::{CreateMode, NodeStat, SessionId, WatchedEvent};

// --- API Endpoints ---

pub const ENDPOINT_SESSION_OPEN: &str = "/coord/session/open";
pub const ENDPOINT_SESSION_HEARTBEAT: &str = "/coord/session/heartbeat";
pub const ENDPOINT_SESSION_CLOSE: &str = "/coord/session/close";
pub const ENDPOINT_CREATE: &str = "/coord/create";
pub const ENDPOINT_DELETE: &str = "/coord/delete";
pub const ENDPOINT_EXISTS: &str = "/coord/exists";
pub const ENDPOINT_CHILDREN: &str = "/coord/children";
pub const ENDPOINT_GET_DATA: &str = "/coord/get_data";
pub const ENDPOINT_SET_DATA: &str = "/coord/set_data";
pub const ENDPOINT_REMOVE_WATCHES: &str = "/coord/remove_watches";
/// Long-poll endpoint delivering fired watches for one session.
pub const ENDPOINT_EVENTS: &str = "/coord/events";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    pub session_id: SessionId,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRequest {
    pub session_id: SessionId,
    pub path: String,
    pub data: Vec<u8>,
    pub mode: CreateMode,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PathRequest {
    pub session_id: SessionId,
    pub path: String,
}

/// Read request that may register a one-shot watch. The `watch_id` is chosen
/// by the client and echoed back with the event when the watch fires.
#[derive(Debug, Serialize, Deserialize)]
pub struct WatchRequest {
    pub session_id: SessionId,
    pub path: String,
    pub watch_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetDataRequest {
    pub session_id: SessionId,
    pub path: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub stat: Option<NodeStat>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FiredWatch {
    pub watch_id: u64,
    pub event: WatchedEvent,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EventsResponse {
    pub events: Vec<FiredWatch>,
}
