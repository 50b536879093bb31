use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Width of the counter appended to sequential node names.
pub const SEQUENCE_WIDTH: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a node is created.
///
/// Ephemeral nodes are bound to the creating session and vanish with it.
/// Sequential nodes get a monotonically increasing, zero-padded counter
/// appended to the requested name, unique among their siblings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    PersistentSequential,
    Ephemeral,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Metadata returned by `exists` and `set_data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStat {
    /// Global creation order of the node.
    pub created: u64,
    /// Incremented on every `set_data`.
    pub version: u32,
    pub ephemeral_owner: Option<SessionId>,
    pub num_children: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// A fired one-shot watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub path: String,
}

/// Delivery channel for a one-shot watch. Each registration receives at most
/// one event; the consuming actor owns the receiving end.
pub type Watcher = mpsc::UnboundedSender<WatchedEvent>;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("session expired")]
    SessionExpired,

    #[error("connection lost: {0}")]
    ConnectionLoss(String),
}

pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// Validates an absolute, slash-separated path without a trailing slash.
pub fn validate_path(path: &str) -> CoordinationResult<()> {
    let valid = path == "/"
        || (path.starts_with('/')
            && !path.ends_with('/')
            && !path.contains("//")
            && !path.split('/').any(|segment| segment == "." || segment == ".."));

    if valid {
        Ok(())
    } else {
        Err(CoordinationError::InvalidPath(path.to_string()))
    }
}

pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Returns `(parent, name)`; `None` for the root.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    if path == "/" {
        return None;
    }
    let idx = path.rfind('/')?;
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Some((parent, &path[idx + 1..]))
}

/// Parses the counter suffix of a sequential node name.
pub fn sequence_of(name: &str) -> Option<u64> {
    if name.len() < SEQUENCE_WIDTH {
        return None;
    }
    name[name.len() - SEQUENCE_WIDTH..].parse().ok()
}

/// Sorts sequential child names by their counter; names without a counter go
/// last, ordered lexicographically.
pub fn sort_sequential(children: &mut [String]) {
    children.sort_by(|a, b| match (sequence_of(a), sequence_of(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });
}
