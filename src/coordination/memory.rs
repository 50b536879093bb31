//! In-memory coordination namespace.
//!
//! Holds the node tree, the live sessions and the pending one-shot watches
//! behind a single lock, so that reading a node and registering a watch on it
//! is atomic with respect to concurrent mutations: a change can never slip in
//! between the two and go unnoticed.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::info;

use super::store::{Connector, MembershipStore};
use super::types::{
    CoordinationError, CoordinationResult, CreateMode, EventType, NodeStat, SEQUENCE_WIDTH,
    SessionId, WatchedEvent, Watcher, split_path, validate_path,
};

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(6);
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_millis(500);

struct ZNode {
    data: Vec<u8>,
    created: u64,
    version: u32,
    ephemeral_owner: Option<SessionId>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl ZNode {
    fn new(data: Vec<u8>, created: u64, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            data,
            created,
            version: 0,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    fn stat(&self) -> NodeStat {
        NodeStat {
            created: self.created,
            version: self.version,
            ephemeral_owner: self.ephemeral_owner.clone(),
            num_children: self.children.len(),
        }
    }
}

struct Session {
    ephemerals: BTreeSet<String>,
    last_seen: Instant,
    /// In-process sessions are closed explicitly and never time out.
    expires: bool,
    closed: watch::Sender<bool>,
}

struct WatchRegistration {
    owner: SessionId,
    watcher: Watcher,
}

struct Namespace {
    nodes: HashMap<String, ZNode>,
    sessions: HashMap<SessionId, Session>,
    data_watches: HashMap<String, Vec<WatchRegistration>>,
    child_watches: HashMap<String, Vec<WatchRegistration>>,
    next_created: u64,
}

impl Namespace {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), ZNode::new(Vec::new(), 0, None));

        Self {
            nodes,
            sessions: HashMap::new(),
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            next_created: 1,
        }
    }

    fn check_session(&self, id: &SessionId) -> CoordinationResult<()> {
        if self.sessions.contains_key(id) {
            Ok(())
        } else {
            Err(CoordinationError::SessionExpired)
        }
    }

    fn create(
        &mut self,
        owner: &SessionId,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        validate_path(path)?;
        let (parent_path, _) =
            split_path(path).ok_or_else(|| CoordinationError::NodeExists(path.to_string()))?;

        let parent = self
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| CoordinationError::NoNode(parent_path.to_string()))?;

        if parent.ephemeral_owner.is_some() {
            return Err(CoordinationError::InvalidPath(format!(
                "{} is ephemeral and cannot have children",
                parent_path
            )));
        }

        let actual = if mode.is_sequential() {
            let seq = parent.next_sequence;
            parent.next_sequence += 1;
            format!("{}{:0width$}", path, seq, width = SEQUENCE_WIDTH)
        } else {
            path.to_string()
        };

        if self.nodes.contains_key(&actual) {
            return Err(CoordinationError::NodeExists(actual));
        }

        let (_, name) = split_path(&actual).ok_or_else(|| CoordinationError::InvalidPath(actual.clone()))?;
        let name = name.to_string();
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.insert(name);
        }

        let ephemeral_owner = if mode.is_ephemeral() {
            if let Some(session) = self.sessions.get_mut(owner) {
                session.ephemerals.insert(actual.clone());
            }
            Some(owner.clone())
        } else {
            None
        };

        let created = self.next_created;
        self.next_created += 1;
        self.nodes
            .insert(actual.clone(), ZNode::new(data, created, ephemeral_owner));

        let parent_path = parent_path.to_string();
        self.fire_data(&actual, EventType::NodeCreated);
        self.fire_children(&parent_path, EventType::NodeChildrenChanged);

        Ok(actual)
    }

    fn delete(&mut self, path: &str) -> CoordinationResult<()> {
        validate_path(path)?;
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;

        if !node.children.is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }

        let (parent_path, name) =
            split_path(path).ok_or_else(|| CoordinationError::InvalidPath(path.to_string()))?;
        let parent_path = parent_path.to_string();

        if let Some(parent) = self.nodes.get_mut(&parent_path) {
            parent.children.remove(name);
        }

        if let Some(removed) = self.nodes.remove(path)
            && let Some(owner) = removed.ephemeral_owner
            && let Some(session) = self.sessions.get_mut(&owner)
        {
            session.ephemerals.remove(path);
        }

        self.fire_data(path, EventType::NodeDeleted);
        self.fire_children(path, EventType::NodeDeleted);
        self.fire_children(&parent_path, EventType::NodeChildrenChanged);

        Ok(())
    }

    fn fire_data(&mut self, path: &str, event_type: EventType) {
        if let Some(registrations) = self.data_watches.remove(path) {
            deliver(registrations, event_type, path);
        }
    }

    fn fire_children(&mut self, path: &str, event_type: EventType) {
        if let Some(registrations) = self.child_watches.remove(path) {
            deliver(registrations, event_type, path);
        }
    }

    fn close_session(&mut self, id: &SessionId) -> CoordinationResult<()> {
        let session = self
            .sessions
            .remove(id)
            .ok_or(CoordinationError::SessionExpired)?;

        // Deepest paths first; ephemerals cannot have children, so order
        // only matters for determinism of the fired events.
        for path in session.ephemerals.iter().rev() {
            if let Err(e) = self.delete(path) {
                tracing::warn!("Failed to remove ephemeral node {}: {}", path, e);
            }
        }

        for registrations in self.data_watches.values_mut() {
            registrations.retain(|r| &r.owner != id);
        }
        for registrations in self.child_watches.values_mut() {
            registrations.retain(|r| &r.owner != id);
        }
        self.data_watches.retain(|_, r| !r.is_empty());
        self.child_watches.retain(|_, r| !r.is_empty());

        session.closed.send_replace(true);

        Ok(())
    }
}

fn deliver(registrations: Vec<WatchRegistration>, event_type: EventType, path: &str) {
    for registration in registrations {
        let event = WatchedEvent {
            event_type,
            path: path.to_string(),
        };
        if registration.watcher.send(event).is_err() {
            tracing::trace!(
                "Watcher of session {} dropped before {:?} on {}",
                registration.owner,
                event_type,
                path
            );
        }
    }
}

/// Shared coordination state. One instance backs every session handed out by
/// it, whether in-process (`LocalSession`) or over HTTP (the coordination
/// server).
pub struct CoordinationState {
    namespace: Mutex<Namespace>,
    session_timeout: Duration,
}

impl CoordinationState {
    pub fn new(session_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            namespace: Mutex::new(Namespace::new()),
            session_timeout,
        })
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub async fn open_session(&self, expires: bool) -> (SessionId, watch::Receiver<bool>) {
        let id = SessionId::new();
        let (closed_tx, closed_rx) = watch::channel(false);

        let mut ns = self.namespace.lock().await;
        ns.sessions.insert(
            id.clone(),
            Session {
                ephemerals: BTreeSet::new(),
                last_seen: Instant::now(),
                expires,
                closed: closed_tx,
            },
        );
        tracing::debug!("Opened session {} ({} live)", id, ns.sessions.len());

        (id, closed_rx)
    }

    /// Opens an in-process session that never times out.
    pub async fn connect(self: &Arc<Self>) -> Arc<LocalSession> {
        let (id, closed) = self.open_session(false).await;
        Arc::new(LocalSession {
            state: self.clone(),
            id,
            closed,
        })
    }

    pub async fn heartbeat(&self, id: &SessionId) -> CoordinationResult<()> {
        let mut ns = self.namespace.lock().await;
        match ns.sessions.get_mut(id) {
            Some(session) => {
                session.last_seen = Instant::now();
                Ok(())
            }
            None => Err(CoordinationError::SessionExpired),
        }
    }

    /// Ends a session as if its owner had disconnected.
    pub async fn close_session(&self, id: &SessionId) -> CoordinationResult<()> {
        let mut ns = self.namespace.lock().await;
        ns.close_session(id)?;
        info!("Session {} closed ({} live)", id, ns.sessions.len());
        Ok(())
    }

    pub async fn session_count(&self) -> usize {
        self.namespace.lock().await.sessions.len()
    }

    /// Pending `exists` watches across all sessions.
    pub async fn data_watch_count(&self) -> usize {
        self.namespace.lock().await.data_watches.values().map(Vec::len).sum()
    }

    pub async fn create(
        &self,
        id: &SessionId,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        let mut ns = self.namespace.lock().await;
        ns.check_session(id)?;
        ns.create(id, path, data, mode)
    }

    pub async fn delete(&self, id: &SessionId, path: &str) -> CoordinationResult<()> {
        let mut ns = self.namespace.lock().await;
        ns.check_session(id)?;
        ns.delete(path)
    }

    pub async fn exists(
        &self,
        id: &SessionId,
        path: &str,
        watch: Option<Watcher>,
    ) -> CoordinationResult<Option<NodeStat>> {
        validate_path(path)?;
        let mut ns = self.namespace.lock().await;
        ns.check_session(id)?;

        let stat = ns.nodes.get(path).map(ZNode::stat);
        if let Some(watcher) = watch {
            ns.data_watches
                .entry(path.to_string())
                .or_default()
                .push(WatchRegistration {
                    owner: id.clone(),
                    watcher,
                });
        }

        Ok(stat)
    }

    pub async fn get_children(
        &self,
        id: &SessionId,
        path: &str,
        watch: Option<Watcher>,
    ) -> CoordinationResult<Vec<String>> {
        validate_path(path)?;
        let mut ns = self.namespace.lock().await;
        ns.check_session(id)?;

        let children: Vec<String> = ns
            .nodes
            .get(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?
            .children
            .iter()
            .cloned()
            .collect();

        if let Some(watcher) = watch {
            ns.child_watches
                .entry(path.to_string())
                .or_default()
                .push(WatchRegistration {
                    owner: id.clone(),
                    watcher,
                });
        }

        Ok(children)
    }

    pub async fn get_data(&self, id: &SessionId, path: &str) -> CoordinationResult<Vec<u8>> {
        validate_path(path)?;
        let ns = self.namespace.lock().await;
        ns.check_session(id)?;
        ns.nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    pub async fn set_data(
        &self,
        id: &SessionId,
        path: &str,
        data: Vec<u8>,
    ) -> CoordinationResult<NodeStat> {
        validate_path(path)?;
        let mut ns = self.namespace.lock().await;
        ns.check_session(id)?;

        let node = ns
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        node.data = data;
        node.version += 1;
        let stat = node.stat();

        ns.fire_data(path, EventType::NodeDataChanged);
        Ok(stat)
    }

    pub async fn remove_watches(&self, id: &SessionId, path: &str) -> CoordinationResult<()> {
        validate_path(path)?;
        let mut ns = self.namespace.lock().await;
        ns.check_session(id)?;

        if let Some(registrations) = ns.data_watches.get_mut(path) {
            registrations.retain(|r| &r.owner != id);
            if registrations.is_empty() {
                ns.data_watches.remove(path);
            }
        }
        Ok(())
    }

    /// Expires sessions whose owners stopped heartbeating.
    pub async fn run_expiry_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(EXPIRY_CHECK_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut ns = self.namespace.lock().await;
            let expired: Vec<SessionId> = ns
                .sessions
                .iter()
                .filter(|(_, s)| s.expires && now.duration_since(s.last_seen) > self.session_timeout)
                .map(|(id, _)| id.clone())
                .collect();

            for id in expired {
                tracing::warn!("Session {} expired (no heartbeat for {:?})", id, self.session_timeout);
                if let Err(e) = ns.close_session(&id) {
                    tracing::debug!("Session {} already gone: {}", id, e);
                }
            }
        }
    }
}

/// A session living in the same process as the coordination state.
pub struct LocalSession {
    state: Arc<CoordinationState>,
    id: SessionId,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl MembershipStore for LocalSession {
    fn session_id(&self) -> &SessionId {
        &self.id
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> CoordinationResult<String> {
        self.state.create(&self.id, path, data, mode).await
    }

    async fn delete(&self, path: &str) -> CoordinationResult<()> {
        self.state.delete(&self.id, path).await
    }

    async fn exists(&self, path: &str, watch: Option<Watcher>) -> CoordinationResult<Option<NodeStat>> {
        self.state.exists(&self.id, path, watch).await
    }

    async fn get_children(&self, path: &str, watch: Option<Watcher>) -> CoordinationResult<Vec<String>> {
        self.state.get_children(&self.id, path, watch).await
    }

    async fn get_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        self.state.get_data(&self.id, path).await
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordinationResult<NodeStat> {
        self.state.set_data(&self.id, path, data).await
    }

    async fn remove_watches(&self, path: &str) -> CoordinationResult<()> {
        self.state.remove_watches(&self.id, path).await
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn closed(&self) {
        let mut closed = self.closed.clone();
        // An error means the sender is gone, which also means closed.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn close(&self) -> CoordinationResult<()> {
        self.state.close_session(&self.id).await
    }
}

pub struct LocalConnector {
    state: Arc<CoordinationState>,
}

impl LocalConnector {
    pub fn new(state: Arc<CoordinationState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> CoordinationResult<Arc<dyn MembershipStore>> {
        let session: Arc<dyn MembershipStore> = self.state.connect().await;
        Ok(session)
    }
}
