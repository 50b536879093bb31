//! Client contract over the coordination service.
//!
//! Every `MembershipStore` value is one session: ephemeral nodes it creates
//! live exactly as long as it does. Watches are one-shot and are delivered as
//! messages on the `Watcher` channel handed in at registration time.

use async_trait::async_trait;
use std::sync::Arc;

use super::types::{CoordinationError, CoordinationResult, CreateMode, NodeStat, SessionId, Watcher};

#[async_trait]
pub trait MembershipStore: Send + Sync {
    fn session_id(&self) -> &SessionId;

    /// Creates a node and returns its actual path (which differs from `path`
    /// for sequential modes).
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> CoordinationResult<String>;

    async fn delete(&self, path: &str) -> CoordinationResult<()>;

    /// Returns the node's stat, or `None` if it does not exist. A watch is
    /// registered either way and fires on creation, deletion or data change.
    async fn exists(&self, path: &str, watch: Option<Watcher>) -> CoordinationResult<Option<NodeStat>>;

    /// Lists child names. The watch fires when the child set changes or the
    /// node itself is deleted.
    async fn get_children(&self, path: &str, watch: Option<Watcher>) -> CoordinationResult<Vec<String>>;

    async fn get_data(&self, path: &str) -> CoordinationResult<Vec<u8>>;

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordinationResult<NodeStat>;

    /// Drops this session's pending `exists` watches on `path`.
    async fn remove_watches(&self, path: &str) -> CoordinationResult<()>;

    fn is_closed(&self) -> bool;

    /// Resolves once the session has ended.
    async fn closed(&self);

    /// Ends the session, removing its ephemeral nodes.
    async fn close(&self) -> CoordinationResult<()>;
}

/// Produces fresh sessions. A new session means a new ephemeral identity.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> CoordinationResult<Arc<dyn MembershipStore>>;
}

/// Creates a persistent node if it is missing. Concurrent creation by another
/// process is not an error.
pub async fn ensure_path(store: &dyn MembershipStore, path: &str) -> CoordinationResult<()> {
    if store.exists(path, None).await?.is_some() {
        return Ok(());
    }

    match store.create(path, Vec::new(), CreateMode::Persistent).await {
        Ok(_) => {
            tracing::info!("Created coordination node {}", path);
            Ok(())
        }
        Err(CoordinationError::NodeExists(_)) => {
            tracing::debug!("Coordination node {} already exists", path);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Creates `path` with `data`, or overwrites the data if it already exists.
pub async fn create_or_set(
    store: &dyn MembershipStore,
    path: &str,
    data: Vec<u8>,
    mode: CreateMode,
) -> CoordinationResult<()> {
    loop {
        if store.exists(path, None).await?.is_some() {
            match store.set_data(path, data.clone()).await {
                Ok(_) => return Ok(()),
                // Removed between the check and the write; try creating.
                Err(CoordinationError::NoNode(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        match store.create(path, data.clone(), mode).await {
            Ok(_) => return Ok(()),
            Err(CoordinationError::NodeExists(_)) => continue,
            Err(e) => return Err(e),
        }
    }
}
