//! A `MembershipStore` wrapper that injects coordination failures, for tests
//! of the actors that must recover from them.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::store::MembershipStore;
use super::types::{CoordinationError, CoordinationResult, CreateMode, NodeStat, SessionId, Watcher};

#[derive(Default)]
struct Faults {
    /// `get_children` calls let through before failures start.
    children_skip: usize,
    children_failures: usize,
    /// Deleted right before the next `exists` call on it.
    vanish_on_exists: Option<String>,
}

pub struct FaultyStore {
    inner: Arc<dyn MembershipStore>,
    faults: Mutex<Faults>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn MembershipStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            faults: Mutex::new(Faults::default()),
        })
    }

    /// Lets `skip` listings through, then fails the next `failures` ones.
    pub fn fail_children_after(&self, skip: usize, failures: usize) {
        let mut faults = self.faults.lock().unwrap();
        faults.children_skip = skip;
        faults.children_failures = failures;
    }

    /// Deletes `path` just before the next `exists` on it runs.
    pub fn vanish_before_exists(&self, path: &str) {
        self.faults.lock().unwrap().vanish_on_exists = Some(path.to_string());
    }
}

#[async_trait]
impl MembershipStore for FaultyStore {
    fn session_id(&self) -> &SessionId {
        self.inner.session_id()
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> CoordinationResult<String> {
        self.inner.create(path, data, mode).await
    }

    async fn delete(&self, path: &str) -> CoordinationResult<()> {
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str, watch: Option<Watcher>) -> CoordinationResult<Option<NodeStat>> {
        let vanish = {
            let mut faults = self.faults.lock().unwrap();
            if faults.vanish_on_exists.as_deref() == Some(path) {
                faults.vanish_on_exists.take()
            } else {
                None
            }
        };
        if let Some(path) = vanish {
            self.inner.delete(&path).await?;
        }
        self.inner.exists(path, watch).await
    }

    async fn get_children(&self, path: &str, watch: Option<Watcher>) -> CoordinationResult<Vec<String>> {
        let fail = {
            let mut faults = self.faults.lock().unwrap();
            if faults.children_skip > 0 {
                faults.children_skip -= 1;
                false
            } else if faults.children_failures > 0 {
                faults.children_failures -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(CoordinationError::ConnectionLoss("injected listing failure".to_string()));
        }
        self.inner.get_children(path, watch).await
    }

    async fn get_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        self.inner.get_data(path).await
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> CoordinationResult<NodeStat> {
        self.inner.set_data(path, data).await
    }

    async fn remove_watches(&self, path: &str) -> CoordinationResult<()> {
        self.inner.remove_watches(path).await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn closed(&self) {
        self.inner.closed().await
    }

    async fn close(&self) -> CoordinationResult<()> {
        self.inner.close().await
    }
}
