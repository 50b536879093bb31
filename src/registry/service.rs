use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use super::types::{MembershipSnapshot, REGISTRY_NAMESPACE, REGISTRY_PREFIX, SnapshotPublisher};
use crate::coordination::store::{MembershipStore, ensure_path};
use crate::coordination::types::{CoordinationError, CreateMode, Watcher, join_path, sort_sequential};
use crate::error::Result;

const REFRESH_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const REFRESH_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Worker pool membership backed by ephemeral sequential registry entries.
///
/// Workers register their advertised address; the leader keeps a child watch
/// on the registry and republishes a complete `MembershipSnapshot` each time
/// it fires.
pub struct ServiceRegistry {
    store: Arc<dyn MembershipStore>,
    snapshot: SnapshotPublisher,
    /// Path of our own entry; doubles as the "already registered" flag.
    registration: Mutex<Option<String>>,
    /// Serializes refreshes so snapshots are published in listing order.
    refresh: Mutex<()>,
    updates: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn MembershipStore>, snapshot: SnapshotPublisher) -> Arc<Self> {
        Arc::new(Self {
            store,
            snapshot,
            registration: Mutex::new(None),
            refresh: Mutex::new(()),
            updates: Mutex::new(None),
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        ensure_path(self.store.as_ref(), REGISTRY_NAMESPACE).await?;
        Ok(())
    }

    pub async fn register_to_cluster(&self, address: &str) -> Result<()> {
        let mut registration = self.registration.lock().await;
        if let Some(path) = registration.as_ref() {
            tracing::debug!("Already registered at {}", path);
            return Ok(());
        }

        let prefix = join_path(REGISTRY_NAMESPACE, REGISTRY_PREFIX);
        let path = self
            .store
            .create(&prefix, address.as_bytes().to_vec(), CreateMode::EphemeralSequential)
            .await?;

        info!("Registered to service registry as {} ({})", path, address);
        *registration = Some(path);
        Ok(())
    }

    pub async fn unregister_from_cluster(&self) -> Result<()> {
        let mut registration = self.registration.lock().await;
        let Some(path) = registration.take() else {
            return Ok(());
        };

        match self.store.delete(&path).await {
            Ok(()) => info!("Unregistered {} from service registry", path),
            Err(CoordinationError::NoNode(_)) => {
                tracing::debug!("Registry entry {} already gone", path)
            }
            Err(e) => {
                *registration = Some(path);
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub async fn is_registered(&self) -> bool {
        self.registration.lock().await.is_some()
    }

    /// Publishes the current membership and keeps it fresh until the session
    /// ends. Calling it again while already watching is a no-op.
    pub async fn register_for_updates(self: &Arc<Self>) -> Result<()> {
        let mut updates = self.updates.lock().await;
        if updates.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.update_addresses(Some(tx.clone())).await?;

        let registry = self.clone();
        *updates = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        tracing::debug!("Registry watch fired: {:?} on {}", event.event_type, event.path);
                        if !registry.refresh_until_watched(&tx).await {
                            break;
                        }
                    }
                    _ = registry.store.closed() => break,
                }
            }
            tracing::debug!("Registry watch stopped");
        }));

        Ok(())
    }

    /// Retries the refresh with backoff until one succeeds, since a failed
    /// listing leaves no child watch armed. Returns false once the session
    /// has ended.
    async fn refresh_until_watched(&self, tx: &Watcher) -> bool {
        let mut backoff = REFRESH_INITIAL_BACKOFF;

        loop {
            match self.update_addresses(Some(tx.clone())).await {
                Ok(_) => return true,
                Err(e) => {
                    tracing::warn!("Failed to refresh service registry: {} (retrying in {:?})", e, backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.store.closed() => return false,
                    }
                    backoff = (backoff * 2).min(REFRESH_MAX_BACKOFF);
                }
            }
        }
    }

    /// Re-reads the registry, optionally re-arming the child watch, and
    /// replaces the published snapshot. Entries that vanish between listing
    /// and reading are skipped.
    pub async fn update_addresses(&self, watch: Option<Watcher>) -> Result<Arc<MembershipSnapshot>> {
        let _guard = self.refresh.lock().await;

        let mut children = self.store.get_children(REGISTRY_NAMESPACE, watch).await?;
        sort_sequential(&mut children);

        let mut addresses = Vec::with_capacity(children.len());
        for child in children {
            let path = join_path(REGISTRY_NAMESPACE, &child);
            match self.store.get_data(&path).await {
                Ok(data) => match String::from_utf8(data) {
                    Ok(address) if !address.is_empty() => addresses.push(address),
                    _ => tracing::warn!("Ignoring registry entry {} with unreadable address", path),
                },
                Err(CoordinationError::NoNode(_)) => {
                    tracing::debug!("Registry entry {} vanished during refresh", path)
                }
                Err(e) => return Err(e.into()),
            }
        }

        let snapshot = Arc::new(MembershipSnapshot::new(addresses));
        let previous = self.snapshot.send_replace(snapshot.clone());
        if previous.addresses != snapshot.addresses {
            info!("The cluster addresses are: {:?}", snapshot.addresses);
        }

        Ok(snapshot)
    }

    /// Current snapshot; never blocks on the coordination service.
    pub fn get_all_service_addresses(&self) -> Arc<MembershipSnapshot> {
        self.snapshot.borrow().clone()
    }
}
