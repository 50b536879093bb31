use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Parent of every worker registration.
pub const REGISTRY_NAMESPACE: &str = "/service_registry";
pub const REGISTRY_PREFIX: &str = "n_";

/// Immutable view of the live worker addresses, in registration order.
/// Replaced wholesale on every membership change, never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub addresses: Vec<String>,
}

impl MembershipSnapshot {
    pub fn new(addresses: Vec<String>) -> Self {
        Self { addresses }
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }
}

/// Single-writer handle publishing snapshots to any number of readers.
pub type SnapshotPublisher = Arc<watch::Sender<Arc<MembershipSnapshot>>>;

pub fn snapshot_channel() -> SnapshotPublisher {
    let (tx, _) = watch::channel(Arc::new(MembershipSnapshot::default()));
    Arc::new(tx)
}
