use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

use super::types::LEADER_INFO_PATH;
use crate::coordination::store::MembershipStore;
use crate::election::types::ElectionRole;
use crate::leader::coordinator::Leadership;

/// Role and session of this process, surviving reconnects.
pub struct NodeState {
    role: watch::Sender<ElectionRole>,
    session: RwLock<Option<Arc<dyn MembershipStore>>>,
}

impl NodeState {
    pub fn new() -> Arc<Self> {
        let (role, _) = watch::channel(ElectionRole::Candidate);
        Arc::new(Self {
            role,
            session: RwLock::new(None),
        })
    }

    pub fn role(&self) -> ElectionRole {
        *self.role.borrow()
    }

    pub fn set_role(&self, role: ElectionRole) {
        let previous = self.role.send_replace(role);
        if previous != role {
            tracing::info!("Node role: {} -> {}", previous, role);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ElectionRole> {
        self.role.subscribe()
    }

    pub async fn session(&self) -> Option<Arc<dyn MembershipStore>> {
        self.session.read().await.clone()
    }

    pub async fn set_session(&self, session: Option<Arc<dyn MembershipStore>>) {
        *self.session.write().await = session;
    }

    /// Reads the published leader address; `None` without a session or
    /// while no leader has published yet.
    pub async fn read_leader_address(&self) -> Option<String> {
        let session = self.session().await?;
        match session.get_data(LEADER_INFO_PATH).await {
            Ok(data) => String::from_utf8(data).ok(),
            Err(e) => {
                tracing::debug!("No leader address available: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Leadership for NodeState {
    fn is_leader(&self) -> bool {
        self.role() == ElectionRole::Leader
    }

    async fn leader_address(&self) -> Option<String> {
        self.read_leader_address().await
    }
}
