use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::state::NodeState;
use super::types::LEADER_INFO_PATH;
use crate::coordination::store::{MembershipStore, create_or_set};
use crate::coordination::types::CreateMode;
use crate::election::types::{ElectionRole, OnElectionCallback};
use crate::error::Result;
use crate::registry::service::ServiceRegistry;

/// What a node does when the election hands it a role.
pub struct ElectionActions {
    state: Arc<NodeState>,
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn MembershipStore>,
    advertise: String,
}

impl ElectionActions {
    pub fn new(
        state: Arc<NodeState>,
        registry: Arc<ServiceRegistry>,
        store: Arc<dyn MembershipStore>,
        advertise: String,
    ) -> Self {
        Self {
            state,
            registry,
            store,
            advertise,
        }
    }
}

#[async_trait]
impl OnElectionCallback for ElectionActions {
    async fn on_elected_to_be_leader(&self) -> Result<()> {
        // The leader coordinates and no longer serves shard queries.
        self.registry.unregister_from_cluster().await?;
        self.registry.register_for_updates().await?;
        create_or_set(
            self.store.as_ref(),
            LEADER_INFO_PATH,
            self.advertise.as_bytes().to_vec(),
            CreateMode::Ephemeral,
        )
        .await?;

        self.state.set_role(ElectionRole::Leader);
        info!("Published {} as leader address", self.advertise);
        Ok(())
    }

    async fn on_worker(&self) -> Result<()> {
        self.registry.register_to_cluster(&self.advertise).await?;
        self.state.set_role(ElectionRole::Follower);

        match self.state.read_leader_address().await {
            Some(leader) => info!("Serving as worker; leader is {}", leader),
            None => info!("Serving as worker; leader not published yet"),
        }
        Ok(())
    }
}
