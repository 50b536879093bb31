use axum::routing::get;
use axum::{Extension, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use super::actions::ElectionActions;
use super::handlers::handle_status;
use super::state::NodeState;
use super::types::{ClusterStatus, ENDPOINT_CLUSTER_STATUS, NodeSettings};
use crate::coordination::store::{Connector, MembershipStore};
use crate::election::service::LeaderElection;
use crate::election::types::ElectionRole;
use crate::error::Result;
use crate::leader::client::WorkerClient;
use crate::leader::coordinator::QueryCoordinator;
use crate::registry::service::ServiceRegistry;
use crate::registry::types::{MembershipSnapshot, SnapshotPublisher, snapshot_channel};
use crate::worker::service::WorkerService;

const REJOIN_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const REJOIN_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// One cluster member: always a shard server, coordinator when elected.
pub struct SearchNode {
    settings: NodeSettings,
    connector: Arc<dyn Connector>,
    state: Arc<NodeState>,
    snapshot: SnapshotPublisher,
    worker: Arc<WorkerService>,
    coordinator: Arc<QueryCoordinator>,
}

impl SearchNode {
    pub fn new(
        settings: NodeSettings,
        connector: Arc<dyn Connector>,
        worker: Arc<WorkerService>,
        client: Arc<dyn WorkerClient>,
    ) -> Arc<Self> {
        let state = NodeState::new();
        let snapshot = snapshot_channel();
        let coordinator = QueryCoordinator::new(
            snapshot.subscribe(),
            client,
            worker.clone(),
            state.clone(),
            settings.request_timeout,
            settings.upload_timeout,
            settings.scoring,
        );

        Arc::new(Self {
            settings,
            connector,
            state,
            snapshot,
            worker,
            coordinator,
        })
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn coordinator(&self) -> &Arc<QueryCoordinator> {
        &self.coordinator
    }

    pub fn worker(&self) -> &Arc<WorkerService> {
        &self.worker
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn workers(&self) -> Arc<MembershipSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_workers(&self) -> watch::Receiver<Arc<MembershipSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Joins the cluster and keeps re-joining whenever the coordination
    /// session is lost. The first attempt must succeed.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let store = self.join_cluster().await?;
        tokio::spawn(self.clone().supervise(store));
        Ok(())
    }

    /// Opens a session, volunteers and takes whatever role the election
    /// assigns. A partially joined session is closed on failure so that its
    /// token does not linger.
    pub async fn join_cluster(&self) -> Result<Arc<dyn MembershipStore>> {
        let store = self.connector.connect().await?;

        match self.enter_election(store.clone()).await {
            Ok(()) => Ok(store),
            Err(e) => {
                if let Err(close_err) = store.close().await {
                    tracing::debug!("Closing failed session: {}", close_err);
                }
                self.reset().await;
                Err(e)
            }
        }
    }

    async fn enter_election(&self, store: Arc<dyn MembershipStore>) -> Result<()> {
        let registry = ServiceRegistry::new(store.clone(), self.snapshot.clone());
        registry.initialize().await?;

        let actions = Arc::new(ElectionActions::new(
            self.state.clone(),
            registry,
            store.clone(),
            self.settings.advertise.clone(),
        ));
        let election = LeaderElection::new(store.clone(), actions);
        election.initialize().await?;
        election.volunteer().await?;

        self.state.set_session(Some(store)).await;
        election.evaluate().await?;
        tokio::spawn(election.run());

        Ok(())
    }

    async fn supervise(self: Arc<Self>, mut store: Arc<dyn MembershipStore>) {
        loop {
            store.closed().await;
            tracing::warn!("Coordination session {} lost; re-joining the cluster", store.session_id());
            self.reset().await;

            let mut backoff = REJOIN_INITIAL_BACKOFF;
            store = loop {
                match self.join_cluster().await {
                    Ok(store) => break store,
                    Err(e) => {
                        tracing::warn!("Re-join failed: {} (retrying in {:?})", e, backoff);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(REJOIN_MAX_BACKOFF);
                    }
                }
            };
            info!("Re-joined the cluster with session {}", store.session_id());
        }
    }

    /// Forgets everything tied to the old session.
    async fn reset(&self) {
        self.state.set_role(ElectionRole::Candidate);
        self.state.set_session(None).await;
        self.snapshot
            .send_replace(Arc::new(MembershipSnapshot::default()));
    }

    /// Closes the session, which releases the candidacy token and registry
    /// entry immediately instead of waiting for expiry.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(store) = self.state.session().await {
            store.close().await?;
            info!("Left the cluster");
        }
        Ok(())
    }

    pub async fn status(&self) -> ClusterStatus {
        let role = self.state.role();
        let workers = (role == ElectionRole::Leader).then(|| self.workers().addresses.clone());

        ClusterStatus {
            role,
            address: self.settings.advertise.clone(),
            leader: self.state.read_leader_address().await,
            workers,
            documents: self.worker.document_count(),
            scoring: self.settings.scoring,
        }
    }

    /// Worker, coordinator and status routes of this node.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .merge(crate::worker::handlers::routes(self.worker.clone()))
            .merge(crate::leader::handlers::routes(self.coordinator.clone()))
            .route(ENDPOINT_CLUSTER_STATUS, get(handle_status))
            .layer(Extension(self.clone()))
    }
}
