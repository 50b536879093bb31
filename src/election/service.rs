use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::info;

use super::types::{CANDIDATE_PREFIX, ELECTION_NAMESPACE, ElectionRole, OnElectionCallback};
use crate::coordination::store::{MembershipStore, ensure_path};
use crate::coordination::types::{
    CoordinationError, CreateMode, EventType, WatchedEvent, join_path, sort_sequential, split_path,
};
use crate::error::{Error, Result};

const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Default)]
struct ElectionState {
    /// Name of our candidacy token under the election namespace.
    token: Option<String>,
    /// Predecessor token currently watched, if following.
    watching: Option<String>,
}

/// Leader election over sequential ephemeral tokens.
///
/// The process owning the lowest token leads; every other process watches
/// only its immediate predecessor, so a departure wakes exactly one
/// follower. Evaluations are serialized by the state lock and fired watches
/// arrive as messages on a channel drained by `run`.
pub struct LeaderElection {
    store: Arc<dyn MembershipStore>,
    callback: Arc<dyn OnElectionCallback>,
    state: Mutex<ElectionState>,
    role: watch::Sender<ElectionRole>,
    events_tx: mpsc::UnboundedSender<WatchedEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<WatchedEvent>>>,
}

impl LeaderElection {
    pub fn new(store: Arc<dyn MembershipStore>, callback: Arc<dyn OnElectionCallback>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (role, _) = watch::channel(ElectionRole::Candidate);

        Arc::new(Self {
            store,
            callback,
            state: Mutex::new(ElectionState::default()),
            role,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        ensure_path(self.store.as_ref(), ELECTION_NAMESPACE).await?;
        Ok(())
    }

    /// Creates this session's candidacy token. Repeated calls return the
    /// existing token.
    pub async fn volunteer(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.token.as_ref() {
            tracing::debug!("Already volunteered as {}", token);
            return Ok(token.clone());
        }

        let prefix = join_path(ELECTION_NAMESPACE, CANDIDATE_PREFIX);
        let path = self
            .store
            .create(&prefix, Vec::new(), CreateMode::EphemeralSequential)
            .await?;
        let name = split_path(&path)
            .map(|(_, name)| name.to_string())
            .ok_or_else(|| CoordinationError::InvalidPath(path.clone()))?;

        info!("Volunteered for leadership with token {}", name);
        state.token = Some(name.clone());
        Ok(name)
    }

    /// Decides this process's role from the current token set.
    ///
    /// Loops until either our token is the lowest or a predecessor that still
    /// exists is being watched. A predecessor gone between listing and
    /// watching triggers a fresh listing.
    pub async fn evaluate(&self) -> Result<ElectionRole> {
        let mut state = self.state.lock().await;
        let token = state
            .token
            .clone()
            .ok_or_else(|| Error::InvalidRequest("evaluate called before volunteer".to_string()))?;

        loop {
            let mut tokens: Vec<String> = self
                .store
                .get_children(ELECTION_NAMESPACE, None)
                .await?
                .into_iter()
                .filter(|name| name.starts_with(CANDIDATE_PREFIX))
                .collect();
            sort_sequential(&mut tokens);

            let position = tokens
                .iter()
                .position(|name| name == &token)
                .ok_or_else(|| CoordinationError::NoNode(join_path(ELECTION_NAMESPACE, &token)))?;

            if position == 0 {
                state.watching = None;
                if self.role() != ElectionRole::Leader {
                    self.callback.on_elected_to_be_leader().await?;
                    self.role.send_replace(ElectionRole::Leader);
                    info!("Token {} is the lowest of {}; I am the leader", token, tokens.len());
                }
                return Ok(ElectionRole::Leader);
            }

            let predecessor = tokens[position - 1].clone();
            let predecessor_path = join_path(ELECTION_NAMESPACE, &predecessor);

            let stat = self
                .store
                .exists(&predecessor_path, Some(self.events_tx.clone()))
                .await?;
            if stat.is_none() {
                // Sequential names are never reused, so this watch could only leak.
                self.store.remove_watches(&predecessor_path).await?;
                tracing::debug!("Predecessor {} vanished before it was watched", predecessor);
                continue;
            }

            if state.watching.as_deref() != Some(predecessor.as_str()) {
                info!("Watching predecessor {}", predecessor);
            }
            state.watching = Some(predecessor);

            if self.role() != ElectionRole::Follower {
                self.callback.on_worker().await?;
                self.role.send_replace(ElectionRole::Follower);
                info!("I am not the leader");
            }
            return Ok(ElectionRole::Follower);
        }
    }

    /// Drains fired watches and re-evaluates on every predecessor deletion.
    /// Returns once the session ends, after marking this process a candidate.
    pub async fn run(self: Arc<Self>) {
        let Some(mut events) = self.events_rx.lock().await.take() else {
            tracing::warn!("Election actor already running");
            return;
        };

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if event.event_type != EventType::NodeDeleted {
                        tracing::debug!("Ignoring {:?} on {}", event.event_type, event.path);
                        continue;
                    }
                    tracing::info!("Predecessor {} is gone, re-evaluating", event.path);
                    if !self.evaluate_until_settled().await {
                        break;
                    }
                }
                _ = self.store.closed() => break,
            }
        }

        self.role.send_replace(ElectionRole::Candidate);
        info!("Election session ended");
    }

    /// Retries `evaluate` with backoff until it succeeds, since a failed
    /// evaluation may leave no watch installed. Returns false once the
    /// session has ended.
    async fn evaluate_until_settled(&self) -> bool {
        let mut backoff = RETRY_INITIAL_BACKOFF;

        loop {
            match self.evaluate().await {
                Ok(_) => return true,
                Err(e) => {
                    tracing::warn!("Re-election failed: {} (retrying in {:?})", e, backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.store.closed() => return false,
                    }
                    backoff = (backoff * 2).min(RETRY_MAX_BACKOFF);
                }
            }
        }
    }

    pub fn role(&self) -> ElectionRole {
        *self.role.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == ElectionRole::Leader
    }

    pub fn subscribe(&self) -> watch::Receiver<ElectionRole> {
        self.role.subscribe()
    }

    pub async fn token(&self) -> Option<String> {
        self.state.lock().await.token.clone()
    }

    pub async fn watching(&self) -> Option<String> {
        self.state.lock().await.watching.clone()
    }
}
