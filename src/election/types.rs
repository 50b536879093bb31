use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parent of every candidacy token.
pub const ELECTION_NAMESPACE: &str = "/election";
/// Name prefix of a candidacy token; the coordination service appends the
/// sequence counter.
pub const CANDIDATE_PREFIX: &str = "c_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionRole {
    /// Token not yet evaluated, or the session behind it is gone.
    Candidate,
    Leader,
    /// Watching a predecessor token.
    Follower,
}

impl std::fmt::Display for ElectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElectionRole::Candidate => "candidate",
            ElectionRole::Leader => "leader",
            ElectionRole::Follower => "follower",
        };
        f.write_str(name)
    }
}

/// Side effects run on role transitions. Each method is invoked once per
/// transition into that role; an error leaves the role unchanged and the
/// election actor retries the evaluation with backoff.
#[async_trait]
pub trait OnElectionCallback: Send + Sync {
    async fn on_elected_to_be_leader(&self) -> Result<()>;

    async fn on_worker(&self) -> Result<()>;
}
