use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::election::types::ElectionRole;
use crate::scoring::types::ScoringStrategy;

/// Well-known node holding the current leader's advertised address.
pub const LEADER_INFO_PATH: &str = "/leader_info";

pub const ENDPOINT_CLUSTER_STATUS: &str = "/cluster/status";

/// Per-process settings the node needs after startup.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Base URL other nodes use to reach this one, e.g. `http://10.0.0.5:8001`.
    pub advertise: String,
    pub request_timeout: Duration,
    /// Bound on forwarding one uploaded file to a worker.
    pub upload_timeout: Duration,
    pub scoring: ScoringStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub role: ElectionRole,
    pub address: String,
    pub leader: Option<String>,
    /// Live workers; only known on the leader.
    pub workers: Option<Vec<String>>,
    pub documents: usize,
    pub scoring: ScoringStrategy,
}
