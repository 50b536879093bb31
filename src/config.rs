//! Command-line and environment configuration for the `search-node` binary.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::node::types::NodeSettings;
use crate::scoring::types::ScoringStrategy;

#[derive(Debug, Parser)]
#[command(name = "search-node", version, about = "Leader-coordinated document search cluster")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a standalone coordination server.
    Coordinator(CoordinatorArgs),
    /// Run a cluster member (worker, or coordinator when elected).
    Node(NodeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct CoordinatorArgs {
    #[arg(long, env = "SEARCH_BIND")]
    pub bind: SocketAddr,

    /// Sessions without a heartbeat for this long are expired.
    #[arg(long, env = "SEARCH_SESSION_TIMEOUT_MS", default_value_t = 6000)]
    pub session_timeout_ms: u64,
}

impl CoordinatorArgs {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    #[arg(long, env = "SEARCH_BIND")]
    pub bind: SocketAddr,

    /// Address other members use to reach this node. Defaults to `http://<bind>`.
    #[arg(long, env = "SEARCH_ADVERTISE")]
    pub advertise: Option<String>,

    /// Base URL of the coordination server.
    #[arg(long, env = "SEARCH_COORDINATION", required_unless_present = "embed_coordinator")]
    pub coordination: Option<String>,

    /// Host the coordination routes in this process.
    #[arg(long, env = "SEARCH_EMBED_COORDINATOR")]
    pub embed_coordinator: bool,

    #[arg(long, env = "SEARCH_DOCUMENTS")]
    pub documents: PathBuf,

    #[arg(long, env = "SEARCH_INDEX")]
    pub index: PathBuf,

    #[arg(long, env = "SEARCH_REQUEST_TIMEOUT_MS", default_value_t = 3000)]
    pub request_timeout_ms: u64,

    /// Bound on forwarding one upload to a worker.
    #[arg(long, env = "SEARCH_UPLOAD_TIMEOUT_MS", default_value_t = 60_000)]
    pub upload_timeout_ms: u64,

    #[arg(long, env = "SEARCH_SESSION_TIMEOUT_MS", default_value_t = 6000)]
    pub session_timeout_ms: u64,

    #[arg(long, env = "SEARCH_SCORING", value_enum, default_value_t = ScoringStrategy::TfIdf)]
    pub scoring: ScoringStrategy,
}

impl NodeArgs {
    pub fn advertise_url(&self) -> String {
        match &self.advertise {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn settings(&self) -> NodeSettings {
        NodeSettings {
            advertise: self.advertise_url(),
            request_timeout: self.request_timeout(),
            upload_timeout: self.upload_timeout(),
            scoring: self.scoring,
        }
    }
}
