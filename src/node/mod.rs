//! Node Module
//!
//! Glue that turns the building blocks into a cluster member. A node joins
//! the election, acts on the role it is handed (publishing itself as leader
//! or registering as a worker), and re-joins with a fresh session whenever
//! its coordination session is lost.
//!
//! ## Submodules
//! - **`service`**: `SearchNode` lifecycle, supervision and router assembly.
//! - **`actions`**: Election callbacks for the leader and worker transitions.
//! - **`state`**: Role and session shared with the coordinator's role gate.
//! - **`handlers`**: The cluster status endpoint.
//! - **`types`**: Settings, status DTO and well-known paths.

pub mod actions;
pub mod handlers;
pub mod service;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;
