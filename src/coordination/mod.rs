//! Coordination Module
//!
//! The strongly-consistent namespace every other subsystem builds on:
//! hierarchical nodes, session-bound ephemeral nodes, sequential naming and
//! one-shot watches.
//!
//! ## Submodules
//! - **`store`**: The `MembershipStore` session contract and `Connector` factory.
//! - **`memory`**: The in-memory namespace and its in-process sessions.
//! - **`server`**: HTTP front that lets other processes open sessions.
//! - **`remote`**: `MembershipStore` implementation over that HTTP front.
//! - **`protocol`**: Wire endpoints and DTOs shared by server and client.
//! - **`types`**: Paths, node metadata, events and errors.

pub mod memory;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod faults;
