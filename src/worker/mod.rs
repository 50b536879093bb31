//! Worker Module
//!
//! Serves the shard held by this node: term statistics for queries, file
//! uploads routed here by the leader, downloads and the index footprint
//! used for placement.
//!
//! ## Submodules
//! - **`index`**: Word-count index over the document root, persisted with bincode.
//! - **`service`**: `WorkerService` operations, including the path-traversal guard.
//! - **`handlers`**: Axum handlers and the worker router.
//! - **`protocol`**: Endpoints and DTOs shared with the leader's client.

pub mod handlers;
pub mod index;
pub mod protocol;
pub mod service;
