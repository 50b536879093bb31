//! Distributed Document Search Cluster Library
//!
//! This library crate defines the modules that make up a search cluster.
//! It serves as the foundation for the node binary (`main.rs`) and the gateway.
//!
//! ## Architecture Modules
//! Every node holds a shard of documents; one elected node coordinates queries:
//!
//! - **`coordination`**: A ZooKeeper-style hierarchical namespace with sessions,
//!   ephemeral/sequential nodes and one-shot watches, served over HTTP or used in-process.
//! - **`election`**: Leader election over sequential candidacy tokens. Each candidate
//!   watches only its predecessor, so a departure wakes exactly one node.
//! - **`registry`**: Worker registration and the leader's live snapshot of worker addresses.
//! - **`scoring`**: Tokenizer and the pure TF-IDF scoring functions.
//! - **`worker`**: The per-node shard: local term index, query processing and file transfer.
//! - **`leader`**: Scatter-gather query coordination, least-loaded uploads and download probing.
//! - **`node`**: Glue that runs a member through election, registration and re-joins.
//! - **`config`**: Command-line and environment configuration.
//! - **`error`**: Crate-wide error classification and HTTP mapping.

pub mod config;
pub mod coordination;
pub mod election;
pub mod error;
pub mod leader;
pub mod node;
pub mod registry;
pub mod scoring;
pub mod worker;
