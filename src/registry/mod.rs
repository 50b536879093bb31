//! Service Registry Module
//!
//! Tracks which workers are alive. Each worker holds one ephemeral entry
//! carrying its advertised address; the leader watches the entry set and
//! serves queries from an immutable snapshot of it.

pub mod service;
pub mod types;
