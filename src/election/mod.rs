//! Leader Election Module
//!
//! Chooses one coordinator among the live nodes using sequential ephemeral
//! candidacy tokens. The lowest token wins; every other node watches its
//! immediate predecessor and re-evaluates when it disappears.
//!
//! ## Submodules
//! - **`service`**: The `LeaderElection` state machine and its watch actor.
//! - **`types`**: Roles, namespace constants and the transition callback trait.

pub mod service;
pub mod types;
