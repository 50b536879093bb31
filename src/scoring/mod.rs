//! Scoring Module
//!
//! Pure computation turning per-shard term statistics into a ranked answer.
//! Nothing in here performs I/O or holds state between queries.
//!
//! ## Submodules
//! - **`tokenizer`**: Query and document text normalisation.
//! - **`engine`**: IDF, TF-IDF scoring and score merging.
//! - **`types`**: Report and result types shared with the worker and leader.

pub mod engine;
pub mod tokenizer;
pub mod types;
