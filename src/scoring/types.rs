use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Raw occurrence counts of each query term in one document.
///
/// `document` is the path relative to the shared document root, so the same
/// logical file carries the same identifier wherever it is served from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTerms {
    pub document: String,
    pub term_frequency: HashMap<String, u64>,
}

impl DocumentTerms {
    pub fn count(&self, term: &str) -> u64 {
        self.term_frequency.get(term).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentScore {
    pub document: String,
    pub score: f64,
}

/// Query term -> inverse document frequency, computed once per query.
pub type IdfTable = HashMap<String, f64>;

/// Final merged answer: document identifier -> score, keyed in ascending
/// identifier order.
pub type ScoreTable = BTreeMap<String, f64>;

/// How the coordinator turns worker responses into a `ScoreTable`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringStrategy {
    /// Workers report raw term counts; the coordinator computes IDF over the
    /// union of all reports.
    #[default]
    TfIdf,
    /// Workers score their own shard; the coordinator sums per document.
    WorkerRelevance,
}
