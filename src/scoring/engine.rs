use super::tokenizer::tokenize_query;
use super::types::{DocumentScore, DocumentTerms, IdfTable, ScoreTable};
use std::collections::HashSet;

/// Inverse document frequency of each term over the union of all reports.
///
/// `idf = log10(total / (df + 1))` where `total` is the number of reports and
/// `df` the number of distinct documents with a non-zero count for the term.
/// The add-one smoothing makes terms present everywhere score negative.
pub fn compute_idf(terms: &[String], reports: &[DocumentTerms]) -> IdfTable {
    let total = reports.len() as f64;

    terms
        .iter()
        .map(|term| {
            let document_frequency = reports
                .iter()
                .filter(|report| report.count(term) > 0)
                .map(|report| report.document.as_str())
                .collect::<HashSet<_>>()
                .len() as f64;

            (term.clone(), (total / (document_frequency + 1.0)).log10())
        })
        .collect()
}

/// Sums `tf * idf` over the query terms for every report. A document reported
/// more than once accumulates the contributions instead of overwriting them.
pub fn score_documents(terms: &[String], idf: &IdfTable, reports: &[DocumentTerms]) -> ScoreTable {
    let mut table = ScoreTable::new();

    for report in reports {
        let score: f64 = terms
            .iter()
            .map(|term| report.count(term) as f64 * idf.get(term).copied().unwrap_or(0.0))
            .sum();

        *table.entry(report.document.clone()).or_insert(0.0) += score;
    }

    table
}

/// Full centralised pipeline: tokenize, weigh, score and merge.
pub fn rank(query: &str, reports: &[DocumentTerms]) -> ScoreTable {
    if reports.is_empty() {
        return ScoreTable::new();
    }

    let terms = tokenize_query(query);
    let idf = compute_idf(&terms, reports);
    for (term, weight) in idf.iter() {
        tracing::debug!("idf({}) = {:.4}", term, weight);
    }

    score_documents(&terms, &idf, reports)
}

/// Sums per-document scores produced independently by each worker.
pub fn merge_scores(scores: impl IntoIterator<Item = DocumentScore>) -> ScoreTable {
    let mut table = ScoreTable::new();
    for DocumentScore { document, score } in scores {
        *table.entry(document).or_insert(0.0) += score;
    }
    table
}

/// Shard-local relevance used by the worker-relevance strategy: a smoothed
/// TF-IDF over this shard only. Documents matching no term are left out.
pub fn local_relevance(terms: &[String], documents: &[DocumentTerms]) -> Vec<DocumentScore> {
    let total = documents.len() as f64;

    let weights: Vec<(String, f64)> = terms
        .iter()
        .map(|term| {
            let df = documents.iter().filter(|d| d.count(term) > 0).count() as f64;
            (term.clone(), 1.0 + ((total + 1.0) / (df + 1.0)).ln())
        })
        .collect();

    let mut scores: Vec<DocumentScore> = documents
        .iter()
        .filter_map(|doc| {
            let mut matched = false;
            let mut score = 0.0;
            for (term, weight) in weights.iter() {
                let tf = doc.count(term);
                if tf > 0 {
                    matched = true;
                    score += tf as f64 * weight;
                }
            }
            matched.then(|| DocumentScore {
                document: doc.document.clone(),
                score,
            })
        })
        .collect();

    scores.sort_by(|a, b| a.document.cmp(&b.document));
    scores
}
