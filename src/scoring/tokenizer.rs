use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

/// Splits a query on whitespace, case-folds and trims each term. Repeated
/// terms are kept once, in first-seen order.
pub fn tokenize_query(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query.split_whitespace() {
        let term = word.trim().to_lowercase();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Counts every lowercase word occurrence in a document body.
pub fn term_counts(text: &str) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for m in WORD.find_iter(&text.to_lowercase()) {
        *counts.entry(m.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Words of a file name without its extension, for documents whose body
/// cannot be extracted.
pub fn filename_terms(file_name: &str) -> HashMap<String, u64> {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    term_counts(stem)
}
