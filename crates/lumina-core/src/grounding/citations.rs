//! Numeric citation markers (`[1]`, `[2]`, ...) and their validation.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("citation pattern is valid"))
}

/// Why an answer's citations were rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationError {
    /// Fewer distinct markers than required
    MissingCitations,
    /// Nothing to cite
    NoEvidence,
    /// Smallest marker outside `[1, evidence_count]`
    OutOfRange(usize),
}

impl std::fmt::Display for CitationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CitationError::MissingCitations => write!(f, "missing_citations"),
            CitationError::NoEvidence => write!(f, "no_evidence"),
            CitationError::OutOfRange(n) => write!(f, "citation_out_of_range:{}", n),
        }
    }
}

/// Distinct citation numbers, ascending. Markers too large for `usize` are ignored.
pub fn extract_citations(answer: &str) -> BTreeSet<usize> {
    citation_pattern()
        .captures_iter(answer)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

/// Check order: marker count, then evidence presence, then range.
pub fn validate_citations(
    answer: &str,
    evidence_count: usize,
    min_citations: usize,
) -> Result<(), CitationError> {
    let citations = extract_citations(answer);
    if citations.len() < min_citations {
        return Err(CitationError::MissingCitations);
    }
    if evidence_count == 0 {
        return Err(CitationError::NoEvidence);
    }
    match citations
        .iter()
        .find(|&&n| n < 1 || n > evidence_count)
    {
        Some(&n) => Err(CitationError::OutOfRange(n)),
        None => Ok(()),
    }
}
