//! Weighted Reciprocal Rank Fusion.
//!
//! Each candidate at 0-based rank r in a list with weight w contributes
//! `w / (k + r + 1)` to its fused score. Only ranks matter, never the
//! source-specific raw scores.

use super::{EvidenceItem, FusedResult};
use crate::config::RetrievalConfig;
use std::collections::HashMap;

/// RRF constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub k: u32,
    pub semantic: f64,
    pub lexical: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            k: 60,
            semantic: 0.6,
            lexical: 0.4,
        }
    }
}

impl From<&RetrievalConfig> for FusionWeights {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k: config.rrf_k,
            semantic: config.semantic_weight,
            lexical: config.lexical_weight,
        }
    }
}

impl FusionWeights {
    fn contribution(&self, weight: f64, rank: usize) -> f64 {
        weight / (self.k as f64 + rank as f64 + 1.0)
    }
}

/// Merge two ranked lists into the top `n` by fused score.
///
/// Items are identified by `id`. A duplicate id within one list counts once,
/// at its best rank. When an item appears in both lists the semantic copy is
/// kept. Ties keep first-seen order, scanning the semantic list first.
pub fn rrf_fuse(
    semantic: &[EvidenceItem],
    lexical: &[EvidenceItem],
    n: usize,
    weights: FusionWeights,
) -> Vec<FusedResult> {
    let mut fused: Vec<FusedResult> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for (rank, item) in semantic.iter().enumerate() {
        if let Some(&pos) = positions.get(item.id.as_str()) {
            if fused[pos].semantic_rank.is_some() {
                continue;
            }
        }
        let pos = *positions.entry(item.id.as_str()).or_insert_with(|| {
            fused.push(FusedResult {
                item: item.clone(),
                fused_score: 0.0,
                semantic_rank: None,
                lexical_rank: None,
            });
            fused.len() - 1
        });
        fused[pos].semantic_rank = Some(rank);
        fused[pos].fused_score += weights.contribution(weights.semantic, rank);
    }

    for (rank, item) in lexical.iter().enumerate() {
        if let Some(&pos) = positions.get(item.id.as_str()) {
            if fused[pos].lexical_rank.is_some() {
                continue;
            }
        }
        let pos = *positions.entry(item.id.as_str()).or_insert_with(|| {
            fused.push(FusedResult {
                item: item.clone(),
                fused_score: 0.0,
                semantic_rank: None,
                lexical_rank: None,
            });
            fused.len() - 1
        });
        fused[pos].lexical_rank = Some(rank);
        fused[pos].fused_score += weights.contribution(weights.lexical, rank);
    }

    // sort_by is stable, so equal scores keep insertion order
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(n);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<EvidenceItem> {
        ids.iter()
            .map(|id| EvidenceItem::new(*id, format!("text of {}", id)))
            .collect()
    }

    #[test]
    fn test_overlap_ranks_first() {
        let fused = rrf_fuse(
            &items(&["a", "b", "c"]),
            &items(&["c", "d"]),
            3,
            FusionWeights::default(),
        );
        assert_eq!(fused[0].item.id, "c");
        assert_eq!(fused[0].semantic_rank, Some(2));
        assert_eq!(fused[0].lexical_rank, Some(0));
        let expected = 0.6 / 63.0 + 0.4 / 61.0;
        assert!((fused[0].fused_score - expected).abs() < 1e-12);
        assert_eq!(fused[1].item.id, "a");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_semantic_weight_beats_lexical_at_same_rank() {
        let fused = rrf_fuse(&items(&["s"]), &items(&["l"]), 2, FusionWeights::default());
        assert_eq!(fused[0].item.id, "s");
        assert_eq!(fused[1].item.id, "l");
    }

    #[test]
    fn test_equal_weights_tie_keeps_semantic_first() {
        let weights = FusionWeights {
            k: 60,
            semantic: 0.5,
            lexical: 0.5,
        };
        let fused = rrf_fuse(&items(&["s"]), &items(&["l"]), 2, weights);
        assert_eq!(fused[0].fused_score, fused[1].fused_score);
        assert_eq!(fused[0].item.id, "s");
    }

    #[test]
    fn test_both_empty() {
        assert!(rrf_fuse(&[], &[], 5, FusionWeights::default()).is_empty());
    }

    #[test]
    fn test_duplicate_in_one_list_counts_once() {
        let fused = rrf_fuse(&items(&["a", "a"]), &[], 5, FusionWeights::default());
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].semantic_rank, Some(0));
        assert!((fused[0].fused_score - 0.6 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_semantic_copy_kept_on_overlap() {
        let semantic = vec![EvidenceItem::new("x", "semantic copy").with_score(0.9)];
        let lexical = vec![EvidenceItem::new("x", "lexical copy").with_score(7.2)];
        let fused = rrf_fuse(&semantic, &lexical, 5, FusionWeights::default());
        assert_eq!(fused[0].item.text, "semantic copy");
    }
}
