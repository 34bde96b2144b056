//! Hybrid semantic + lexical retriever.

use super::{
    rrf_fuse, EvidenceRetriever, FusedResult, FusionWeights, LexicalSource, SearchFilter,
    SemanticSource,
};
use crate::config::RetrievalConfig;
use crate::error::Result;
use std::sync::Arc;
use tracing::debug;

/// Candidates fetched from each source per requested result
const CANDIDATE_FACTOR: usize = 2;

pub struct HybridRetriever {
    semantic: Arc<dyn SemanticSource>,
    lexical: Arc<dyn LexicalSource>,
    weights: FusionWeights,
}

impl HybridRetriever {
    pub fn new(semantic: Arc<dyn SemanticSource>, lexical: Arc<dyn LexicalSource>) -> Self {
        Self {
            semantic,
            lexical,
            weights: FusionWeights::default(),
        }
    }

    pub fn from_config(
        semantic: Arc<dyn SemanticSource>,
        lexical: Arc<dyn LexicalSource>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            semantic,
            lexical,
            weights: FusionWeights::from(config),
        }
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }
}

impl EvidenceRetriever for HybridRetriever {
    /// Top `n` fused results. Either source failing fails the whole call.
    fn retrieve(
        &self,
        query: &str,
        n: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<FusedResult>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let candidates = n.saturating_mul(CANDIDATE_FACTOR);
        let filter = filter.filter(|f| !f.is_empty());

        let semantic = self.semantic.semantic_search(query, candidates, filter)?;
        let mut lexical = self.lexical.lexical_search(query, candidates)?;
        if let Some(filter) = filter {
            lexical.retain(|item| filter.matches(item));
        }

        let fused = rrf_fuse(&semantic, &lexical, n, self.weights);
        debug!(
            n,
            semantic = semantic.len(),
            lexical = lexical.len(),
            fused = fused.len(),
            "Hybrid retrieval"
        );
        Ok(fused)
    }
}
