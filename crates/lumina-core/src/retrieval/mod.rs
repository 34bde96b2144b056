//! Evidence retrieval for documentation questions.
//!
//! Two independently ranked candidate lists (semantic and lexical) are merged
//! with weighted Reciprocal Rank Fusion. The vector index is an external
//! capability; the lexical side is a BM25 index built lazily from the corpus.

pub mod fusion;
pub mod hybrid;
pub mod lexical;

pub use fusion::{rrf_fuse, FusionWeights};
pub use hybrid::HybridRetriever;
pub use lexical::{tokenize, Bm25Index, Bm25Params, CorpusLexicalIndex};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A retrieved documentation chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Stable chunk identifier
    pub id: String,
    /// Chunk body
    pub text: String,
    /// Source document label
    #[serde(default)]
    pub source: String,
    /// Section label within the source
    #[serde(default)]
    pub section: String,
    /// Source-specific relevance score (similarity or BM25)
    #[serde(default)]
    pub score: f64,
    /// Extra labels used by scope filters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl EvidenceItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: String::new(),
            section: String::new(),
            score: 0.0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>, section: impl Into<String>) -> Self {
        self.source = source.into();
        self.section = section.into();
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Lenient conversion from a search-tool JSON object.
    ///
    /// Accepts `text` or `document` for the body, top-level or
    /// `metadata.source`/`metadata.section` labels, and a numeric `score`.
    pub fn from_json_object(obj: &Map<String, Value>) -> Self {
        let metadata: BTreeMap<String, String> = obj
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .map(|(k, v)| {
                        let value = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let text_field = |key: &str| -> Option<String> {
            match obj.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            }
        };

        Self {
            id: text_field("id").unwrap_or_default(),
            text: text_field("text")
                .or_else(|| text_field("document"))
                .unwrap_or_default(),
            source: text_field("source")
                .or_else(|| metadata.get("source").cloned())
                .unwrap_or_else(|| "unknown".to_string()),
            section: text_field("section")
                .or_else(|| metadata.get("section").cloned())
                .unwrap_or_default(),
            score: obj.get("score").and_then(Value::as_f64).unwrap_or(0.0),
            metadata,
        }
    }
}

/// Evidence after fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub item: EvidenceItem,
    /// Accumulated weighted RRF score
    pub fused_score: f64,
    /// 0-based rank in the semantic list, if present there
    pub semantic_rank: Option<usize>,
    /// 0-based rank in the lexical list, if present there
    pub lexical_rank: Option<usize>,
}

/// Metadata equality filter limiting retrieval to a document scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter(pub BTreeMap<String, String>);

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every filter key is present on the item with an equal value
    pub fn matches(&self, item: &EvidenceItem) -> bool {
        self.0
            .iter()
            .all(|(k, v)| item.metadata.get(k).map(|m| m == v).unwrap_or(false))
    }
}

/// Vector-similarity search over the document index (external capability)
pub trait SemanticSource: Send + Sync {
    /// Up to `n` candidates, best first
    fn semantic_search(
        &self,
        query: &str,
        n: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<EvidenceItem>>;
}

/// Keyword relevance search
pub trait LexicalSource: Send + Sync {
    /// Up to `n` candidates, best first
    fn lexical_search(&self, query: &str, n: usize) -> Result<Vec<EvidenceItem>>;
}

/// Full document corpus, used to build the lexical index
pub trait DocumentCorpus: Send + Sync {
    fn documents(&self) -> Result<Vec<EvidenceItem>>;
}

impl DocumentCorpus for Vec<EvidenceItem> {
    fn documents(&self) -> Result<Vec<EvidenceItem>> {
        Ok(self.clone())
    }
}

/// Anything that answers "top n evidence for this query"
pub trait EvidenceRetriever: Send + Sync {
    fn retrieve(
        &self,
        query: &str,
        n: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<FusedResult>>;
}
