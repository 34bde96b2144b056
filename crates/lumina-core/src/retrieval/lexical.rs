//! BM25 (Okapi) keyword index.
//!
//! The index is built from the full corpus on first use and cached until
//! [`CorpusLexicalIndex::invalidate`] is called.

use super::{DocumentCorpus, EvidenceItem, LexicalSource};
use crate::config::RetrievalConfig;
use crate::error::{LuminaError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Markup characters removed before splitting
const MARKUP_CHARS: &[char] = &['#', '*', '`', '[', ']', '(', ')'];

/// Lowercase, strip markdown punctuation, split on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    let clean: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !MARKUP_CHARS.contains(c))
        .collect();
    clean.split_whitespace().map(str::to_string).collect()
}

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

impl From<&RetrievalConfig> for Bm25Params {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k1: config.bm25_k1,
            b: config.bm25_b,
            epsilon: config.bm25_epsilon,
        }
    }
}

/// Immutable BM25 index over a fixed document set
#[derive(Debug, Clone)]
pub struct Bm25Index {
    docs: Vec<EvidenceItem>,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
    params: Bm25Params,
}

impl Bm25Index {
    pub fn build(docs: Vec<EvidenceItem>, params: Bm25Params) -> Self {
        let mut term_freqs = Vec::with_capacity(docs.len());
        let mut doc_lens = Vec::with_capacity(docs.len());
        let mut doc_counts: HashMap<String, usize> = HashMap::new();

        for doc in &docs {
            let tokens = tokenize(&doc.text);
            doc_lens.push(tokens.len());
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_counts.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
        }

        let corpus_size = docs.len() as f64;
        let total_len: usize = doc_lens.iter().sum();
        let avgdl = if docs.is_empty() { 0.0 } else { total_len as f64 / corpus_size };

        // Terms present in more than half the corpus get negative IDF;
        // those are floored at epsilon * mean IDF.
        let mut idf: HashMap<String, f64> = HashMap::with_capacity(doc_counts.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, count) in doc_counts {
            let count = count as f64;
            let value = (corpus_size - count + 0.5).ln() - (count + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }
        if !idf.is_empty() {
            let floor = params.epsilon * (idf_sum / idf.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            docs,
            term_freqs,
            doc_lens,
            avgdl,
            idf,
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// BM25 score of every document, in corpus order
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f64> {
        let Bm25Params { k1, b, .. } = self.params;
        let mut scores = vec![0.0; self.docs.len()];
        if self.avgdl <= 0.0 {
            return scores;
        }

        for token in query_tokens {
            let Some(idf) = self.idf.get(token) else {
                continue;
            };
            for (i, freqs) in self.term_freqs.iter().enumerate() {
                let tf = freqs.get(token).copied().unwrap_or(0) as f64;
                if tf == 0.0 {
                    continue;
                }
                let norm = 1.0 - b + b * self.doc_lens[i] as f64 / self.avgdl;
                scores[i] += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }
        scores
    }

    /// Top `n` positive-scoring documents, best first. Ties keep corpus order.
    pub fn search(&self, query: &str, n: usize) -> Vec<EvidenceItem> {
        let query_tokens = tokenize(query);
        let mut scored: Vec<(usize, f64)> = self
            .scores(&query_tokens)
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(n)
            .map(|(i, score)| self.docs[i].clone().with_score(score))
            .collect()
    }
}

/// Lexical source backed by a lazily built, cached BM25 index
pub struct CorpusLexicalIndex {
    corpus: Arc<dyn DocumentCorpus>,
    params: Bm25Params,
    index: Mutex<Option<Arc<Bm25Index>>>,
}

impl CorpusLexicalIndex {
    pub fn new(corpus: Arc<dyn DocumentCorpus>, params: Bm25Params) -> Self {
        Self {
            corpus,
            params,
            index: Mutex::new(None),
        }
    }

    /// Drop the cached index; the next search rebuilds it
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.index.lock() {
            *guard = None;
        }
    }

    /// Whether the index has been built
    pub fn is_built(&self) -> bool {
        self.index.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    fn index(&self) -> Result<Arc<Bm25Index>> {
        let mut guard = self
            .index
            .lock()
            .map_err(|_| LuminaError::Retrieval("lexical index lock poisoned".to_string()))?;

        if let Some(index) = guard.as_ref() {
            return Ok(Arc::clone(index));
        }

        let docs = self.corpus.documents()?;
        let index = Arc::new(Bm25Index::build(docs, self.params));
        info!(documents = index.len(), "Built BM25 index");
        *guard = Some(Arc::clone(&index));
        Ok(index)
    }
}

impl LexicalSource for CorpusLexicalIndex {
    fn lexical_search(&self, query: &str, n: usize) -> Result<Vec<EvidenceItem>> {
        let index = self.index()?;
        let hits = index.search(query, n);
        debug!(query_len = query.len(), hits = hits.len(), "Lexical search");
        Ok(hits)
    }
}
