//! Lexical BM25 search over an in-process document set.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{KnowledgeHit, KnowledgeRetrieval, SearchFilters};
use crate::types::Result;

// ============================================================================
// BM25 Implementation
// ============================================================================

/// BM25 search index for lexical matching
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bm25Index {
    /// Document ID -> tokenized content
    documents: HashMap<String, Vec<String>>,
    /// Term -> document IDs containing term
    inverted_index: HashMap<String, HashSet<String>>,
    document_frequencies: HashMap<String, usize>,
    doc_count: usize,
    avg_doc_length: f32,
    /// Term frequency saturation
    k1: f32,
    /// Length normalization
    b: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            ..Default::default()
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 1)
            .map(String::from)
            .collect()
    }

    /// Add or replace a document.
    pub fn add_document(&mut self, id: &str, content: &str) {
        if self.documents.contains_key(id) {
            self.remove_document(id);
        }
        let tokens = Self::tokenize(content);

        let unique_terms: HashSet<_> = tokens.iter().cloned().collect();
        for term in &unique_terms {
            *self.document_frequencies.entry(term.clone()).or_insert(0) += 1;
            self.inverted_index
                .entry(term.clone())
                .or_default()
                .insert(id.to_string());
        }

        self.documents.insert(id.to_string(), tokens);
        self.doc_count += 1;
        self.recompute_avg_len();
    }

    pub fn remove_document(&mut self, id: &str) {
        let Some(tokens) = self.documents.remove(id) else {
            return;
        };
        let unique_terms: HashSet<_> = tokens.into_iter().collect();
        for term in unique_terms {
            if let Some(df) = self.document_frequencies.get_mut(&term) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.document_frequencies.remove(&term);
                }
            }
            if let Some(docs) = self.inverted_index.get_mut(&term) {
                docs.remove(id);
                if docs.is_empty() {
                    self.inverted_index.remove(&term);
                }
            }
        }
        self.doc_count = self.doc_count.saturating_sub(1);
        self.recompute_avg_len();
    }

    fn recompute_avg_len(&mut self) {
        self.avg_doc_length = if self.doc_count > 0 {
            let total: usize = self.documents.values().map(Vec::len).sum();
            total as f32 / self.doc_count as f32
        } else {
            0.0
        };
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.document_frequencies.get(term).copied().unwrap_or(0) as f32;
        let n = self.doc_count as f32;
        if df == 0.0 || n == 0.0 {
            return 0.0;
        }
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score_document(&self, doc_id: &str, query_terms: &[String]) -> f32 {
        let Some(doc_tokens) = self.documents.get(doc_id) else {
            return 0.0;
        };

        let doc_len = doc_tokens.len() as f32;
        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for token in doc_tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        query_terms
            .iter()
            .map(|term| {
                let tf = term_freq.get(term.as_str()).copied().unwrap_or(0) as f32;
                let numerator = tf * (self.k1 + 1.0);
                let denominator =
                    tf + self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_length);
                self.idf(term) * numerator / denominator
            })
            .sum()
    }

    /// Every matching document, best first. Ties order by document id.
    pub fn search(&self, query: &str) -> Vec<(String, f32)> {
        let query_terms = Self::tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut candidates: HashSet<&String> = HashSet::new();
        for term in &query_terms {
            if let Some(docs) = self.inverted_index.get(term) {
                candidates.extend(docs.iter());
            }
        }

        let mut results: Vec<(String, f32)> = candidates
            .into_iter()
            .map(|id| (id.clone(), self.score_document(id, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results
    }

    pub fn len(&self) -> usize {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }
}

// ============================================================================
// Knowledge base
// ============================================================================

/// A document available to retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub content: String,
    /// Citation shown to the user, e.g. a handbook path.
    pub source: String,
    #[serde(default)]
    pub metadata: SearchFilters,
}

impl KnowledgeDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source: source.into(),
            metadata: SearchFilters::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Default)]
struct KnowledgeState {
    index: Bm25Index,
    documents: HashMap<String, KnowledgeDocument>,
}

/// In-process knowledge base backed by [`Bm25Index`].
pub struct InMemoryKnowledgeBase {
    state: RwLock<KnowledgeState>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(KnowledgeState {
                index: Bm25Index::new(),
                documents: HashMap::new(),
            }),
        }
    }

    pub fn with_documents(documents: impl IntoIterator<Item = KnowledgeDocument>) -> Self {
        let kb = Self::new();
        for doc in documents {
            kb.insert(doc);
        }
        kb
    }

    pub fn insert(&self, document: KnowledgeDocument) {
        let mut state = self.state.write();
        state.index.add_document(&document.id, &document.content);
        state.documents.insert(document.id.clone(), document);
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.state.write();
        state.index.remove_document(id);
        state.documents.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeRetrieval for InMemoryKnowledgeBase {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: usize,
    ) -> Result<Vec<KnowledgeHit>> {
        let state = self.state.read();
        let hits = state
            .index
            .search(query)
            .into_iter()
            .filter_map(|(id, score)| state.documents.get(&id).map(|doc| (doc, score)))
            .filter(|(doc, _)| {
                filters
                    .iter()
                    .all(|(k, v)| doc.metadata.get(k).is_some_and(|m| m == v))
            })
            .take(max_results)
            .map(|(doc, score)| KnowledgeHit {
                content: doc.content.clone(),
                score,
                source: doc.source.clone(),
            })
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, content: &str, module: &str) -> KnowledgeDocument {
        KnowledgeDocument {
            id: id.into(),
            content: content.into(),
            source: format!("handbook/{}.md", id),
            metadata: [("module".to_string(), module.to_string())].into(),
        }
    }

    fn kb() -> InMemoryKnowledgeBase {
        InMemoryKnowledgeBase::with_documents([
            doc("leave", "Annual leave requests are approved by the line manager", "hr"),
            doc("po", "Purchase orders above 10000 need finance approval", "finance"),
            doc("stock", "Inventory counts are reconciled every Friday per warehouse", "inventory"),
        ])
    }

    #[test]
    fn test_bm25_ranks_matching_document_first() {
        let mut index = Bm25Index::new();
        index.add_document("a", "inventory levels for warehouse north");
        index.add_document("b", "payroll schedule for employees");

        let results = index.search("inventory warehouse");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn test_bm25_replace_and_remove() {
        let mut index = Bm25Index::new();
        index.add_document("a", "alpha beta");
        index.add_document("a", "gamma delta");
        assert_eq!(index.len(), 1);
        assert!(index.search("alpha").is_empty());

        index.remove_document("a");
        assert!(index.is_empty());
        assert!(index.search("gamma").is_empty());
    }

    #[tokio::test]
    async fn test_search_returns_source_and_respects_limit() {
        let hits = kb()
            .search("approval approved", &SearchFilters::new(), 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].source.starts_with("handbook/"));
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_search_applies_metadata_filters() {
        let filters: SearchFilters = [("module".to_string(), "finance".to_string())].into();
        let hits = kb().search("approval approved", &filters, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "handbook/po.md");
    }

    #[tokio::test]
    async fn test_removed_document_is_not_returned() {
        let kb = kb();
        assert!(kb.remove("stock"));
        let hits = kb
            .search("inventory warehouse", &SearchFilters::new(), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(kb.len(), 2);
    }
}
