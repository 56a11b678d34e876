//! Knowledge retrieval
//!
//! The Query and Help agents ground their answers in retrieved passages.
//! Embedding and vector search live outside this crate; they are reached
//! through [`KnowledgeRetrieval`]. [`search::InMemoryKnowledgeBase`] is a
//! lexical BM25 implementation used for local setups and tests.

pub mod search;

use crate::types::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use search::{Bm25Index, InMemoryKnowledgeBase, KnowledgeDocument};

/// Metadata equality filters applied to a search.
pub type SearchFilters = BTreeMap<String, String>;

/// One ranked retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub content: String,
    pub score: f32,
    pub source: String,
}

#[async_trait]
pub trait KnowledgeRetrieval: Send + Sync {
    /// Hits ranked by descending score, at most `max_results` of them.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        max_results: usize,
    ) -> Result<Vec<KnowledgeHit>>;
}
