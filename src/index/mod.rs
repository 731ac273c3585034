/// Per-tenant retrieval indexes
///
/// - SparseIndex: lexical scoring (BM25 by default)
/// - DenseIndex: vector similarity (HNSW with exact fallback by default)
/// - IndexBackend: builds fresh, empty index instances for a corpus
mod dense;
mod sparse;

pub use dense::HnswIndex;
pub use sparse::Bm25Index;

use crate::config::{DenseConfig, SparseConfig};
use crate::models::ChunkId;
use crate::tokenizer::Tokenizer;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Chunk {0} is already indexed")]
    DuplicateId(ChunkId),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Chunk id with the score a single index assigned it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: ChunkId,
    pub score: f32,
}

/// Orders by score descending, then by lower chunk id
pub(crate) fn rank_order(a: &ScoredId, b: &ScoredId) -> std::cmp::Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// Lexical index over chunk texts
pub trait SparseIndex: Send + Sync {
    fn insert(&mut self, id: ChunkId, text: &str) -> Result<(), IndexError>;

    /// Returns false when the id was not indexed
    fn remove(&mut self, id: ChunkId) -> bool;

    /// Chunks matching at least one of the query terms, best first, at most `k`
    fn search(&self, terms: &[String], k: usize) -> Vec<ScoredId>;

    fn ids(&self) -> BTreeSet<ChunkId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// Vector similarity index over chunk embeddings
pub trait DenseIndex: Send + Sync {
    fn insert(&mut self, id: ChunkId, vector: &[f32]) -> Result<(), IndexError>;

    /// Returns false when the id was not indexed
    fn remove(&mut self, id: ChunkId) -> bool;

    /// Nearest chunks by cosine similarity, best first, at most `k`
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredId>, IndexError>;

    /// Drop deleted entries from internal structures; returns how many were purged
    fn compact(&mut self) -> usize;

    fn ids(&self) -> BTreeSet<ChunkId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> usize;

    fn clear(&mut self);
}

/// Factory for the index pair each tenant corpus owns
pub trait IndexBackend: Send + Sync {
    fn sparse(&self) -> Box<dyn SparseIndex>;

    fn dense(&self, dimension: usize) -> Box<dyn DenseIndex>;
}

/// BM25 + HNSW backend built from configuration
pub struct DefaultIndexBackend {
    sparse: SparseConfig,
    dense: DenseConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl DefaultIndexBackend {
    pub fn new(sparse: SparseConfig, dense: DenseConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            sparse,
            dense,
            tokenizer,
        }
    }
}

impl IndexBackend for DefaultIndexBackend {
    fn sparse(&self) -> Box<dyn SparseIndex> {
        Box::new(Bm25Index::new(
            self.sparse.k1,
            self.sparse.b,
            Arc::clone(&self.tokenizer),
        ))
    }

    fn dense(&self, dimension: usize) -> Box<dyn DenseIndex> {
        Box::new(HnswIndex::new(dimension, self.dense.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::AnalyzerTokenizer;

    #[test]
    fn test_rank_order_ties_break_on_id() {
        let mut hits = vec![
            ScoredId {
                id: ChunkId(3),
                score: 0.5,
            },
            ScoredId {
                id: ChunkId(1),
                score: 0.5,
            },
            ScoredId {
                id: ChunkId(2),
                score: 0.9,
            },
        ];
        hits.sort_by(rank_order);

        let ids: Vec<u64> = hits.iter().map(|h| h.id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_default_backend_builds_empty_indexes() {
        let backend = DefaultIndexBackend::new(
            SparseConfig::default(),
            DenseConfig::default(),
            Arc::new(AnalyzerTokenizer::new()),
        );

        assert!(backend.sparse().is_empty());
        let dense = backend.dense(8);
        assert!(dense.is_empty());
        assert_eq!(dense.dimension(), 8);
    }
}
