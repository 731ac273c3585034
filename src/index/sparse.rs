/// In-memory BM25 index
use super::{rank_order, IndexError, ScoredId, SparseIndex};
use crate::models::ChunkId;
use crate::tokenizer::Tokenizer;
use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Okapi BM25 over an inverted index
///
/// idf = ln(1 + (N - df + 0.5) / (df + 0.5)), which stays positive for
/// terms present in most chunks. Query terms repeated in the query
/// contribute once per occurrence.
pub struct Bm25Index {
    k1: f32,
    b: f32,
    tokenizer: Arc<dyn Tokenizer>,
    /// term -> chunk -> term frequency
    postings: AHashMap<String, BTreeMap<ChunkId, u32>>,
    chunks: BTreeMap<ChunkId, IndexedChunk>,
    total_length: u64,
}

/// Per-chunk bookkeeping for length normalization and removal
struct IndexedChunk {
    length: u32,
    /// Distinct terms, i.e. the posting lists this chunk appears in
    terms: Vec<String>,
}

impl Bm25Index {
    pub fn new(k1: f32, b: f32, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            k1,
            b,
            tokenizer,
            postings: AHashMap::new(),
            chunks: BTreeMap::new(),
            total_length: 0,
        }
    }

    fn average_length(&self) -> f32 {
        if self.chunks.is_empty() {
            0.0
        } else {
            self.total_length as f32 / self.chunks.len() as f32
        }
    }

    fn idf(&self, document_frequency: usize) -> f32 {
        let n = self.chunks.len() as f32;
        let df = document_frequency as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }
}

impl SparseIndex for Bm25Index {
    fn insert(&mut self, id: ChunkId, text: &str) -> Result<(), IndexError> {
        if self.chunks.contains_key(&id) {
            return Err(IndexError::DuplicateId(id));
        }

        let terms = self.tokenizer.terms(text);
        let mut frequencies: AHashMap<String, u32> = AHashMap::new();
        for term in &terms {
            *frequencies.entry(term.clone()).or_insert(0) += 1;
        }

        let mut distinct = Vec::with_capacity(frequencies.len());
        for (term, tf) in frequencies {
            self.postings.entry(term.clone()).or_default().insert(id, tf);
            distinct.push(term);
        }
        self.chunks.insert(
            id,
            IndexedChunk {
                length: terms.len() as u32,
                terms: distinct,
            },
        );
        self.total_length += terms.len() as u64;

        Ok(())
    }

    fn remove(&mut self, id: ChunkId) -> bool {
        let Some(chunk) = self.chunks.remove(&id) else {
            return false;
        };
        self.total_length -= u64::from(chunk.length);

        for term in &chunk.terms {
            if let Some(posting) = self.postings.get_mut(term) {
                posting.remove(&id);
                if posting.is_empty() {
                    self.postings.remove(term);
                }
            }
        }

        true
    }

    fn search(&self, terms: &[String], k: usize) -> Vec<ScoredId> {
        if k == 0 || self.chunks.is_empty() {
            return Vec::new();
        }

        let avgdl = self.average_length();
        let mut scores: BTreeMap<ChunkId, f32> = BTreeMap::new();

        for term in terms {
            let Some(chunks) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(chunks.len());

            for (id, tf) in chunks {
                let tf = *tf as f32;
                let length = self.chunks.get(id).map_or(0, |chunk| chunk.length) as f32;
                let norm = if avgdl > 0.0 {
                    self.k1 * (1.0 - self.b + self.b * length / avgdl)
                } else {
                    self.k1
                };
                *scores.entry(*id).or_insert(0.0) += idf * tf * (self.k1 + 1.0) / (tf + norm);
            }
        }

        let mut hits: Vec<ScoredId> = scores
            .into_iter()
            .map(|(id, score)| ScoredId { id, score })
            .collect();
        hits.sort_by(rank_order);
        hits.truncate(k);
        hits
    }

    fn ids(&self) -> BTreeSet<ChunkId> {
        self.chunks.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn clear(&mut self) {
        self.postings.clear();
        self.chunks.clear();
        self.total_length = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::AnalyzerTokenizer;

    fn index_with(texts: &[&str]) -> Bm25Index {
        let mut index = Bm25Index::new(1.5, 0.75, Arc::new(AnalyzerTokenizer::new()));
        for (i, text) in texts.iter().enumerate() {
            index.insert(ChunkId(i as u64 + 1), text).unwrap();
        }
        index
    }

    fn search(index: &Bm25Index, query: &str, k: usize) -> Vec<ScoredId> {
        index.search(&AnalyzerTokenizer::new().terms(query), k)
    }

    fn ids(hits: &[ScoredId]) -> Vec<u64> {
        hits.iter().map(|h| h.id.0).collect()
    }

    #[test]
    fn test_only_matching_chunks_returned() {
        let index = index_with(&[
            "Photosynthesis converts light to energy.",
            "Mitochondria produce ATP.",
        ]);

        let hits = search(&index, "What produces ATP?", 10);
        assert_eq!(ids(&hits), vec![2]);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn test_rarer_term_scores_higher() {
        let index = index_with(&[
            "cell membrane transport",
            "cell division",
            "cell signalling",
            "ribosome protein synthesis",
        ]);

        let hits = search(&index, "cell ribosome", 10);
        assert_eq!(hits[0].id, ChunkId(4));
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn test_term_frequency_saturates() {
        let index = index_with(&["atp", "atp atp atp atp atp atp atp atp"]);
        let hits = search(&index, "atp", 10);

        let ratio = hits[0].score / hits[1].score;
        assert!(ratio < 8.0);
    }

    #[test]
    fn test_duplicate_query_terms_count_again() {
        let index = index_with(&["atp synthase", "glucose"]);
        let once = search(&index, "atp", 10)[0].score;
        let twice = search(&index, "atp atp", 10)[0].score;
        assert!((twice - 2.0 * once).abs() < 1e-5);
    }

    #[test]
    fn test_ties_break_on_lower_id() {
        let index = index_with(&["same words here", "same words here", "other"]);
        let hits = search(&index, "words", 10);
        assert_eq!(ids(&hits), vec![1, 2]);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_truncates_to_k() {
        let index = index_with(&["atp one", "atp two", "atp three"]);
        assert_eq!(search(&index, "atp", 2).len(), 2);
        assert!(search(&index, "atp", 0).is_empty());
    }

    #[test]
    fn test_remove_updates_statistics() {
        let mut index = index_with(&["atp synthase", "glucose atp"]);
        assert!(index.remove(ChunkId(1)));
        assert!(!index.remove(ChunkId(1)));

        assert_eq!(index.len(), 1);
        assert_eq!(ids(&search(&index, "atp synthase", 10)), vec![2]);
        assert!(search(&index, "synthase", 10).is_empty());
    }

    #[test]
    fn test_remove_drops_only_its_postings() {
        let mut index = index_with(&["atp synthase", "glucose atp", "synthase"]);
        assert!(index.remove(ChunkId(1)));

        assert_eq!(index.postings.len(), 3);
        assert_eq!(index.postings.get("atp").map(BTreeMap::len), Some(1));
        assert_eq!(index.postings.get("synthase").map(BTreeMap::len), Some(1));

        assert!(index.remove(ChunkId(3)));
        assert!(!index.postings.contains_key("synthase"));
        assert!(index.postings.contains_key("glucose"));
        assert_eq!(index.total_length, 2);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut index = index_with(&["atp"]);
        assert!(matches!(
            index.insert(ChunkId(1), "again"),
            Err(IndexError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_b_zero_ignores_length() {
        let mut index = Bm25Index::new(1.2, 0.0, Arc::new(AnalyzerTokenizer::new()));
        index.insert(ChunkId(1), "atp").unwrap();
        index
            .insert(ChunkId(2), "atp with many other words around it")
            .unwrap();

        let hits = search(&index, "atp", 10);
        assert_eq!(hits[0].score, hits[1].score);
    }
}
