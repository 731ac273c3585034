/// HNSW vector index with exact re-scoring
use super::{rank_order, DenseIndex, IndexError, ScoredId};
use crate::config::DenseConfig;
use crate::models::ChunkId;
use hnsw_rs::prelude::*;
use ndarray::{Array1, ArrayView1};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const MAX_LAYER: usize = 16;

struct Entry {
    vector: Array1<f32>,
    norm: f32,
}

/// HNSW graph plus the authoritative vectors it was built from
///
/// The graph cannot delete points, so removals are tombstoned and filtered
/// at query time; the graph is rebuilt once tombstones pass
/// `compaction_ratio` of its size. Corpora at or under
/// `exact_search_threshold` live vectors are scanned exactly, and graph
/// candidates are always re-scored exactly so scores match the scan.
pub struct HnswIndex {
    dimension: usize,
    config: DenseConfig,
    entries: BTreeMap<ChunkId, Entry>,
    graph: Hnsw<'static, f32, DistCosine>,
    graph_points: usize,
    tombstones: BTreeSet<ChunkId>,
}

impl HnswIndex {
    pub fn new(dimension: usize, config: DenseConfig) -> Self {
        let graph = Self::new_graph(&config, config.capacity);
        Self {
            dimension,
            config,
            entries: BTreeMap::new(),
            graph,
            graph_points: 0,
            tombstones: BTreeSet::new(),
        }
    }

    fn new_graph(config: &DenseConfig, expected: usize) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::<f32, DistCosine>::new(
            config.hnsw_m,
            expected.max(config.capacity).max(1),
            MAX_LAYER,
            config.hnsw_ef_construction,
            DistCosine,
        )
    }

    /// Number of deleted points still present in the graph
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn insert_into_graph(&mut self, id: ChunkId, vector: &[f32]) {
        let data = vector.to_vec();
        self.graph.insert((&data, id.0 as usize));
        self.graph_points += 1;
    }

    fn rebuild_graph(&mut self) {
        self.graph = Self::new_graph(&self.config, self.entries.len());
        self.graph_points = 0;
        self.tombstones.clear();

        let live: Vec<(ChunkId, Vec<f32>)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.norm > 0.0)
            .map(|(id, entry)| (*id, entry.vector.to_vec()))
            .collect();
        for (id, vector) in live {
            self.insert_into_graph(id, &vector);
        }
    }

    fn cosine(entry: &Entry, query: ArrayView1<f32>, query_norm: f32) -> f32 {
        if entry.norm == 0.0 {
            return 0.0;
        }
        entry.vector.dot(&query) / (entry.norm * query_norm)
    }

    fn exact_search(&self, query: ArrayView1<f32>, query_norm: f32, k: usize) -> Vec<ScoredId> {
        let mut hits: Vec<ScoredId> = self
            .entries
            .iter()
            .map(|(id, entry)| ScoredId {
                id: *id,
                score: Self::cosine(entry, query, query_norm),
            })
            .collect();
        hits.sort_by(rank_order);
        hits.truncate(k);
        hits
    }

    fn graph_search(
        &self,
        query: &[f32],
        query_view: ArrayView1<f32>,
        query_norm: f32,
        k: usize,
    ) -> Vec<ScoredId> {
        if self.graph_points == 0 {
            return Vec::new();
        }

        let fetch = k.saturating_add(self.tombstones.len()).min(self.graph_points);
        let ef = self.config.hnsw_ef_search.max(fetch);
        let neighbours = self.graph.search(query, fetch, ef);

        let mut seen = BTreeSet::new();
        let mut hits: Vec<ScoredId> = neighbours
            .into_iter()
            .filter_map(|neighbour| {
                let id = ChunkId(neighbour.d_id as u64);
                if !seen.insert(id) {
                    return None;
                }
                self.entries.get(&id).map(|entry| ScoredId {
                    id,
                    score: Self::cosine(entry, query_view, query_norm),
                })
            })
            .collect();
        hits.sort_by(rank_order);
        hits.truncate(k);
        hits
    }
}

impl DenseIndex for HnswIndex {
    fn insert(&mut self, id: ChunkId, vector: &[f32]) -> Result<(), IndexError> {
        self.check_dimension(vector)?;
        if self.entries.contains_key(&id) {
            return Err(IndexError::DuplicateId(id));
        }

        let entry = Array1::from(vector.to_vec());
        let norm = entry.dot(&entry).sqrt();
        self.entries.insert(
            id,
            Entry {
                vector: entry,
                norm,
            },
        );

        if self.tombstones.contains(&id) {
            // The stale point shares this id; rebuild so only the new vector is in the graph
            self.rebuild_graph();
        } else if norm > 0.0 {
            self.insert_into_graph(id, vector);
        }

        Ok(())
    }

    fn remove(&mut self, id: ChunkId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        if entry.norm > 0.0 {
            self.tombstones.insert(id);
        }

        if self.graph_points > 0
            && self.tombstones.len() as f32 > self.config.compaction_ratio * self.graph_points as f32
        {
            self.compact();
        }

        true
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredId>, IndexError> {
        self.check_dimension(query)?;
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_view = ArrayView1::from(query);
        let query_norm = query_view.dot(&query_view).sqrt();
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        if self.entries.len() <= self.config.exact_search_threshold {
            return Ok(self.exact_search(query_view, query_norm, k));
        }

        Ok(self.graph_search(query, query_view, query_norm, k))
    }

    fn compact(&mut self) -> usize {
        let purged = self.tombstones.len();
        if purged > 0 {
            debug!(
                "Compacting HNSW graph: {} tombstones, {} live vectors",
                purged,
                self.entries.len()
            );
            self.rebuild_graph();
        }
        purged
    }

    fn ids(&self) -> BTreeSet<ChunkId> {
        self.entries.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.tombstones.clear();
        self.graph = Self::new_graph(&self.config, 0);
        self.graph_points = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(exact_search_threshold: usize) -> DenseConfig {
        DenseConfig {
            exact_search_threshold,
            capacity: 64,
            ..DenseConfig::default()
        }
    }

    fn unit(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    fn ids(hits: &[ScoredId]) -> Vec<u64> {
        hits.iter().map(|h| h.id.0).collect()
    }

    #[test]
    fn test_insert_and_exact_search() {
        let mut index = HnswIndex::new(4, config(100));
        index.insert(ChunkId(1), &unit(4, 0)).unwrap();
        index.insert(ChunkId(2), &unit(4, 1)).unwrap();
        index.insert(ChunkId(3), &[0.9, 0.1, 0.0, 0.0]).unwrap();

        let hits = index.search(&unit(4, 0), 2).unwrap();
        assert_eq!(ids(&hits), vec![1, 3]);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_invalid_dimension() {
        let mut index = HnswIndex::new(4, config(100));
        assert!(matches!(
            index.insert(ChunkId(1), &[1.0, 0.0]),
            Err(IndexError::InvalidDimension {
                expected: 4,
                actual: 2
            })
        ));
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut index = HnswIndex::new(2, config(100));
        index.insert(ChunkId(1), &[1.0, 0.0]).unwrap();
        assert!(matches!(
            index.insert(ChunkId(1), &[0.0, 1.0]),
            Err(IndexError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_removed_vectors_never_returned() {
        let mut index = HnswIndex::new(4, config(0));
        for i in 0..4 {
            index.insert(ChunkId(i + 1), &unit(4, i as usize)).unwrap();
        }
        assert!(index.remove(ChunkId(1)));
        assert!(!index.remove(ChunkId(1)));

        let hits = index.search(&unit(4, 0), 4).unwrap();
        assert!(!ids(&hits).contains(&1));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_compaction_after_ratio_exceeded() {
        let mut dense = config(0);
        dense.compaction_ratio = 0.25;
        let mut index = HnswIndex::new(4, dense);
        for i in 0..8u64 {
            index
                .insert(ChunkId(i + 1), &[1.0, i as f32, 0.5, 0.0])
                .unwrap();
        }

        index.remove(ChunkId(1));
        index.remove(ChunkId(2));
        assert_eq!(index.tombstone_count(), 2);

        index.remove(ChunkId(3));
        assert_eq!(index.tombstone_count(), 0);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_manual_compact() {
        let mut index = HnswIndex::new(2, config(100));
        index.insert(ChunkId(1), &[1.0, 0.0]).unwrap();
        index.insert(ChunkId(2), &[0.0, 1.0]).unwrap();
        index.insert(ChunkId(3), &[1.0, 1.0]).unwrap();
        index.insert(ChunkId(4), &[1.0, 2.0]).unwrap();
        index.remove(ChunkId(2));

        assert_eq!(index.compact(), 1);
        assert_eq!(index.compact(), 0);
    }

    #[test]
    fn test_graph_search_finds_nearest() {
        let mut index = HnswIndex::new(8, config(0));
        for i in 0..8u64 {
            index.insert(ChunkId(i + 1), &unit(8, i as usize)).unwrap();
        }

        let hits = index.search(&unit(8, 5), 1).unwrap();
        assert_eq!(ids(&hits), vec![6]);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let mut index = HnswIndex::new(2, config(100));
        index.insert(ChunkId(1), &[0.0, 0.0]).unwrap();
        index.insert(ChunkId(2), &[1.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(ids(&hits), vec![2, 1]);
        assert_eq!(hits[1].score, 0.0);
    }

    #[test]
    fn test_zero_query_matches_nothing() {
        let mut index = HnswIndex::new(2, config(100));
        index.insert(ChunkId(1), &[1.0, 0.0]).unwrap();
        assert!(index.search(&[0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_ties_break_on_lower_id() {
        let mut index = HnswIndex::new(2, config(100));
        index.insert(ChunkId(7), &[1.0, 0.0]).unwrap();
        index.insert(ChunkId(3), &[1.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(ids(&hits), vec![3, 7]);
    }
}
