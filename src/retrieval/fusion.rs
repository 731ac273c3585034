//! Weighted Reciprocal Rank Fusion for combining sparse and dense rankings

use super::QueryMode;
use crate::config::FusionSettings;
use crate::index::ScoredId;
use crate::models::ChunkId;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FusionError {
    #[error("Invalid blend weight: alpha must be within [0, 1], got {0}")]
    InvalidAlpha(f32),

    #[error("Invalid smoothing constant: rrf_k must be positive, got {0}")]
    InvalidSmoothing(f32),
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// RRF smoothing constant (typically 60)
    pub rrf_k: f32,

    /// Weight of the sparse ranking; the dense ranking gets `1 - alpha`
    pub alpha: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, alpha: f32) -> Result<Self, FusionError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(FusionError::InvalidAlpha(alpha));
        }
        if !(rrf_k > 0.0) {
            return Err(FusionError::InvalidSmoothing(rrf_k));
        }

        Ok(Self { rrf_k, alpha })
    }

    /// Blend weight for a query mode: sparse-only and dense-only pin alpha to 1 and 0
    pub fn for_mode(&self, mode: QueryMode) -> Self {
        let alpha = match mode {
            QueryMode::Hybrid => self.alpha,
            QueryMode::Sparse => 1.0,
            QueryMode::Dense => 0.0,
        };
        Self {
            rrf_k: self.rrf_k,
            alpha,
        }
    }
}

impl TryFrom<&FusionSettings> for FusionConfig {
    type Error = FusionError;

    fn try_from(settings: &FusionSettings) -> Result<Self, Self::Error> {
        Self::new(settings.rrf_k, settings.alpha)
    }
}

/// One fused result with the 1-based rank it held in each input list
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: ChunkId,
    pub score: f32,
    pub sparse_rank: Option<usize>,
    pub dense_rank: Option<usize>,
}

/// Apply weighted Reciprocal Rank Fusion to a sparse and a dense ranking
///
/// score(id) = alpha / (c + rank_sparse) + (1 - alpha) / (c + rank_dense)
///
/// Ranks are 1-based. A chunk missing from one list gets nothing from that
/// list but is still ranked; a chunk listed twice keeps its best rank.
/// Sorted by fused score descending, then lower chunk id, truncated to `k`.
pub fn fuse(
    sparse: &[ScoredId],
    dense: &[ScoredId],
    k: usize,
    config: &FusionConfig,
) -> Vec<FusedHit> {
    let mut ranks: BTreeMap<ChunkId, (Option<usize>, Option<usize>)> = BTreeMap::new();

    for (index, hit) in sparse.iter().enumerate() {
        ranks.entry(hit.id).or_default().0.get_or_insert(index + 1);
    }
    for (index, hit) in dense.iter().enumerate() {
        ranks.entry(hit.id).or_default().1.get_or_insert(index + 1);
    }

    let mut fused: Vec<FusedHit> = ranks
        .into_iter()
        .map(|(id, (sparse_rank, dense_rank))| {
            let mut score = 0.0;
            if let Some(rank) = sparse_rank {
                score += config.alpha / (config.rrf_k + rank as f32);
            }
            if let Some(rank) = dense_rank {
                score += (1.0 - config.alpha) / (config.rrf_k + rank as f32);
            }
            FusedHit {
                id,
                score,
                sparse_rank,
                dense_rank,
            }
        })
        .collect();

    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    fused.truncate(k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(ids: &[u64]) -> Vec<ScoredId> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ScoredId {
                id: ChunkId(*id),
                score: 1.0 - i as f32 * 0.1,
            })
            .collect()
    }

    fn ids(hits: &[FusedHit]) -> Vec<u64> {
        hits.iter().map(|h| h.id.0).collect()
    }

    #[test]
    fn test_rrf_basic() {
        let config = FusionConfig::new(60.0, 0.5).unwrap();
        let fused = fuse(&ranked(&[2, 1, 4]), &ranked(&[1, 2, 3]), 10, &config);

        assert_eq!(fused.len(), 4);
        // 1 and 2 appear in both lists with mirrored ranks, so they tie; lower id wins
        assert_eq!(ids(&fused[..2]), vec![1, 2]);
        assert_eq!(fused[0].score, fused[1].score);
    }

    #[test]
    fn test_rrf_weighted() {
        let sparse_heavy = FusionConfig::new(60.0, 0.7).unwrap();
        let fused = fuse(&ranked(&[1]), &ranked(&[2]), 10, &sparse_heavy);
        assert_eq!(ids(&fused), vec![1, 2]);

        let dense_heavy = FusionConfig::new(60.0, 0.3).unwrap();
        let fused = fuse(&ranked(&[1]), &ranked(&[2]), 10, &dense_heavy);
        assert_eq!(ids(&fused), vec![2, 1]);
    }

    #[test]
    fn test_partial_signal_included() {
        let config = FusionConfig::new(60.0, 0.5).unwrap();
        let fused = fuse(&ranked(&[7, 3]), &ranked(&[3]), 10, &config);

        let only_sparse = fused.iter().find(|h| h.id == ChunkId(7)).unwrap();
        assert_eq!(only_sparse.sparse_rank, Some(1));
        assert_eq!(only_sparse.dense_rank, None);
        assert_eq!(only_sparse.score, 0.5 / 61.0);
    }

    #[test]
    fn test_determinism() {
        let config = FusionConfig::new(60.0, 0.35).unwrap();
        let sparse = ranked(&[5, 9, 1, 4, 8]);
        let dense = ranked(&[1, 2, 5, 7, 9, 3]);

        let first = fuse(&sparse, &dense, 6, &config);
        let second = fuse(&sparse, &dense, 6, &config);

        assert_eq!(first, second);
        let bits = |hits: &[FusedHit]| -> Vec<(u64, u32)> {
            hits.iter().map(|h| (h.id.0, h.score.to_bits())).collect()
        };
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_truncates_to_k() {
        let config = FusionConfig::new(60.0, 0.5).unwrap();
        let fused = fuse(&ranked(&[1, 2, 3]), &ranked(&[4, 5, 6]), 2, &config);
        assert_eq!(fused.len(), 2);
        assert!(fuse(&[], &[], 5, &config).is_empty());
    }

    #[test]
    fn test_duplicate_id_keeps_best_rank() {
        let config = FusionConfig::new(60.0, 1.0).unwrap();
        let fused = fuse(&ranked(&[3, 1, 3]), &[], 10, &config);

        let three = fused.iter().find(|h| h.id == ChunkId(3)).unwrap();
        assert_eq!(three.sparse_rank, Some(1));
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_mode_pins_alpha() {
        let config = FusionConfig::new(60.0, 0.5).unwrap();
        assert_eq!(config.for_mode(QueryMode::Sparse).alpha, 1.0);
        assert_eq!(config.for_mode(QueryMode::Dense).alpha, 0.0);
        assert_eq!(config.for_mode(QueryMode::Hybrid).alpha, 0.5);
    }

    #[test]
    fn test_invalid_config() {
        assert_eq!(
            FusionConfig::new(60.0, 1.5),
            Err(FusionError::InvalidAlpha(1.5))
        );
        assert_eq!(
            FusionConfig::new(0.0, 0.5),
            Err(FusionError::InvalidSmoothing(0.0))
        );
    }
}
