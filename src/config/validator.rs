use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::SUPPORTED_MODELS;
use crate::error::{GroundworkError, Result, ValidationError};

/// Upper bound for `retrieval.max_k`
const MAX_K_LIMIT: usize = 10_000;

/// Upper bound for `retrieval.search_multiplier`
const MAX_SEARCH_MULTIPLIER: usize = 100;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_sparse(config, &mut errors);
        Self::validate_dense(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GroundworkError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;

        if chunking.max_chunk_tokens == 0 {
            errors.push(ValidationError::new(
                "chunking.max_chunk_tokens",
                "Max chunk tokens must be greater than 0",
            ));
        }

        if chunking.target_chunk_tokens == 0 {
            errors.push(ValidationError::new(
                "chunking.target_chunk_tokens",
                "Target chunk tokens must be greater than 0",
            ));
        }

        if chunking.min_chunk_tokens == 0 {
            errors.push(ValidationError::new(
                "chunking.min_chunk_tokens",
                "Min chunk tokens must be greater than 0",
            ));
        }

        if chunking.target_chunk_tokens > chunking.max_chunk_tokens {
            errors.push(ValidationError::new(
                "chunking.target_chunk_tokens",
                format!(
                    "Target ({}) cannot exceed max chunk tokens ({})",
                    chunking.target_chunk_tokens, chunking.max_chunk_tokens
                ),
            ));
        }

        if chunking.min_chunk_tokens > chunking.target_chunk_tokens {
            errors.push(ValidationError::new(
                "chunking.min_chunk_tokens",
                format!(
                    "Min ({}) cannot exceed target chunk tokens ({})",
                    chunking.min_chunk_tokens, chunking.target_chunk_tokens
                ),
            ));
        }

        if chunking.overlap_tokens >= chunking.target_chunk_tokens {
            errors.push(ValidationError::new(
                "chunking.overlap_tokens",
                "Overlap must be smaller than the target chunk size",
            ));
        }

        if let Err(e) = regex::Regex::new(&chunking.sentence_boundary) {
            errors.push(ValidationError::new(
                "chunking.sentence_boundary",
                format!("Invalid regex: {}", e),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if !SUPPORTED_MODELS.contains(&embedding.model.as_str()) {
            errors.push(ValidationError::new(
                "embedding.model",
                format!(
                    "Unsupported model: {}. Supported: {}",
                    embedding.model,
                    SUPPORTED_MODELS.join(", ")
                ),
            ));
        }

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if embedding.max_attempts == 0 {
            errors.push(ValidationError::new(
                "embedding.max_attempts",
                "At least one attempt is required",
            ));
        }

        if embedding.initial_backoff_ms > embedding.max_backoff_ms {
            errors.push(ValidationError::new(
                "embedding.initial_backoff_ms",
                "Initial backoff cannot exceed max backoff",
            ));
        }
    }

    fn validate_sparse(config: &Config, errors: &mut Vec<ValidationError>) {
        if !(config.sparse.k1 >= 0.0) {
            errors.push(ValidationError::new(
                "sparse.k1",
                format!("k1 must be non-negative, got {}", config.sparse.k1),
            ));
        }

        if !(0.0..=1.0).contains(&config.sparse.b) {
            errors.push(ValidationError::new(
                "sparse.b",
                format!("b must be between 0.0 and 1.0, got {}", config.sparse.b),
            ));
        }
    }

    fn validate_dense(config: &Config, errors: &mut Vec<ValidationError>) {
        let dense = &config.dense;

        if dense.hnsw_m < 2 || dense.hnsw_m > 256 {
            errors.push(ValidationError::new(
                "dense.hnsw_m",
                format!("HNSW M must be between 2 and 256, got {}", dense.hnsw_m),
            ));
        }

        if dense.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "dense.hnsw_ef_construction",
                "ef_construction must be greater than 0",
            ));
        }

        if dense.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "dense.hnsw_ef_search",
                "ef_search must be greater than 0",
            ));
        }

        if !(dense.compaction_ratio > 0.0 && dense.compaction_ratio <= 1.0) {
            errors.push(ValidationError::new(
                "dense.compaction_ratio",
                format!(
                    "Compaction ratio must be in (0.0, 1.0], got {}",
                    dense.compaction_ratio
                ),
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        if !(0.0..=1.0).contains(&config.fusion.alpha) {
            errors.push(ValidationError::new(
                "fusion.alpha",
                format!(
                    "Alpha must be between 0.0 and 1.0, got {}",
                    config.fusion.alpha
                ),
            ));
        }

        if !(config.fusion.rrf_k > 0.0) {
            errors.push(ValidationError::new(
                "fusion.rrf_k",
                format!("RRF k must be positive, got {}", config.fusion.rrf_k),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.default_k == 0 || retrieval.default_k > retrieval.max_k {
            errors.push(ValidationError::new(
                "retrieval.default_k",
                format!(
                    "Default k must be between 1 and max_k ({}), got {}",
                    retrieval.max_k, retrieval.default_k
                ),
            ));
        }

        if retrieval.max_k > MAX_K_LIMIT {
            errors.push(ValidationError::new(
                "retrieval.max_k",
                format!(
                    "Max k cannot exceed {}, got {}",
                    MAX_K_LIMIT, retrieval.max_k
                ),
            ));
        }

        if retrieval.search_multiplier == 0 || retrieval.search_multiplier > MAX_SEARCH_MULTIPLIER {
            errors.push(ValidationError::new(
                "retrieval.search_multiplier",
                format!(
                    "Search multiplier must be between 1 and {}, got {}",
                    MAX_SEARCH_MULTIPLIER, retrieval.search_multiplier
                ),
            ));
        }
    }
}
