//! Configuration management for groundwork
//!
//! Every tuning constant of the retrieval pipeline (chunk window, BM25 `k1`/`b`,
//! HNSW parameters, fusion weight, query deadline) lives here rather than in
//! the components. Files are TOML, environment variables override single keys,
//! and named profiles override groups of keys.

use crate::chunking::DEFAULT_SENTENCE_BOUNDARY;
use crate::error::{GroundworkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub sparse: SparseConfig,
    pub dense: DenseConfig,
    pub fusion: FusionSettings,
    pub retrieval: RetrievalConfig,
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

/// Chunk window configuration, in tokenizer tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// A chunk is closed once adding the next sentence would pass this size
    pub target_chunk_tokens: usize,
    /// Hard upper bound; longer sentences are split at token boundaries
    pub max_chunk_tokens: usize,
    /// Trailing tokens carried into the next chunk
    pub overlap_tokens: usize,
    /// Trailing fragments smaller than this merge into the previous chunk
    pub min_chunk_tokens: usize,
    /// Regex matching the end of a sentence
    pub sentence_boundary: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chunk_tokens: 384,
            max_chunk_tokens: 512,
            overlap_tokens: 48,
            min_chunk_tokens: 32,
            sentence_boundary: DEFAULT_SENTENCE_BOUNDARY.to_string(),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name ("all-MiniLM-L6-v2", "bge-small-en-v1.5", "bge-base-en-v1.5" or "hashing")
    pub model: String,
    /// Vector dimension, only used by the hashing model
    pub dimension: usize,
    /// Texts per provider call
    pub batch_size: usize,
    /// Attempts per batch before giving up
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

/// BM25 tuning constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SparseConfig {
    /// Term frequency saturation
    pub k1: f32,
    /// Length normalization
    pub b: f32,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// HNSW vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseConfig {
    /// HNSW M parameter (number of connections per layer)
    pub hnsw_m: usize,
    /// HNSW construction parameter (higher = better recall, slower build)
    pub hnsw_ef_construction: usize,
    /// HNSW search parameter (higher = better recall, slower search)
    pub hnsw_ef_search: usize,
    /// Corpora with at most this many live vectors are scanned exactly
    pub exact_search_threshold: usize,
    /// Tombstone share of the graph that triggers compaction
    pub compaction_ratio: f32,
    /// Expected number of vectors per corpus
    pub capacity: usize,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            exact_search_threshold: 2048,
            compaction_ratio: 0.25,
            capacity: 10_000,
        }
    }
}

/// Reciprocal rank fusion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// Weight of the sparse ranking; the dense ranking gets `1 - alpha`
    pub alpha: f32,
    /// RRF smoothing constant
    pub rrf_k: f32,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            rrf_k: 60.0,
        }
    }
}

/// Query serving configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_k: usize,
    /// Candidates fetched from each index per requested result
    pub search_multiplier: usize,
    /// Default query deadline, 0 disables it
    pub query_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: 100,
            search_multiplier: 1,
            query_timeout_ms: 5_000,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_alpha: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_chunk_tokens: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GroundworkError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| GroundworkError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GroundworkError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| GroundworkError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| GroundworkError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(alpha) = overrides.fusion_alpha {
            self.fusion.alpha = alpha;
        }
        if let Some(k) = overrides.default_k {
            self.retrieval.default_k = k;
        }
        if let Some(target) = overrides.target_chunk_tokens {
            self.chunking.target_chunk_tokens = target;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: GROUNDWORK_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("GROUNDWORK_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__BATCH_SIZE" => {
                self.embedding.batch_size = parse_env(path, value)?;
            }
            "FUSION__ALPHA" => {
                self.fusion.alpha = parse_env(path, value)?;
            }
            "FUSION__RRF_K" => {
                self.fusion.rrf_k = parse_env(path, value)?;
            }
            "SPARSE__K1" => {
                self.sparse.k1 = parse_env(path, value)?;
            }
            "SPARSE__B" => {
                self.sparse.b = parse_env(path, value)?;
            }
            "RETRIEVAL__DEFAULT_K" => {
                self.retrieval.default_k = parse_env(path, value)?;
            }
            "RETRIEVAL__QUERY_TIMEOUT_MS" => {
                self.retrieval.query_timeout_ms = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            GroundworkError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("groundwork").join("config.toml"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| GroundworkError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "keyword".to_string(),
            ProfileOverrides {
                fusion_alpha: Some(0.8),
                ..Default::default()
            },
        );
        profiles.insert(
            "offline".to_string(),
            ProfileOverrides {
                embedding_model: Some("hashing".to_string()),
                ..Default::default()
            },
        );

        Self {
            meta: MetaConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            sparse: SparseConfig::default(),
            dense: DenseConfig::default(),
            fusion: FusionSettings::default(),
            retrieval: RetrievalConfig::default(),
            profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.fusion.alpha = 0.3;
        config.chunking.target_chunk_tokens = 200;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.chunking.target_chunk_tokens, 200);
        assert!((loaded.fusion.alpha - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[sparse]\nk1 = 1.2\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!((config.sparse.k1 - 1.2).abs() < f32::EPSILON);
        assert!((config.sparse.b - 0.75).abs() < f32::EPSILON);
        assert_eq!(config.chunking.max_chunk_tokens, 512);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/groundwork.toml"));
        assert!(matches!(result, Err(GroundworkError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_invalid_file_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[fusion]\nalpha = 1.5\n").unwrap();

        let result = Config::load(&path);
        assert!(matches!(
            result,
            Err(GroundworkError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.apply_profile("offline").unwrap();
        assert_eq!(config.embedding.model, "hashing");

        config.apply_profile("keyword").unwrap();
        assert!((config.fusion.alpha - 0.8).abs() < f32::EPSILON);

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_env_value_parsing() {
        let mut config = Config::default();
        config.set_value_from_env("FUSION__ALPHA", "0.25").unwrap();
        assert!((config.fusion.alpha - 0.25).abs() < f32::EPSILON);

        config
            .set_value_from_env("RETRIEVAL__DEFAULT_K", "9")
            .unwrap();
        assert_eq!(config.retrieval.default_k, 9);

        let err = config.set_value_from_env("SPARSE__K1", "high");
        assert!(matches!(
            err,
            Err(GroundworkError::InvalidConfigValue { .. })
        ));
    }
}
