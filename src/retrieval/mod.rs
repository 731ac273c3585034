//! Hybrid retrieval: tenant corpora, ingestion and fused sparse/dense search
//!
//! Sparse (BM25) and dense (cosine) rankings are merged with weighted
//! Reciprocal Rank Fusion. Every tenant owns an isolated [`Corpus`].

mod corpus;
mod engine;
mod error;
mod fusion;
mod provenance;

pub use corpus::{Corpus, CorpusStats};
pub use engine::{DocumentUpload, RetrievalEngine};
pub use error::RetrievalError;
pub use fusion::{fuse, FusedHit, FusionConfig, FusionError};
pub use provenance::{RetrievalResult, RetrievedPassage, SourceCitation};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which rankings feed the fused result
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Both rankings, blended by `fusion.alpha`
    #[default]
    Hybrid,
    /// BM25 only; the query is not embedded
    Sparse,
    /// Vector similarity only
    Dense,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Hybrid => f.write_str("hybrid"),
            QueryMode::Sparse => f.write_str("sparse"),
            QueryMode::Dense => f.write_str("dense"),
        }
    }
}

/// Search query with mode and optional deadline
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query text
    pub text: String,

    /// Maximum number of passages
    pub limit: usize,

    pub mode: QueryMode,

    /// Overrides `retrieval.query_timeout_ms` when set
    pub deadline: Option<Duration>,

    /// Passages with a lower fused score are dropped
    pub min_score: Option<f32>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            mode: QueryMode::default(),
            deadline: None,
            min_score: None,
        }
    }

    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }
}
