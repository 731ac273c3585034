//! Citations and ranked passage structures

use super::QueryMode;
use crate::models::{ChunkId, DocumentId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a passage came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub document_id: DocumentId,

    /// Original upload filename
    pub filename: String,

    /// 1-based page the passage starts on
    pub page: usize,

    /// Ordinal of the chunk within its document
    pub position: usize,

    /// Document metadata supplied at upload
    pub metadata: BTreeMap<String, String>,
}

impl fmt::Display for SourceCitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, p. {}", self.filename, self.page)
    }
}

/// A passage with its fused score and per-signal ranks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk_id: ChunkId,

    pub text: String,

    pub source_citation: SourceCitation,

    /// Weighted reciprocal-rank score (higher is better)
    pub fused_score: f32,

    /// 1-based rank in the sparse list, if the chunk was there
    pub sparse_rank: Option<usize>,

    /// 1-based rank in the dense list, if the chunk was there
    pub dense_rank: Option<usize>,
}

impl RetrievedPassage {
    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.text.char_indices().nth(max_chars) {
            Some((end, _)) => format!("{}...", &self.text[..end]),
            None => self.text.clone(),
        }
    }
}

/// Ordered passages answering one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub mode: QueryMode,
    pub passages: Vec<RetrievedPassage>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.passages.iter().map(|p| p.chunk_id).collect()
    }
}
