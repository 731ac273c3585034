//! Core data model: tenants, documents, chunks and embeddings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque tenant identifier, always supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Document identifier, unique within a tenant corpus
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

/// Chunk identifier, unique within a tenant corpus and never reused.
///
/// Ordering on chunk ids is the final tie-break of every ranking.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk-{}", self.0)
    }
}

/// Ingestion state of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    Uploaded,
    Chunking,
    Embedding,
    Indexed,
    Failed(String),
}

impl DocumentStatus {
    /// Indexed and Failed are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Indexed | DocumentStatus::Failed(_))
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Uploaded => f.write_str("uploaded"),
            DocumentStatus::Chunking => f.write_str("chunking"),
            DocumentStatus::Embedding => f.write_str("embedding"),
            DocumentStatus::Indexed => f.write_str("indexed"),
            DocumentStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A tenant-owned source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub filename: String,
    pub page_count: usize,
    pub status: DocumentStatus,
    /// Free-form descriptive metadata (subject, grade level, ...)
    pub metadata: BTreeMap<String, String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        id: DocumentId,
        tenant_id: TenantId,
        filename: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id,
            filename: filename.into(),
            page_count: 0,
            status: DocumentStatus::Uploaded,
            metadata,
            uploaded_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: DocumentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// A passage of a document, the unit of indexing and retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub tenant_id: TenantId,
    pub text: String,
    /// Ordinal of the chunk within its document
    pub position: usize,
    pub token_count: usize,
    /// 1-based page the chunk starts on
    pub source_page: usize,
}

/// Dense vector for one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!DocumentStatus::Uploaded.is_terminal());
        assert!(!DocumentStatus::Embedding.is_terminal());
        assert!(DocumentStatus::Indexed.is_terminal());
        assert!(DocumentStatus::Failed("boom".to_string()).is_terminal());
    }

    #[test]
    fn test_chunk_id_ordering() {
        let mut ids = vec![ChunkId(7), ChunkId(2), ChunkId(11)];
        ids.sort();
        assert_eq!(ids, vec![ChunkId(2), ChunkId(7), ChunkId(11)]);
    }

    #[test]
    fn test_document_starts_uploaded() {
        let doc = Document::new(
            DocumentId(1),
            TenantId::new("acme"),
            "notes.pdf",
            BTreeMap::new(),
        );
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert_eq!(doc.page_count, 0);
        assert_eq!(doc.tenant_id.as_str(), "acme");
    }
}
