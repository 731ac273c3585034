//! Errors raised by ingestion, querying and corpus maintenance

use crate::embedding::EmbeddingError;
use crate::models::{DocumentId, TenantId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Source bytes could not be turned into text
    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    #[error("Document contains no text")]
    EmptyDocument,

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Indexes and the authoritative chunk set disagree
    #[error("Index corruption in corpus {tenant}: {detail}")]
    IndexCorruption { tenant: TenantId, detail: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Corpus {tenant} has no indexed content")]
    NoContent { tenant: TenantId },

    #[error("Query exceeded its {deadline_ms}ms deadline")]
    Timeout { deadline_ms: u64 },

    #[error("Document {document} not found in corpus {tenant}")]
    NotFound {
        tenant: TenantId,
        document: DocumentId,
    },

    #[error("Ingestion cancelled")]
    Cancelled,

    #[error("Index update failed: {0}")]
    Index(String),
}

impl RetrievalError {
    /// Reason recorded on a document that failed with this error
    pub fn failure_reason(&self) -> String {
        match self {
            RetrievalError::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        }
    }
}
