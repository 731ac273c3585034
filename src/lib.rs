//! Groundwork - Tenant-Scoped Hybrid Retrieval
//!
//! Ingests tenant-owned documents, builds per-tenant BM25 and dense vector
//! indexes, and answers queries with a fused, deterministic ranking of source
//! passages that can be cited as grounding evidence.

pub mod cancellation;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod retrieval;
pub mod tokenizer;

pub use cancellation::CancellationToken;
pub use error::{GroundworkError, Result};
pub use models::{ChunkId, DocumentId, DocumentStatus, TenantId};
pub use retrieval::{
    CorpusStats, DocumentUpload, QueryMode, RetrievalEngine, RetrievalError, RetrievalResult,
    SearchQuery,
};
