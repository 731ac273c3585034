/// Embedding generation
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction over backends
/// - FastEmbedProvider for local ONNX models (all-MiniLM-L6-v2, 384-dim)
/// - HashingProvider for deterministic offline embeddings
/// - BatchEmbedder for batching, retry with backoff and cancellation
mod batch;
mod provider;

pub use batch::{BatchEmbedder, RetryPolicy};
pub use provider::{
    provider_from_config, EmbeddingError, EmbeddingProvider, FastEmbedProvider, HashingProvider,
};

/// Model names accepted in `embedding.model`
pub const SUPPORTED_MODELS: &[&str] = &[
    "all-MiniLM-L6-v2",
    "bge-small-en-v1.5",
    "bge-base-en-v1.5",
    HashingProvider::MODEL_NAME,
];
