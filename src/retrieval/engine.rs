//! Retrieval orchestrator: owns tenant corpora, runs ingestion and serves queries

use super::corpus::{Corpus, CorpusStats, Lookup};
use super::fusion::FusionConfig;
use super::provenance::RetrievalResult;
use super::{QueryMode, RetrievalError, SearchQuery};
use crate::cancellation::CancellationToken;
use crate::chunking::Chunker;
use crate::config::{Config, ConfigValidator};
use crate::embedding::{provider_from_config, BatchEmbedder, EmbeddingError, EmbeddingProvider};
use crate::error::{GroundworkError, Result};
use crate::extract::extract_pages;
use crate::index::{DefaultIndexBackend, IndexBackend};
use crate::models::{Document, DocumentId, DocumentStatus, TenantId};
use crate::tokenizer::{AnalyzerTokenizer, Tokenizer};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// A document as handed over by the caller
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub metadata: BTreeMap<String, String>,
}

impl DocumentUpload {
    pub fn new(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Marks the document Failed if ingestion is dropped before it finishes
struct IngestGuard {
    corpus: Arc<Corpus>,
    document_id: DocumentId,
    armed: bool,
}

impl IngestGuard {
    fn new(corpus: Arc<Corpus>, document_id: DocumentId) -> Self {
        Self {
            corpus,
            document_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for IngestGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let corpus = Arc::clone(&self.corpus);
            let document_id = self.document_id;
            handle.spawn(async move {
                corpus.mark_failed(document_id, "ingestion aborted").await;
            });
        }
    }
}

/// Tenant-scoped hybrid retrieval engine
///
/// Corpora are created lazily on first ingestion and never shared between
/// tenants; a query only ever touches the corpus of the tenant it names.
pub struct RetrievalEngine {
    config: Config,
    tokenizer: Arc<dyn Tokenizer>,
    chunker: Arc<Chunker>,
    embedder: BatchEmbedder,
    fusion: FusionConfig,
    backend: Arc<dyn IndexBackend>,
    corpora: RwLock<HashMap<TenantId, Arc<Corpus>>>,
}

impl RetrievalEngine {
    /// Create an engine around an existing embedding provider
    pub fn new(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::with_tokenizer(config, provider, Arc::new(AnalyzerTokenizer::new()))
    }

    /// Create an engine with the provider named in `embedding.model`
    pub fn from_config(config: Config) -> Result<Self> {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(AnalyzerTokenizer::new());
        let provider = provider_from_config(&config.embedding, Arc::clone(&tokenizer))
            .map_err(RetrievalError::from)?;
        Self::with_tokenizer(config, provider, tokenizer)
    }

    fn with_tokenizer(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        ConfigValidator::validate(&config)?;

        let chunker = Chunker::new(config.chunking.clone(), Arc::clone(&tokenizer))
            .map_err(|e| GroundworkError::Config(format!("Invalid sentence boundary: {}", e)))?;
        let fusion = FusionConfig::try_from(&config.fusion)
            .map_err(|e| GroundworkError::Config(e.to_string()))?;
        let embedder = BatchEmbedder::from_config(provider, &config.embedding);
        let backend = Arc::new(DefaultIndexBackend::new(
            config.sparse.clone(),
            config.dense.clone(),
            Arc::clone(&tokenizer),
        ));

        info!(
            "Retrieval engine ready: model {} ({}D), alpha {}, rrf_k {}",
            embedder.model_name(),
            embedder.dimension(),
            fusion.alpha,
            fusion.rrf_k
        );

        Ok(Self {
            config,
            tokenizer,
            chunker: Arc::new(chunker),
            embedder,
            fusion,
            backend,
            corpora: RwLock::new(HashMap::new()),
        })
    }

    /// Replace the index backend used for corpora created from now on
    pub fn with_index_backend(mut self, backend: Arc<dyn IndexBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    async fn corpus(&self, tenant: &TenantId) -> Option<Arc<Corpus>> {
        self.corpora.read().await.get(tenant).cloned()
    }

    async fn corpus_or_create(&self, tenant: &TenantId) -> Arc<Corpus> {
        if let Some(corpus) = self.corpus(tenant).await {
            return corpus;
        }

        let mut corpora = self.corpora.write().await;
        let corpus = corpora.entry(tenant.clone()).or_insert_with(|| {
            info!("Creating corpus for tenant {}", tenant);
            Arc::new(Corpus::new(
                tenant.clone(),
                self.backend.as_ref(),
                self.embedder.dimension(),
            ))
        });
        Arc::clone(corpus)
    }

    /// Ingest a document as one transaction: all of its chunks become visible or none do
    pub async fn ingest(
        &self,
        tenant: &TenantId,
        bytes: &[u8],
        filename: &str,
    ) -> std::result::Result<DocumentId, RetrievalError> {
        self.ingest_document(
            tenant,
            DocumentUpload::new(bytes, filename),
            &CancellationToken::new(),
        )
        .await
    }

    /// Ingest with metadata and a cancellation token checked up to the commit
    pub async fn ingest_document(
        &self,
        tenant: &TenantId,
        upload: DocumentUpload,
        cancel: &CancellationToken,
    ) -> std::result::Result<DocumentId, RetrievalError> {
        let DocumentUpload {
            bytes,
            filename,
            metadata,
        } = upload;

        let corpus = self.corpus_or_create(tenant).await;
        let document_id = corpus.register(&filename, metadata).await;
        let mut guard = IngestGuard::new(Arc::clone(&corpus), document_id);

        let _writer = corpus.lock_writer().await;
        let result = self
            .run_pipeline(&corpus, document_id, bytes, &filename, cancel)
            .await;
        guard.disarm();

        match result {
            Ok(chunks) => {
                info!(
                    "Indexed {} ({}) for tenant {}: {} chunks",
                    filename, document_id, tenant, chunks
                );
                Ok(document_id)
            }
            Err(e) => {
                corpus.mark_failed(document_id, &e.failure_reason()).await;
                warn!(
                    "Ingestion of {} ({}) for tenant {} failed: {}",
                    filename, document_id, tenant, e
                );
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        corpus: &Corpus,
        document_id: DocumentId,
        bytes: Vec<u8>,
        filename: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<usize, RetrievalError> {
        check_cancelled(cancel)?;
        corpus
            .set_status(document_id, DocumentStatus::Chunking)
            .await;

        // Extraction and chunking are CPU-bound; keep them off the async workers
        let name = filename.to_string();
        let pages = tokio::task::spawn_blocking(move || extract_pages(&bytes, &name))
            .await
            .map_err(|e| RetrievalError::Ingestion(format!("Extraction task failed: {}", e)))??;
        corpus.set_page_count(document_id, pages.len()).await;

        let chunker = Arc::clone(&self.chunker);
        let drafts = tokio::task::spawn_blocking(move || chunker.chunk_all(&pages))
            .await
            .map_err(|e| RetrievalError::Ingestion(format!("Chunking task failed: {}", e)))??;
        check_cancelled(cancel)?;

        corpus
            .set_status(document_id, DocumentStatus::Embedding)
            .await;
        let texts: Vec<String> = drafts.iter().map(|draft| draft.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts, cancel)
            .await
            .map_err(|e| match e {
                EmbeddingError::Cancelled => RetrievalError::Cancelled,
                other => RetrievalError::Embedding(other),
            })?;

        check_cancelled(cancel)?;
        corpus.commit(document_id, drafts, vectors).await
    }

    /// Top-k passages for `text` within the tenant's corpus
    pub async fn query(
        &self,
        tenant: &TenantId,
        text: &str,
        k: usize,
        mode: Option<QueryMode>,
    ) -> std::result::Result<RetrievalResult, RetrievalError> {
        let query = SearchQuery::new(text, k).with_mode(mode.unwrap_or_default());
        self.search(tenant, &query).await
    }

    /// Run a query under its deadline; a timed-out query has no side effects
    pub async fn search(
        &self,
        tenant: &TenantId,
        query: &SearchQuery,
    ) -> std::result::Result<RetrievalResult, RetrievalError> {
        let deadline = query.deadline.or_else(|| {
            let ms = self.config.retrieval.query_timeout_ms;
            (ms > 0).then(|| Duration::from_millis(ms))
        });

        match deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.run_query(tenant, query))
                .await
                .map_err(|_| RetrievalError::Timeout {
                    deadline_ms: deadline.as_millis() as u64,
                })?,
            None => self.run_query(tenant, query).await,
        }
    }

    async fn run_query(
        &self,
        tenant: &TenantId,
        query: &SearchQuery,
    ) -> std::result::Result<RetrievalResult, RetrievalError> {
        if query.text.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if query.limit == 0 {
            return Err(RetrievalError::InvalidQuery(
                "Result limit must be at least 1".to_string(),
            ));
        }
        if let Some(min_score) = query.min_score {
            if !min_score.is_finite() || min_score < 0.0 {
                return Err(RetrievalError::InvalidQuery(format!(
                    "Minimum score must be a non-negative number, got {}",
                    min_score
                )));
            }
        }

        let corpus = self
            .corpus(tenant)
            .await
            .ok_or_else(|| RetrievalError::NoContent {
                tenant: tenant.clone(),
            })?;

        let k = query.limit.min(self.config.retrieval.max_k);
        let terms = match query.mode {
            QueryMode::Dense => None,
            _ => Some(self.tokenizer.terms(&query.text)),
        };
        let vector = match query.mode {
            QueryMode::Sparse => None,
            _ => Some(self.embedder.embed_query(&query.text).await?),
        };

        let lookup = Lookup {
            terms: terms.as_deref(),
            vector: vector.as_deref(),
            candidates: k.saturating_mul(self.config.retrieval.search_multiplier),
            k,
            min_score: query.min_score,
            fusion: self.fusion.for_mode(query.mode),
        };
        let passages = corpus.retrieve(&lookup).await?;

        Ok(RetrievalResult {
            query: query.text.clone(),
            mode: query.mode,
            passages,
        })
    }

    /// Remove a document's chunks from both indexes and the authoritative set
    pub async fn delete_document(
        &self,
        tenant: &TenantId,
        document_id: DocumentId,
    ) -> std::result::Result<(), RetrievalError> {
        let corpus = self
            .corpus(tenant)
            .await
            .ok_or_else(|| RetrievalError::NotFound {
                tenant: tenant.clone(),
                document: document_id,
            })?;
        corpus.delete(document_id).await?;
        Ok(())
    }

    /// Counts for the tenant; an unknown tenant is an empty corpus
    pub async fn stats(&self, tenant: &TenantId) -> CorpusStats {
        match self.corpus(tenant).await {
            Some(corpus) => corpus.stats().await,
            None => CorpusStats::default(),
        }
    }

    /// Rebuild both indexes from the authoritative chunk set; returns the chunk count
    pub async fn rebuild(&self, tenant: &TenantId) -> std::result::Result<usize, RetrievalError> {
        match self.corpus(tenant).await {
            Some(corpus) => corpus.rebuild().await,
            None => Ok(0),
        }
    }

    /// Check that both indexes hold exactly the authoritative chunk ids
    pub async fn verify(&self, tenant: &TenantId) -> std::result::Result<(), RetrievalError> {
        match self.corpus(tenant).await {
            Some(corpus) => corpus.verify().await,
            None => Ok(()),
        }
    }

    /// Purge tombstoned vectors; returns how many were purged
    pub async fn compact(&self, tenant: &TenantId) -> usize {
        match self.corpus(tenant).await {
            Some(corpus) => corpus.compact().await,
            None => 0,
        }
    }

    pub async fn document(&self, tenant: &TenantId, document_id: DocumentId) -> Option<Document> {
        self.corpus(tenant).await?.document(document_id).await
    }

    pub async fn documents(&self, tenant: &TenantId) -> Vec<Document> {
        match self.corpus(tenant).await {
            Some(corpus) => corpus.documents().await,
            None => Vec::new(),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> std::result::Result<(), RetrievalError> {
    if cancel.is_cancelled() {
        Err(RetrievalError::Cancelled)
    } else {
        Ok(())
    }
}
