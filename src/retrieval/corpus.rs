//! Per-tenant corpus: documents, authoritative chunks and the two indexes

use super::fusion::{fuse, FusionConfig};
use super::provenance::{RetrievedPassage, SourceCitation};
use super::RetrievalError;
use crate::chunking::ChunkDraft;
use crate::embedding::EmbeddingError;
use crate::index::{DenseIndex, IndexBackend, ScoredId, SparseIndex};
use crate::models::{Chunk, ChunkId, Document, DocumentId, DocumentStatus, Embedding, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info};

/// Document and chunk counts for one tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
    /// Documents in the Indexed state
    pub document_count: usize,
    pub chunk_count: usize,
    pub failed_document_count: usize,
}

/// Inputs of one index lookup
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lookup<'a> {
    /// Query terms; `None` skips the sparse index
    pub terms: Option<&'a [String]>,
    /// Query embedding; `None` skips the dense index
    pub vector: Option<&'a [f32]>,
    /// Candidates requested from each index
    pub candidates: usize,
    pub k: usize,
    pub fusion: FusionConfig,
    /// Fused-score cutoff applied after fusion
    pub min_score: Option<f32>,
}

struct StoredChunk {
    chunk: Chunk,
    embedding: Embedding,
}

struct CorpusState {
    documents: BTreeMap<DocumentId, Document>,
    /// Source of truth for rebuilds
    chunks: BTreeMap<ChunkId, StoredChunk>,
    sparse: Box<dyn SparseIndex>,
    dense: Box<dyn DenseIndex>,
    next_document_id: u64,
    next_chunk_id: u64,
}

impl CorpusState {
    /// Both indexes hold exactly the authoritative chunk ids
    fn is_consistent(&self) -> bool {
        if self.sparse.len() != self.chunks.len() || self.dense.len() != self.chunks.len() {
            return false;
        }
        let authoritative: BTreeSet<ChunkId> = self.chunks.keys().copied().collect();
        self.sparse.ids() == authoritative && self.dense.ids() == authoritative
    }

    fn rebuild_indexes(&mut self) -> Result<usize, RetrievalError> {
        self.sparse.clear();
        self.dense.clear();

        for (id, stored) in &self.chunks {
            self.sparse
                .insert(*id, &stored.chunk.text)
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
            self.dense
                .insert(stored.embedding.chunk_id, &stored.embedding.vector)
                .map_err(|e| RetrievalError::Index(e.to_string()))?;
        }

        Ok(self.chunks.len())
    }

    fn insert_chunk(&mut self, stored: StoredChunk) -> Result<(), RetrievalError> {
        let id = stored.chunk.id;
        self.sparse
            .insert(id, &stored.chunk.text)
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        self.dense
            .insert(stored.embedding.chunk_id, &stored.embedding.vector)
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        self.chunks.insert(id, stored);
        Ok(())
    }

    fn sparse_candidates(&self, terms: Option<&[String]>, limit: usize) -> Vec<ScoredId> {
        match terms {
            Some(terms) => self.sparse.search(terms, limit),
            None => Vec::new(),
        }
    }

    fn dense_candidates(
        &self,
        vector: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<ScoredId>, RetrievalError> {
        match vector {
            Some(vector) => self
                .dense
                .search(vector, limit)
                .map_err(|e| RetrievalError::Index(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Both lookups run back to back under the caller's read guard
    fn retrieve(
        &self,
        tenant: &TenantId,
        lookup: &Lookup<'_>,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let sparse = self.sparse_candidates(lookup.terms, lookup.candidates);
        let dense = self.dense_candidates(lookup.vector, lookup.candidates)?;

        let mut fused = fuse(&sparse, &dense, lookup.k, &lookup.fusion);
        if let Some(min_score) = lookup.min_score {
            fused.retain(|hit| hit.score >= min_score);
        }
        debug!(
            "Corpus {}: {} sparse, {} dense candidates, {} fused",
            tenant,
            sparse.len(),
            dense.len(),
            fused.len()
        );

        fused
            .into_iter()
            .map(|hit| {
                let stored = self.chunks.get(&hit.id).ok_or_else(|| {
                    RetrievalError::IndexCorruption {
                        tenant: tenant.clone(),
                        detail: format!("{} is indexed but has no stored chunk", hit.id),
                    }
                })?;
                let chunk = &stored.chunk;
                let document = self.documents.get(&chunk.document_id).ok_or_else(|| {
                    RetrievalError::IndexCorruption {
                        tenant: tenant.clone(),
                        detail: format!("{} belongs to missing {}", chunk.id, chunk.document_id),
                    }
                })?;

                Ok(RetrievedPassage {
                    chunk_id: chunk.id,
                    text: chunk.text.clone(),
                    source_citation: SourceCitation {
                        document_id: document.id,
                        filename: document.filename.clone(),
                        page: chunk.source_page,
                        position: chunk.position,
                        metadata: document.metadata.clone(),
                    },
                    fused_score: hit.score,
                    sparse_rank: hit.sparse_rank,
                    dense_rank: hit.dense_rank,
                })
            })
            .collect()
    }
}

/// All retrieval state owned by one tenant
///
/// Writers (ingestion commit, deletion) are serialized by `writer`; every
/// index mutation happens under a single `state` write guard, so readers see
/// a document's chunks in all three places or in none.
pub struct Corpus {
    tenant: TenantId,
    dimension: usize,
    writer: Mutex<()>,
    state: RwLock<CorpusState>,
}

impl Corpus {
    pub fn new(tenant: TenantId, backend: &dyn IndexBackend, dimension: usize) -> Self {
        Self {
            tenant,
            dimension,
            writer: Mutex::new(()),
            state: RwLock::new(CorpusState {
                documents: BTreeMap::new(),
                chunks: BTreeMap::new(),
                sparse: backend.sparse(),
                dense: backend.dense(dimension),
                next_document_id: 1,
                next_chunk_id: 1,
            }),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Embedding dimension fixed for the lifetime of this corpus
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Exclusive right to change this corpus's chunk set
    pub(crate) async fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// Record a newly uploaded document
    pub(crate) async fn register(
        &self,
        filename: &str,
        metadata: BTreeMap<String, String>,
    ) -> DocumentId {
        let mut state = self.state.write().await;
        let id = DocumentId(state.next_document_id);
        state.next_document_id += 1;
        state.documents.insert(
            id,
            Document::new(id, self.tenant.clone(), filename, metadata),
        );
        id
    }

    pub(crate) async fn set_status(&self, id: DocumentId, status: DocumentStatus) {
        let mut state = self.state.write().await;
        if let Some(document) = state.documents.get_mut(&id) {
            document.set_status(status);
        }
    }

    pub(crate) async fn set_page_count(&self, id: DocumentId, page_count: usize) {
        let mut state = self.state.write().await;
        if let Some(document) = state.documents.get_mut(&id) {
            document.page_count = page_count;
        }
    }

    /// Move a document to Failed unless it already reached a terminal state
    pub(crate) async fn mark_failed(&self, id: DocumentId, reason: &str) {
        let mut state = self.state.write().await;
        if let Some(document) = state.documents.get_mut(&id) {
            if !document.status.is_terminal() {
                document.set_status(DocumentStatus::Failed(reason.to_string()));
            }
        }
    }

    /// Make a document's chunks visible in both indexes and mark it Indexed
    ///
    /// Caller must hold the writer lock. Nothing is visible unless every
    /// chunk lands in both indexes.
    pub(crate) async fn commit(
        &self,
        document_id: DocumentId,
        drafts: Vec<ChunkDraft>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize, RetrievalError> {
        if drafts.len() != vectors.len() {
            return Err(RetrievalError::Index(format!(
                "{} chunks but {} embeddings",
                drafts.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            }
            .into());
        }

        let mut state = self.state.write().await;
        match state.documents.get(&document_id) {
            Some(document) if !document.status.is_terminal() => {}
            _ => {
                return Err(RetrievalError::NotFound {
                    tenant: self.tenant.clone(),
                    document: document_id,
                })
            }
        }

        let count = drafts.len();
        let mut inserted = Vec::with_capacity(count);
        let mut failure = None;

        for (draft, vector) in drafts.into_iter().zip(vectors) {
            let id = ChunkId(state.next_chunk_id);
            state.next_chunk_id += 1;

            let stored = StoredChunk {
                chunk: Chunk {
                    id,
                    document_id,
                    tenant_id: self.tenant.clone(),
                    text: draft.text,
                    position: draft.position,
                    token_count: draft.token_count,
                    source_page: draft.source_page,
                },
                embedding: Embedding {
                    chunk_id: id,
                    vector,
                },
            };

            match state.insert_chunk(stored) {
                Ok(()) => inserted.push(id),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            error!(
                "Commit of {} into corpus {} failed, rolling back: {}",
                document_id, self.tenant, e
            );
            for id in &inserted {
                state.chunks.remove(id);
            }
            state.rebuild_indexes()?;
            return Err(e);
        }

        if let Some(document) = state.documents.get_mut(&document_id) {
            document.set_status(DocumentStatus::Indexed);
        }

        info!(
            "Committed {} chunks for {} into corpus {}",
            count, document_id, self.tenant
        );
        Ok(count)
    }

    /// Remove a document and all of its chunks in one step
    pub async fn delete(&self, document_id: DocumentId) -> Result<usize, RetrievalError> {
        let _writer = self.lock_writer().await;
        let mut state = self.state.write().await;

        if state.documents.remove(&document_id).is_none() {
            return Err(RetrievalError::NotFound {
                tenant: self.tenant.clone(),
                document: document_id,
            });
        }

        let ids: Vec<ChunkId> = state
            .chunks
            .values()
            .filter(|stored| stored.chunk.document_id == document_id)
            .map(|stored| stored.chunk.id)
            .collect();

        for id in &ids {
            state.chunks.remove(id);
            state.sparse.remove(*id);
            state.dense.remove(*id);
        }

        info!(
            "Deleted {} ({} chunks) from corpus {}",
            document_id,
            ids.len(),
            self.tenant
        );
        Ok(ids.len())
    }

    /// Rank chunks for a lookup against one consistent view of the corpus
    ///
    /// An index that drifted from the authoritative chunk set is rebuilt
    /// before results are served.
    pub(crate) async fn retrieve(
        &self,
        lookup: &Lookup<'_>,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        {
            let state = self.state.read().await;
            if state.chunks.is_empty() {
                return Err(RetrievalError::NoContent {
                    tenant: self.tenant.clone(),
                });
            }
            if state.is_consistent() {
                return state.retrieve(&self.tenant, lookup);
            }
        }

        error!(
            "Corpus {} indexes disagree with stored chunks; rebuilding before serving",
            self.tenant
        );
        self.rebuild().await?;

        let state = self.state.read().await;
        if state.chunks.is_empty() {
            return Err(RetrievalError::NoContent {
                tenant: self.tenant.clone(),
            });
        }
        state.retrieve(&self.tenant, lookup)
    }

    /// Reconstruct both indexes from the authoritative chunk set
    pub async fn rebuild(&self) -> Result<usize, RetrievalError> {
        let mut state = self.state.write().await;
        let count = state.rebuild_indexes()?;
        info!("Rebuilt corpus {} indexes from {} chunks", self.tenant, count);
        Ok(count)
    }

    /// Compare the id sets of both indexes against the authoritative chunks
    pub async fn verify(&self) -> Result<(), RetrievalError> {
        let state = self.state.read().await;
        let authoritative: BTreeSet<ChunkId> = state.chunks.keys().copied().collect();

        for (name, ids) in [("sparse", state.sparse.ids()), ("dense", state.dense.ids())] {
            if ids != authoritative {
                let missing = authoritative.difference(&ids).count();
                let extra = ids.difference(&authoritative).count();
                return Err(RetrievalError::IndexCorruption {
                    tenant: self.tenant.clone(),
                    detail: format!(
                        "{} index is missing {} chunks and has {} unknown chunks",
                        name, missing, extra
                    ),
                });
            }
        }

        Ok(())
    }

    /// Purge tombstoned vectors from the dense index
    pub async fn compact(&self) -> usize {
        let mut state = self.state.write().await;
        state.dense.compact()
    }

    pub async fn stats(&self) -> CorpusStats {
        let state = self.state.read().await;
        let mut stats = CorpusStats {
            chunk_count: state.chunks.len(),
            ..CorpusStats::default()
        };
        for document in state.documents.values() {
            match document.status {
                DocumentStatus::Indexed => stats.document_count += 1,
                DocumentStatus::Failed(_) => stats.failed_document_count += 1,
                _ => {}
            }
        }
        stats
    }

    pub async fn document(&self, id: DocumentId) -> Option<Document> {
        self.state.read().await.documents.get(&id).cloned()
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.state.read().await.documents.values().cloned().collect()
    }

    /// Stored chunks of one document in position order
    pub async fn chunks_of(&self, document_id: DocumentId) -> Vec<Chunk> {
        let state = self.state.read().await;
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|stored| stored.chunk.document_id == document_id)
            .map(|stored| stored.chunk.clone())
            .collect();
        chunks.sort_by_key(|chunk| chunk.position);
        chunks
    }

    #[cfg(test)]
    async fn drop_from_sparse(&self, id: ChunkId) {
        self.state.write().await.sparse.remove(id);
    }

    #[cfg(test)]
    async fn insert_into_sparse(&self, id: ChunkId, text: &str) {
        let mut state = self.state.write().await;
        let _ = state.sparse.insert(id, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DenseConfig, SparseConfig};
    use crate::index::DefaultIndexBackend;
    use crate::tokenizer::{AnalyzerTokenizer, Tokenizer};
    use std::sync::Arc;

    fn corpus() -> Corpus {
        let backend = DefaultIndexBackend::new(
            SparseConfig::default(),
            DenseConfig::default(),
            Arc::new(AnalyzerTokenizer::new()),
        );
        Corpus::new(TenantId::new("school-a"), &backend, 2)
    }

    fn draft(text: &str, position: usize) -> ChunkDraft {
        ChunkDraft {
            text: text.to_string(),
            position,
            token_count: AnalyzerTokenizer::new().count(text),
            source_page: 1,
        }
    }

    fn lookup<'a>(terms: &'a [String], vector: &'a [f32]) -> Lookup<'a> {
        Lookup {
            terms: Some(terms),
            vector: Some(vector),
            candidates: 10,
            k: 10,
            fusion: FusionConfig::new(60.0, 0.5).unwrap(),
            min_score: None,
        }
    }

    async fn ingest(corpus: &Corpus, texts: &[&str]) -> DocumentId {
        let id = corpus.register("notes.txt", BTreeMap::new()).await;
        let drafts = texts
            .iter()
            .enumerate()
            .map(|(i, t)| draft(t, i))
            .collect();
        let vectors = texts
            .iter()
            .enumerate()
            .map(|(i, _)| vec![1.0, i as f32])
            .collect();
        let _writer = corpus.lock_writer().await;
        corpus.commit(id, drafts, vectors).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_commit_marks_indexed() {
        let corpus = corpus();
        let id = ingest(&corpus, &["Mitochondria produce ATP.", "Cells divide."]).await;

        let document = corpus.document(id).await.unwrap();
        assert_eq!(document.status, DocumentStatus::Indexed);
        assert_eq!(
            corpus.stats().await,
            CorpusStats {
                document_count: 1,
                chunk_count: 2,
                failed_document_count: 0
            }
        );
        assert!(corpus.verify().await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_dimension_commits_nothing() {
        let corpus = corpus();
        let id = corpus.register("bad.txt", BTreeMap::new()).await;

        let result = corpus
            .commit(id, vec![draft("atp", 0)], vec![vec![1.0, 0.0, 0.0]])
            .await;

        assert!(matches!(result, Err(RetrievalError::Embedding(_))));
        assert_eq!(corpus.stats().await.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let corpus = corpus();
        let keep = ingest(&corpus, &["glucose"]).await;
        let gone = ingest(&corpus, &["atp synthase", "atp"]).await;

        assert_eq!(corpus.delete(gone).await.unwrap(), 2);
        assert!(matches!(
            corpus.delete(gone).await,
            Err(RetrievalError::NotFound { .. })
        ));

        assert_eq!(corpus.stats().await.chunk_count, 1);
        assert_eq!(corpus.chunks_of(keep).await.len(), 1);
        assert!(corpus.verify().await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_corpus_has_no_content() {
        let corpus = corpus();
        let terms = vec!["atp".to_string()];
        let result = corpus.retrieve(&lookup(&terms, &[1.0, 0.0])).await;
        assert!(matches!(result, Err(RetrievalError::NoContent { .. })));
    }

    #[tokio::test]
    async fn test_drift_detected_and_repaired() {
        let corpus = corpus();
        ingest(&corpus, &["atp synthase", "glucose"]).await;
        corpus.drop_from_sparse(ChunkId(1)).await;

        assert!(matches!(
            corpus.verify().await,
            Err(RetrievalError::IndexCorruption { .. })
        ));

        let terms = vec!["atp".to_string()];
        let passages = corpus.retrieve(&lookup(&terms, &[1.0, 0.0])).await.unwrap();
        assert_eq!(passages[0].chunk_id, ChunkId(1));
        assert_eq!(passages[0].sparse_rank, Some(1));
        assert!(corpus.verify().await.is_ok());
    }

    #[tokio::test]
    async fn test_same_size_drift_is_repaired() {
        let corpus = corpus();
        ingest(&corpus, &["atp synthase", "glucose"]).await;
        corpus.drop_from_sparse(ChunkId(1)).await;
        corpus.insert_into_sparse(ChunkId(99), "atp stray").await;

        assert_eq!(corpus.stats().await.chunk_count, 2);
        assert!(corpus.verify().await.is_err());

        let terms = vec!["atp".to_string()];
        for _ in 0..2 {
            let passages = corpus.retrieve(&lookup(&terms, &[1.0, 0.0])).await.unwrap();
            assert!(passages.iter().all(|p| p.chunk_id != ChunkId(99)));
            assert_eq!(passages[0].chunk_id, ChunkId(1));
            assert_eq!(passages[0].sparse_rank, Some(1));
            assert_eq!(passages[0].dense_rank, Some(1));
        }
        assert!(corpus.verify().await.is_ok());
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_terminal_status() {
        let corpus = corpus();
        let id = ingest(&corpus, &["atp"]).await;
        corpus.mark_failed(id, "late").await;
        assert_eq!(
            corpus.document(id).await.unwrap().status,
            DocumentStatus::Indexed
        );

        let pending = corpus.register("pending.txt", BTreeMap::new()).await;
        corpus.mark_failed(pending, "cancelled").await;
        assert_eq!(corpus.stats().await.failed_document_count, 1);
    }
}
