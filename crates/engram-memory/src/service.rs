//! The memory-context service façade
//!
//! Composes the repository, search engine, context assembler, and
//! extraction pipeline behind one explicitly constructed object. The
//! service owns the store and provider handles it is given; there is no
//! ambient global state.

use crate::config::EngineConfig;
use crate::context::{ContextAssembler, EnhancedContext, MemoryContext};
use crate::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
use crate::extraction::{ExtractionPipeline, ExtractionReport, ExtractionStats, RunState};
use crate::reasoning::{ConceptExtractor, MockConceptExtractor};
use crate::repository::{
    ClearReport, EpisodicPatch, MemoryRepository, MemoryStats, SemanticPatch, StoredSemantic,
};
use crate::search::{EpisodicQuery, MemorySearchResult, SearchEngine, SemanticQuery};
use engram_core::{EpisodicMemory, Error, MemoryId, Result, SemanticMemory};
use engram_store::{
    GraphStore, InMemoryGraphStore, InMemoryVectorStore, MemoryNode, TimeRange, VectorStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Which memory kinds a search request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Episodic,
    Semantic,
    Both,
}

/// A combined search request over one or both memory kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySearchRequest {
    pub user_id: String,
    pub kind: SearchKind,
    /// Query text; required when the semantic side is searched
    pub query: Option<String>,
    pub session_id: Option<String>,
    pub time_range: Option<TimeRange>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<(f32, f32)>,
    pub categories: Option<Vec<String>>,
    pub threshold: Option<f32>,
    pub limit: Option<usize>,
}

impl MemorySearchRequest {
    pub fn episodic(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind: SearchKind::Episodic,
            query: None,
            session_id: None,
            time_range: None,
            tags: None,
            importance: None,
            categories: None,
            threshold: None,
            limit: None,
        }
    }

    pub fn semantic(user_id: &str, query: &str) -> Self {
        Self {
            kind: SearchKind::Semantic,
            query: Some(query.to_string()),
            ..Self::episodic(user_id)
        }
    }

    pub fn both(user_id: &str, query: &str) -> Self {
        Self {
            kind: SearchKind::Both,
            query: Some(query.to_string()),
            ..Self::episodic(user_id)
        }
    }

    fn episodic_query(&self) -> EpisodicQuery {
        EpisodicQuery {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            time_range: self.time_range,
            tags: self.tags.clone(),
            importance: self.importance,
            limit: self.limit,
        }
    }

    fn semantic_query(&self) -> Result<SemanticQuery> {
        let query = self.query.clone().ok_or_else(|| {
            Error::Validation("semantic search requires query text".to_string())
        })?;
        Ok(SemanticQuery {
            user_id: self.user_id.clone(),
            query,
            categories: self.categories.clone(),
            threshold: self.threshold,
            limit: self.limit,
        })
    }
}

/// The public boundary of the memory engine
///
/// All callers (chat handler, HTTP layer) go through this façade; no
/// persisted format is owned here, persistence is delegated entirely to
/// the stores.
pub struct MemoryContextService {
    repository: Arc<MemoryRepository>,
    search: Arc<SearchEngine>,
    assembler: ContextAssembler,
    pipeline: ExtractionPipeline,
}

impl MemoryContextService {
    /// Compose a service over the given stores and collaborators
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn ConceptExtractor>,
        config: EngineConfig,
    ) -> Self {
        let repository = Arc::new(MemoryRepository::new(
            graph,
            vectors,
            embedder,
            config.retry.clone(),
        ));
        let search = Arc::new(SearchEngine::new(
            Arc::clone(&repository),
            config.retry.clone(),
            config.search.clone(),
        ));
        let assembler = ContextAssembler::new(Arc::clone(&search), config.context.clone());
        let pipeline = ExtractionPipeline::new(
            Arc::clone(&repository),
            Arc::clone(&search),
            extractor,
            config.retry.clone(),
            config.extraction.clone(),
        );

        info!(
            "Memory context service ready ({}-dim embeddings)",
            repository.embedding_dimension()
        );
        Self {
            repository,
            search,
            assembler,
            pipeline,
        }
    }

    /// Service over in-memory stores and mock collaborators
    ///
    /// Useful for tests and embedded deployments without external
    /// backends.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(MockEmbeddingProvider::new(384)),
            Arc::new(MockConceptExtractor::default()),
            config,
        )
    }

    /// The underlying repository, for advanced callers
    pub fn repository(&self) -> &Arc<MemoryRepository> {
        &self.repository
    }

    // ========== Episodic Memory ==========

    /// Store an episodic memory
    pub async fn store_episodic(&self, memory: EpisodicMemory) -> Result<EpisodicMemory> {
        self.repository.store_episodic(memory).await
    }

    /// Fetch an episodic memory
    pub async fn get_episodic(&self, user_id: &str, id: MemoryId) -> Result<Option<EpisodicMemory>> {
        self.repository.get_episodic(user_id, id).await
    }

    /// Patch an episodic memory's metadata or chain links
    pub async fn update_episodic(
        &self,
        user_id: &str,
        id: MemoryId,
        patch: EpisodicPatch,
    ) -> Result<EpisodicMemory> {
        self.repository.update_episodic(user_id, id, patch).await
    }

    // ========== Semantic Memory ==========

    /// Store a semantic memory (user-asserted knowledge)
    pub async fn store_semantic(&self, memory: SemanticMemory) -> Result<StoredSemantic> {
        self.repository.store_semantic(memory).await
    }

    /// Fetch a semantic memory, recording the access
    pub async fn get_semantic(&self, user_id: &str, id: MemoryId) -> Result<Option<SemanticMemory>> {
        self.repository.get_semantic(user_id, id).await
    }

    /// Patch a semantic memory
    pub async fn update_semantic(
        &self,
        user_id: &str,
        id: MemoryId,
        patch: SemanticPatch,
    ) -> Result<StoredSemantic> {
        self.repository.update_semantic(user_id, id, patch).await
    }

    // ========== Shared Operations ==========

    /// Delete a memory of either kind
    pub async fn delete_memory(&self, user_id: &str, id: MemoryId) -> Result<bool> {
        self.repository.delete_memory(user_id, id).await
    }

    /// Every memory referenced by the given memory's relationships
    pub async fn get_related_memories(
        &self,
        user_id: &str,
        id: MemoryId,
    ) -> Result<Vec<MemoryNode>> {
        self.repository.get_related(user_id, id).await
    }

    /// Search one or both memory kinds
    pub async fn search_memories(
        &self,
        request: &MemorySearchRequest,
    ) -> Result<MemorySearchResult> {
        match request.kind {
            SearchKind::Episodic => {
                let episodic = self.search.search_episodic(&request.episodic_query()).await?;
                Ok(MemorySearchResult {
                    episodic,
                    ..Default::default()
                })
            }
            SearchKind::Semantic => {
                let semantic = self.search.search_semantic(&request.semantic_query()?).await?;
                Ok(MemorySearchResult {
                    degraded: semantic.degraded,
                    semantic: semantic.matches,
                    ..Default::default()
                })
            }
            SearchKind::Both => {
                self.search
                    .search_both(&request.episodic_query(), &request.semantic_query()?)
                    .await
            }
        }
    }

    /// Assemble the context window for a user/session
    pub async fn get_memory_context(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<MemoryContext> {
        self.assembler.get_memory_context(user_id, session_id).await
    }

    /// Assemble a context window around an in-flight message
    pub async fn enhance_context_with_memories(
        &self,
        user_id: &str,
        session_id: &str,
        candidate_message: &str,
    ) -> Result<EnhancedContext> {
        self.assembler
            .enhance_context_with_memories(user_id, session_id, candidate_message)
            .await
    }

    /// Best-effort cascading delete of everything a user owns
    pub async fn clear_user_memories(&self, user_id: &str) -> Result<ClearReport> {
        self.repository.clear_user_memories(user_id).await
    }

    /// Per-user memory counts
    pub async fn get_memory_stats(&self, user_id: &str) -> Result<MemoryStats> {
        self.repository.stats(user_id).await
    }

    /// Retry vector writes for memories stuck in pending-index
    pub async fn reindex_pending(&self, user_id: &str) -> Result<usize> {
        self.repository.reindex_pending(user_id).await
    }

    // ========== Extraction ==========

    /// Run one extraction pass, promoting episodic memories to concepts
    pub async fn extract_semantic_from_episodic(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<ExtractionReport> {
        self.pipeline
            .run(user_id, session_id, &CancellationToken::new())
            .await
    }

    /// Like [`extract_semantic_from_episodic`](Self::extract_semantic_from_episodic),
    /// with caller-controlled cancellation
    pub async fn extract_with_cancellation(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExtractionReport> {
        self.pipeline.run(user_id, session_id, cancel).await
    }

    /// Cumulative extraction statistics
    pub async fn get_semantic_extraction_stats(&self) -> ExtractionStats {
        self.pipeline.stats().await
    }

    /// Current extraction run state
    pub async fn extraction_state(&self) -> RunState {
        self.pipeline.state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MemoryContextService {
        MemoryContextService::in_memory(EngineConfig::default())
    }

    #[tokio::test]
    async fn test_store_search_roundtrip() {
        let service = service();
        service
            .store_episodic(EpisodicMemory::new("u1", "s1", "talked about rust lifetimes"))
            .await
            .unwrap();
        service
            .store_semantic(SemanticMemory::new(
                "u1",
                "Lifetimes",
                "rust lifetimes and borrowing",
            ))
            .await
            .unwrap();

        let result = service
            .search_memories(&MemorySearchRequest::both("u1", "rust lifetimes and borrowing"))
            .await
            .unwrap();

        assert_eq!(result.episodic.len(), 1);
        assert_eq!(result.semantic.len(), 1);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn test_semantic_request_without_query_rejected() {
        let service = service();
        let mut request = MemorySearchRequest::episodic("u1");
        request.kind = SearchKind::Semantic;
        assert!(service.search_memories(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_episodic_kind_skips_semantic_side() {
        let service = service();
        service
            .store_semantic(SemanticMemory::new("u1", "C", "some concept"))
            .await
            .unwrap();

        let result = service
            .search_memories(&MemorySearchRequest::episodic("u1"))
            .await
            .unwrap();
        assert!(result.semantic.is_empty());
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn test_clear_then_stats_reports_zero() {
        let service = service();
        service
            .store_episodic(EpisodicMemory::new("u1", "s1", "an event"))
            .await
            .unwrap();
        service
            .store_semantic(SemanticMemory::new("u1", "C", "a concept"))
            .await
            .unwrap();

        service.clear_user_memories("u1").await.unwrap();

        let stats = service.get_memory_stats("u1").await.unwrap();
        assert_eq!(stats.episodic_count, 0);
        assert_eq!(stats.semantic_count, 0);
    }

    #[tokio::test]
    async fn test_extraction_through_facade() {
        let service = service();
        service
            .store_episodic(EpisodicMemory::new(
                "u1",
                "s1",
                "deep discussion about database indexing strategies",
            ))
            .await
            .unwrap();

        let report = service
            .extract_semantic_from_episodic("u1", None)
            .await
            .unwrap();
        assert_eq!(report.concepts_extracted, 1);

        let stats = service.get_semantic_extraction_stats().await;
        assert_eq!(stats.total_runs, 1);
        assert_eq!(stats.total_concepts_extracted, 1);
        assert_eq!(service.extraction_state().await, RunState::Idle);
    }

    #[tokio::test]
    async fn test_context_through_facade() {
        let service = service();
        service
            .store_episodic(EpisodicMemory::new("u1", "s1", "planning the garden layout"))
            .await
            .unwrap();

        let context = service.get_memory_context("u1", "s1").await.unwrap();
        assert_eq!(context.episodic.len(), 1);
        assert!(context.window.relevance_score > 0.0);

        let enhanced = service
            .enhance_context_with_memories("u1", "s1", "garden layout")
            .await
            .unwrap();
        assert_eq!(enhanced.context.episodic.len(), 1);
    }

    #[tokio::test]
    async fn test_related_memories_through_facade() {
        let service = service();
        let a = service
            .store_episodic(EpisodicMemory::new("u1", "s1", "first"))
            .await
            .unwrap();
        let b = service
            .store_episodic(EpisodicMemory::new("u1", "s1", "second").with_previous(a.id))
            .await
            .unwrap();

        let related = service.get_related_memories("u1", a.id).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id(), b.id);
    }
}
