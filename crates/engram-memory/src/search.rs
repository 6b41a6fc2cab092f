//! Search over both stores: episodic filter search, semantic vector
//! search, and the hybrid merge
//!
//! Episodic and semantic scores live on different scales, so the merged
//! result keeps them apart; weighting across kinds is the caller's call.

use crate::config::SearchConfig;
use crate::repository::MemoryRepository;
use engram_core::{EpisodicMemory, Error, Result, RetryPolicy, SemanticMemory};
use engram_store::{NodeFilter, TimeRange, VectorFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// An item with its relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

impl<T> Scored<T> {
    pub fn new(item: T, score: f32) -> Self {
        Self { item, score }
    }
}

/// Graph-side filter query over episodic memories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodicQuery {
    pub user_id: String,
    pub session_id: Option<String>,
    pub time_range: Option<TimeRange>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<(f32, f32)>,
    pub limit: Option<usize>,
}

impl EpisodicQuery {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    pub fn in_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_importance(mut self, min: f32, max: f32) -> Self {
        self.importance = Some((min, max));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Vector-side similarity query over semantic memories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticQuery {
    pub user_id: String,
    pub query: String,
    pub categories: Option<Vec<String>>,
    pub threshold: Option<f32>,
    pub limit: Option<usize>,
}

impl SemanticQuery {
    pub fn new(user_id: &str, query: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            query: query.to_string(),
            ..Default::default()
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Semantic matches plus the degraded-mode flag
#[derive(Debug, Clone, Default)]
pub struct SemanticMatches {
    pub matches: Vec<Scored<SemanticMemory>>,
    /// True when the vector side was skipped because a backend was
    /// unreachable; the call still succeeds
    pub degraded: bool,
}

impl SemanticMatches {
    fn degraded() -> Self {
        Self {
            matches: Vec::new(),
            degraded: true,
        }
    }

    /// Mean similarity of the matches, 0 when empty
    pub fn mean_score(&self) -> f32 {
        if self.matches.is_empty() {
            return 0.0;
        }
        self.matches.iter().map(|m| m.score).sum::<f32>() / self.matches.len() as f32
    }
}

/// Merged result of a hybrid search
///
/// Episodic entries are ordered newest-first; semantic matches carry
/// cosine scores. The two orderings are separate score spaces and are
/// never interleaved into one ranking.
#[derive(Debug, Clone, Default)]
pub struct MemorySearchResult {
    pub episodic: Vec<EpisodicMemory>,
    pub semantic: Vec<Scored<SemanticMemory>>,
    pub degraded: bool,
}

/// Search engine over both stores
pub struct SearchEngine {
    repository: Arc<MemoryRepository>,
    retry: RetryPolicy,
    config: SearchConfig,
}

impl SearchEngine {
    /// Create a search engine over a repository
    pub fn new(repository: Arc<MemoryRepository>, retry: RetryPolicy, config: SearchConfig) -> Self {
        Self {
            repository,
            retry,
            config,
        }
    }

    /// Episodic filter search, newest first, bounded by the limit
    pub async fn search_episodic(&self, query: &EpisodicQuery) -> Result<Vec<EpisodicMemory>> {
        if query.user_id.is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }

        let mut filter = NodeFilter::episodic(&query.user_id);
        filter.session_id = query.session_id.clone();
        filter.time_range = query.time_range;
        filter.tags = query.tags.clone();
        filter.importance = query.importance;

        let nodes = self
            .retry
            .run("graph.query", || self.repository.graph().query(&filter))
            .await?;

        let mut memories: Vec<EpisodicMemory> = nodes
            .into_iter()
            .filter_map(|n| n.into_episodic().ok())
            .collect();
        memories.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        memories.truncate(query.limit.unwrap_or(self.config.default_limit));

        debug!(
            "Episodic search for {} returned {} memories",
            query.user_id,
            memories.len()
        );
        Ok(memories)
    }

    /// Semantic similarity search
    ///
    /// Embeds the query text and asks the vector store for neighbors above
    /// the threshold. An unreachable vector backend (or embedder) yields
    /// an empty, degraded result instead of an error.
    pub async fn search_semantic(&self, query: &SemanticQuery) -> Result<SemanticMatches> {
        if query.user_id.is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }
        let threshold = query.threshold.unwrap_or(self.config.default_threshold);
        let limit = query.limit.unwrap_or(self.config.default_limit);

        let text = query.query.clone();
        let embedded = self
            .retry
            .run("embedder.embed", || async {
                self.repository
                    .embedder()
                    .embed(&text)
                    .await
                    .map_err(Error::from)
            })
            .await;
        let vector = match embedded {
            Ok(v) => v,
            Err(e) if e.is_retryable() => {
                warn!("Semantic search degraded, embedder unreachable: {}", e);
                return Ok(SemanticMatches::degraded());
            }
            Err(e) => return Err(e),
        };

        let mut vector_filter = VectorFilter::for_user(&query.user_id);
        vector_filter.categories = query.categories.clone();

        let found = self
            .retry
            .run("vectors.query", || {
                self.repository
                    .vectors()
                    .query(&vector, limit, &vector_filter, threshold)
            })
            .await;
        let found = match found {
            Ok(matches) => matches,
            Err(e) if e.is_retryable() => {
                warn!("Semantic search degraded, vector store unreachable: {}", e);
                return Ok(SemanticMatches::degraded());
            }
            Err(e) => return Err(e),
        };

        let mut matches = Vec::with_capacity(found.len());
        for m in found {
            // A stale vector entry whose node is gone is silently skipped
            if let Some(memory) = self.repository.get_semantic(&query.user_id, m.id).await? {
                matches.push(Scored::new(memory, m.score));
            }
        }
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            "Semantic search for {} returned {} matches (threshold {})",
            query.user_id,
            matches.len(),
            threshold
        );
        Ok(SemanticMatches {
            matches,
            degraded: false,
        })
    }

    /// Run both searches concurrently and merge without interleaving
    pub async fn search_both(
        &self,
        episodic: &EpisodicQuery,
        semantic: &SemanticQuery,
    ) -> Result<MemorySearchResult> {
        let (episodic_result, semantic_result) = tokio::join!(
            self.search_episodic(episodic),
            self.search_semantic(semantic),
        );
        let episodic = episodic_result?;
        let semantic = semantic_result?;

        Ok(MemorySearchResult {
            episodic,
            degraded: semantic.degraded,
            semantic: semantic.matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use engram_core::MemoryId;
    use engram_store::{
        InMemoryGraphStore, InMemoryVectorStore, VectorMatch, VectorMetadata, VectorStore,
    };

    fn engine_with(vectors: Arc<dyn VectorStore>) -> (SearchEngine, Arc<MemoryRepository>) {
        let retry = RetryPolicy {
            initial_delay_ms: 1,
            ..Default::default()
        };
        let repository = Arc::new(MemoryRepository::new(
            Arc::new(InMemoryGraphStore::new()),
            vectors,
            Arc::new(MockEmbeddingProvider::new(32)),
            retry.clone(),
        ));
        (
            SearchEngine::new(Arc::clone(&repository), retry, SearchConfig::default()),
            repository,
        )
    }

    fn engine() -> (SearchEngine, Arc<MemoryRepository>) {
        engine_with(Arc::new(InMemoryVectorStore::new()))
    }

    /// Vector store that is always unreachable
    struct DownVectorStore;

    #[async_trait]
    impl VectorStore for DownVectorStore {
        async fn upsert(
            &self,
            _id: MemoryId,
            _vector: Vec<f32>,
            _meta: VectorMetadata,
        ) -> Result<()> {
            Err(Error::StoreUnavailable("vector store down".to_string()))
        }

        async fn delete(&self, _id: MemoryId) -> Result<bool> {
            Err(Error::StoreUnavailable("vector store down".to_string()))
        }

        async fn query(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _filter: &VectorFilter,
            _threshold: f32,
        ) -> Result<Vec<VectorMatch>> {
            Err(Error::StoreUnavailable("vector store down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_episodic_search_orders_newest_first() {
        let (engine, repo) = engine();
        let now = Utc::now();

        let e1 = EpisodicMemory::new("u1", "s1", "older event")
            .with_timestamp(now - Duration::seconds(10))
            .with_importance(0.9)
            .with_tags(["AI"]);
        let e2 = EpisodicMemory::new("u1", "s1", "newer event")
            .with_timestamp(now)
            .with_importance(0.2)
            .with_tags(["AI"]);
        let e1 = repo.store_episodic(e1).await.unwrap();
        let e2 = repo.store_episodic(e2).await.unwrap();

        // Tag filter is any-match: both qualify despite importance spread
        let results = engine
            .search_episodic(&EpisodicQuery::for_user("u1").with_tags(["AI"]))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, e2.id);
        assert_eq!(results[1].id, e1.id);
    }

    #[tokio::test]
    async fn test_episodic_search_respects_limit() {
        let (engine, repo) = engine();
        for i in 0..5 {
            repo.store_episodic(EpisodicMemory::new("u1", "s1", &format!("event {i}")))
                .await
                .unwrap();
        }

        let results = engine
            .search_episodic(&EpisodicQuery::for_user("u1").with_limit(3))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_semantic_search_thresholds_and_orders() {
        let (engine, repo) = engine();
        repo.store_semantic(engram_core::SemanticMemory::new(
            "u1",
            "Rust",
            "rust systems programming language",
        ))
        .await
        .unwrap();
        repo.store_semantic(engram_core::SemanticMemory::new(
            "u1",
            "Dinner",
            "pizza dinner tonight",
        ))
        .await
        .unwrap();

        let result = engine
            .search_semantic(
                &SemanticQuery::new("u1", "rust systems programming language").with_threshold(0.9),
            )
            .await
            .unwrap();

        assert!(!result.degraded);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].item.concept, "Rust");
        assert!(result.matches[0].score >= 0.9);
    }

    #[tokio::test]
    async fn test_raising_threshold_shrinks_results() {
        let (engine, repo) = engine();
        for (concept, desc) in [
            ("A", "rust memory engine internals"),
            ("B", "rust memory allocation"),
            ("C", "gardening in spring"),
        ] {
            repo.store_semantic(engram_core::SemanticMemory::new("u1", concept, desc))
                .await
                .unwrap();
        }

        let query = |threshold| {
            SemanticQuery::new("u1", "rust memory internals").with_threshold(threshold)
        };
        let loose = engine.search_semantic(&query(-1.0)).await.unwrap();
        let strict = engine.search_semantic(&query(0.5)).await.unwrap();

        assert!(strict.matches.len() <= loose.matches.len());
        assert!(strict.matches.iter().all(|m| m.score >= 0.5));
    }

    #[tokio::test]
    async fn test_semantic_search_degrades_when_vector_store_down() {
        let (engine, repo) = engine_with(Arc::new(DownVectorStore));

        // Store lands as pending-index because the vector side is down
        let stored = repo
            .store_semantic(engram_core::SemanticMemory::new("u1", "C", "desc"))
            .await
            .unwrap();
        assert!(stored.pending_index);

        let result = engine
            .search_semantic(&SemanticQuery::new("u1", "anything"))
            .await
            .unwrap();
        assert!(result.degraded);
        assert!(result.matches.is_empty());
    }

    #[tokio::test]
    async fn test_search_both_merges_without_interleaving() {
        let (engine, repo) = engine();
        repo.store_episodic(EpisodicMemory::new("u1", "s1", "talked about rust"))
            .await
            .unwrap();
        repo.store_semantic(engram_core::SemanticMemory::new(
            "u1",
            "Rust",
            "rust programming language",
        ))
        .await
        .unwrap();

        let result = engine
            .search_both(
                &EpisodicQuery::for_user("u1"),
                &SemanticQuery::new("u1", "rust programming language").with_threshold(0.5),
            )
            .await
            .unwrap();

        assert_eq!(result.episodic.len(), 1);
        assert_eq!(result.semantic.len(), 1);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn test_search_both_degraded_still_returns_episodic() {
        let (engine, repo) = engine_with(Arc::new(DownVectorStore));
        repo.store_episodic(EpisodicMemory::new("u1", "s1", "event"))
            .await
            .unwrap();

        let result = engine
            .search_both(
                &EpisodicQuery::for_user("u1"),
                &SemanticQuery::new("u1", "anything"),
            )
            .await
            .unwrap();

        assert_eq!(result.episodic.len(), 1);
        assert!(result.semantic.is_empty());
        assert!(result.degraded);
    }

    #[tokio::test]
    async fn test_empty_user_rejected() {
        let (engine, _) = engine();
        assert!(engine
            .search_episodic(&EpisodicQuery::for_user(""))
            .await
            .is_err());
        assert!(engine
            .search_semantic(&SemanticQuery::new("", "query"))
            .await
            .is_err());
    }
}
