//! Context-window assembly
//!
//! Builds the bounded, relevance-ordered working set handed to the
//! conversational agent: recent episodic memories for the session plus
//! semantic memories relevant to its recent content. Snapshots are
//! assembled on demand and never cached; session content changes too
//! fast to invalidate safely.

use crate::config::ContextConfig;
use crate::search::{EpisodicQuery, Scored, SearchEngine, SemanticQuery};
use chrono::{DateTime, Utc};
use engram_core::{EpisodicMemory, Result, SemanticMemory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Time span and aggregate relevance of an assembled context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindow {
    /// Oldest episodic timestamp in the window, if any
    pub span_start: Option<DateTime<Utc>>,

    /// Newest episodic timestamp in the window, if any
    pub span_end: Option<DateTime<Utc>>,

    /// Blend of episodic recency and mean semantic similarity, in [0, 1]
    pub relevance_score: f32,
}

/// A user/session's current working set of memories
///
/// Ephemeral: constructed per call, never persisted.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    pub user_id: String,
    pub session_id: String,
    pub episodic: Vec<EpisodicMemory>,
    pub semantic: Vec<Scored<SemanticMemory>>,
    pub window: ContextWindow,
    /// True when the semantic half was skipped due to a backend outage
    pub degraded: bool,
}

/// Context plus the raw semantic scores, for transparency/debugging
#[derive(Debug, Clone)]
pub struct EnhancedContext {
    pub context: MemoryContext,
    pub semantic_scores: Vec<f32>,
}

/// Assembles bounded context windows from both stores
pub struct ContextAssembler {
    search: Arc<SearchEngine>,
    config: ContextConfig,
}

impl ContextAssembler {
    /// Create an assembler over a search engine
    pub fn new(search: Arc<SearchEngine>, config: ContextConfig) -> Self {
        Self { search, config }
    }

    /// Assemble the context window for a user/session
    ///
    /// Semantic relevance is taken against the session's own recent
    /// content (the most recent few episodic contents form the query).
    pub async fn get_memory_context(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<MemoryContext> {
        let episodic = self.recent_episodic(user_id, session_id).await?;

        let query_text: String = episodic
            .iter()
            .take(self.config.query_memories)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        self.assemble(user_id, session_id, episodic, &query_text)
            .await
    }

    /// Assemble a context window around an in-flight message
    ///
    /// Like [`get_memory_context`](Self::get_memory_context), but the
    /// candidate message drives the semantic search instead of prior
    /// session content.
    pub async fn enhance_context_with_memories(
        &self,
        user_id: &str,
        session_id: &str,
        candidate_message: &str,
    ) -> Result<EnhancedContext> {
        let episodic = self.recent_episodic(user_id, session_id).await?;
        let context = self
            .assemble(user_id, session_id, episodic, candidate_message)
            .await?;
        let semantic_scores = context.semantic.iter().map(|m| m.score).collect();
        Ok(EnhancedContext {
            context,
            semantic_scores,
        })
    }

    async fn recent_episodic(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<EpisodicMemory>> {
        self.search
            .search_episodic(
                &EpisodicQuery::for_user(user_id)
                    .in_session(session_id)
                    .with_limit(self.config.max_episodic),
            )
            .await
    }

    async fn assemble(
        &self,
        user_id: &str,
        session_id: &str,
        episodic: Vec<EpisodicMemory>,
        query_text: &str,
    ) -> Result<MemoryContext> {
        let semantic = if query_text.trim().is_empty() {
            Default::default()
        } else {
            self.search
                .search_semantic(
                    &SemanticQuery::new(user_id, query_text).with_limit(self.config.max_semantic),
                )
                .await?
        };

        let now = Utc::now();
        let recency = self.recency_score(&episodic, now);
        let similarity = semantic.mean_score().clamp(0.0, 1.0);
        let relevance_score = (self.config.recency_weight * recency
            + self.config.semantic_weight * similarity)
            .clamp(0.0, 1.0);

        let window = ContextWindow {
            span_start: episodic.iter().map(|m| m.timestamp).min(),
            span_end: episodic.iter().map(|m| m.timestamp).max(),
            relevance_score,
        };

        debug!(
            "Assembled context for {}/{}: {} episodic, {} semantic, relevance {:.3}",
            user_id,
            session_id,
            episodic.len(),
            semantic.matches.len(),
            relevance_score
        );

        Ok(MemoryContext {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            episodic,
            degraded: semantic.degraded,
            semantic: semantic.matches,
            window,
        })
    }

    /// Mean exponential recency decay of the episodic set, in [0, 1]
    ///
    /// Each memory contributes 2^(-age / half_life); an empty set scores
    /// zero.
    fn recency_score(&self, episodic: &[EpisodicMemory], now: DateTime<Utc>) -> f32 {
        if episodic.is_empty() {
            return 0.0;
        }
        let half_life = self.config.recency_half_life_secs.max(1.0);
        let sum: f64 = episodic
            .iter()
            .map(|m| {
                let age_secs = (now - m.timestamp).num_milliseconds() as f64 / 1_000.0;
                (-age_secs.max(0.0) / half_life * std::f64::consts::LN_2).exp()
            })
            .sum();
        (sum / episodic.len() as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::repository::MemoryRepository;
    use chrono::Duration;
    use engram_core::RetryPolicy;
    use engram_store::{InMemoryGraphStore, InMemoryVectorStore};

    fn assembler() -> (ContextAssembler, Arc<MemoryRepository>) {
        let retry = RetryPolicy {
            initial_delay_ms: 1,
            ..Default::default()
        };
        let repository = Arc::new(MemoryRepository::new(
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(MockEmbeddingProvider::new(32)),
            retry.clone(),
        ));
        let search = Arc::new(SearchEngine::new(
            Arc::clone(&repository),
            retry,
            SearchConfig::default(),
        ));
        (
            ContextAssembler::new(search, ContextConfig::default()),
            repository,
        )
    }

    #[tokio::test]
    async fn test_empty_context() {
        let (assembler, _) = assembler();
        let context = assembler.get_memory_context("u1", "s1").await.unwrap();

        assert!(context.episodic.is_empty());
        assert!(context.semantic.is_empty());
        assert!(context.window.span_start.is_none());
        assert_eq!(context.window.relevance_score, 0.0);
    }

    #[tokio::test]
    async fn test_context_is_session_scoped_and_ordered() {
        let (assembler, repo) = assembler();
        let now = Utc::now();

        repo.store_episodic(
            EpisodicMemory::new("u1", "s1", "first").with_timestamp(now - Duration::seconds(20)),
        )
        .await
        .unwrap();
        repo.store_episodic(EpisodicMemory::new("u1", "s1", "second").with_timestamp(now))
            .await
            .unwrap();
        repo.store_episodic(EpisodicMemory::new("u1", "other", "elsewhere"))
            .await
            .unwrap();

        let context = assembler.get_memory_context("u1", "s1").await.unwrap();
        assert_eq!(context.episodic.len(), 2);
        assert_eq!(context.episodic[0].content, "second");
        assert_eq!(
            context.window.span_start.unwrap(),
            context.episodic[1].timestamp
        );
        assert_eq!(
            context.window.span_end.unwrap(),
            context.episodic[0].timestamp
        );
    }

    #[tokio::test]
    async fn test_recent_context_scores_higher_than_stale() {
        let (assembler, repo) = assembler();
        let now = Utc::now();

        repo.store_episodic(EpisodicMemory::new("u1", "fresh", "just happened").with_timestamp(now))
            .await
            .unwrap();
        repo.store_episodic(
            EpisodicMemory::new("u1", "stale", "long ago")
                .with_timestamp(now - Duration::hours(12)),
        )
        .await
        .unwrap();

        let fresh = assembler.get_memory_context("u1", "fresh").await.unwrap();
        let stale = assembler.get_memory_context("u1", "stale").await.unwrap();
        assert!(fresh.window.relevance_score > stale.window.relevance_score);
    }

    #[tokio::test]
    async fn test_context_pulls_relevant_semantic_memories() {
        let (assembler, repo) = assembler();
        repo.store_episodic(EpisodicMemory::new(
            "u1",
            "s1",
            "we discussed rust memory engine design",
        ))
        .await
        .unwrap();
        repo.store_semantic(SemanticMemory::new(
            "u1",
            "Engine",
            "rust memory engine design",
        ))
        .await
        .unwrap();
        repo.store_semantic(SemanticMemory::new("u1", "Food", "favorite pizza toppings"))
            .await
            .unwrap();

        let context = assembler.get_memory_context("u1", "s1").await.unwrap();
        assert_eq!(context.semantic.len(), 1);
        assert_eq!(context.semantic[0].item.concept, "Engine");
        assert!(!context.degraded);
    }

    #[tokio::test]
    async fn test_enhance_context_uses_candidate_message() {
        let (assembler, repo) = assembler();
        repo.store_semantic(SemanticMemory::new(
            "u1",
            "Gardening",
            "spring gardening tips roses",
        ))
        .await
        .unwrap();

        // No episodic history at all; the in-flight message drives search
        let enhanced = assembler
            .enhance_context_with_memories("u1", "s1", "spring gardening tips roses")
            .await
            .unwrap();

        assert_eq!(enhanced.context.semantic.len(), 1);
        assert_eq!(enhanced.semantic_scores.len(), 1);
        assert!(enhanced.semantic_scores[0] > 0.9);
    }

    #[test]
    fn test_recency_score_decays() {
        let (assembler, _) = assembler();
        let now = Utc::now();
        let fresh = vec![EpisodicMemory::new("u1", "s1", "x").with_timestamp(now)];
        let old = vec![
            EpisodicMemory::new("u1", "s1", "x").with_timestamp(now - Duration::hours(2)),
        ];

        let fresh_score = assembler.recency_score(&fresh, now);
        let old_score = assembler.recency_score(&old, now);

        assert!((fresh_score - 1.0).abs() < 1e-3);
        // Two half-lives at the default 1h half-life
        assert!((old_score - 0.25).abs() < 0.01);
        assert!(assembler.recency_score(&[], now) == 0.0);
    }
}
