//! Engine configuration
//!
//! Policy knobs (thresholds, weights, batch sizes) live here as
//! configuration, never hard-coded at use sites.

use engram_core::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for the search engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Cap applied when a query does not set its own limit
    pub default_limit: usize,

    /// Minimum cosine similarity for semantic matches
    pub default_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            default_threshold: 0.7,
        }
    }
}

/// Configuration for context-window assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Most recent episodic memories fetched per context
    pub max_episodic: usize,

    /// Most recent episodic contents concatenated into the semantic query
    pub query_memories: usize,

    /// Semantic matches retrieved per context
    pub max_semantic: usize,

    /// Weight of episodic recency in the window relevance score
    pub recency_weight: f32,

    /// Weight of mean semantic similarity in the window relevance score
    pub semantic_weight: f32,

    /// Half-life of the episodic recency decay, in seconds
    pub recency_half_life_secs: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_episodic: 50,
            query_memories: 5,
            max_semantic: 10,
            recency_weight: 0.6,
            semantic_weight: 0.4,
            recency_half_life_secs: 3_600.0,
        }
    }
}

/// Configuration for the extraction pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Episodic memories collected per run
    pub batch_size: usize,

    /// Candidates below this confidence are dropped
    pub min_confidence: f32,

    /// Candidates retained per source memory
    pub max_concepts_per_memory: usize,

    /// Similarity above which a candidate merges into an existing concept
    /// instead of creating a new one; higher than the search threshold
    pub merge_threshold: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            min_confidence: 0.5,
            max_concepts_per_memory: 3,
            merge_threshold: 0.9,
        }
    }
}

/// Aggregate configuration for the whole engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub search: SearchConfig,
    pub context: ContextConfig,
    pub extraction: ExtractionConfig,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Builder: set the semantic search threshold
    pub fn search_threshold(mut self, threshold: f32) -> Self {
        self.search.default_threshold = threshold;
        self
    }

    /// Builder: set the dedup merge threshold
    pub fn merge_threshold(mut self, threshold: f32) -> Self {
        self.extraction.merge_threshold = threshold;
        self
    }

    /// Builder: set the relevance weighting
    pub fn relevance_weights(mut self, recency: f32, semantic: f32) -> Self {
        self.context.recency_weight = recency;
        self.context.semantic_weight = semantic;
        self
    }

    /// Builder: set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
