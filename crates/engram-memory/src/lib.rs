//! Engram dual-store memory engine
//!
//! Persists two kinds of agent memory (episodic events and semantic
//! concepts), keeping them coherent across a relationship-oriented graph
//! store and a similarity-oriented vector index, and serves ranked,
//! relevance-bounded context windows to a conversational agent.
//!
//! # Components
//!
//! - [`repository::MemoryRepository`] - CRUD and relationship integrity
//!   over both stores
//! - [`search::SearchEngine`] - episodic filter search, semantic vector
//!   search, hybrid merge
//! - [`context::ContextAssembler`] - bounded, relevance-ordered context
//!   windows
//! - [`extraction::ExtractionPipeline`] - background promotion of events
//!   into deduplicated concepts
//! - [`service::MemoryContextService`] - the façade composing the above
//!
//! # Degraded modes
//!
//! The graph is the source of truth; the vector index is secondary and
//! rebuildable. Vector outages degrade results (empty semantic matches,
//! `pending-index` writes) instead of failing calls.

pub mod config;
pub mod context;
pub mod embeddings;
pub mod extraction;
pub mod reasoning;
pub mod repository;
pub mod search;
pub mod service;

pub use config::{ContextConfig, EngineConfig, ExtractionConfig, SearchConfig};
pub use context::{ContextAssembler, ContextWindow, EnhancedContext, MemoryContext};
pub use embeddings::{EmbeddingConfig, EmbeddingProvider, MockEmbeddingProvider, create_embedder};
pub use extraction::{ExtractionPipeline, ExtractionReport, ExtractionStats, RunState};
pub use reasoning::{CandidateRelation, ConceptCandidate, ConceptExtractor, MockConceptExtractor};
pub use repository::{
    ClearReport, EpisodicPatch, MemoryRepository, MemoryStats, SemanticPatch, StoredSemantic,
};
pub use search::{
    EpisodicQuery, MemorySearchResult, Scored, SearchEngine, SemanticMatches, SemanticQuery,
};
pub use service::{MemoryContextService, MemorySearchRequest, SearchKind};
