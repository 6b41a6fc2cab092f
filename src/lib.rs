//! Engram - dual-store memory engine for conversational AI agents
//!
//! This is the main library crate that re-exports all Engram components.

pub use engram_core as core;
pub use engram_memory as memory;
pub use engram_store as store;

// Re-export commonly used types
pub use engram_core::{
    ContextBag, EdgeKind, EpisodicLinks, EpisodicMemory, EpisodicMetadata, Error,
    ExtractionMetadata, IndexState, MemoryId, MemorySource, Result, RetryPolicy, SemanticEdges,
    SemanticMemory, SemanticMetadata,
};

pub use engram_store::{
    GraphStore, InMemoryGraphStore, InMemoryVectorStore, MemoryNode, NodeFilter, NodeKind,
    TimeRange, VectorFilter, VectorMatch, VectorMetadata, VectorStore,
};

pub use engram_memory::{
    ConceptExtractor, ContextAssembler, EmbeddingProvider, EngineConfig, ExtractionPipeline,
    ExtractionReport, MemoryContext, MemoryContextService, MemoryRepository, MemorySearchRequest,
    MemorySearchResult, MemoryStats, SearchEngine, SearchKind,
};
