//! Memory repository: CRUD and relationship integrity over both stores
//!
//! The repository is the only writer of relationship links. Temporal-chain
//! rewrites are serialized per (user, session) through a keyed mutex, and
//! the graph node is always the source of truth; the vector entry is a
//! secondary index that may lag behind (`PendingIndex`).

use crate::embeddings::EmbeddingProvider;
use engram_core::{
    EdgeKind, EpisodicMemory, Error, ExtractionMetadata, IndexState, KeyedMutex, MemoryId,
    Result, RetryPolicy, SemanticMemory,
};
use engram_store::{GraphStore, MemoryNode, NodeFilter, NodeKind, VectorMetadata, VectorStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of storing or updating a semantic memory
///
/// `pending_index` signals a degraded (but successful) write: the graph
/// node landed, the vector entry did not.
#[derive(Debug, Clone)]
pub struct StoredSemantic {
    pub memory: SemanticMemory,
    pub pending_index: bool,
}

/// Outcome of a best-effort cascading delete
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearReport {
    pub episodic_deleted: usize,
    pub semantic_deleted: usize,
    pub failures: usize,
}

/// Per-user memory counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub episodic_count: usize,
    pub semantic_count: usize,
    pub pending_index_count: usize,
}

/// Patch for an episodic memory
///
/// Outer `None` leaves a field unchanged; for the chain links the inner
/// `Option` distinguishes relinking from unlinking.
#[derive(Debug, Clone, Default)]
pub struct EpisodicPatch {
    pub importance: Option<f32>,
    pub tags: Option<Vec<String>>,
    pub location: Option<String>,
    pub participants: Option<Vec<String>>,
    pub context: Option<engram_core::ContextBag>,
    pub previous: Option<Option<MemoryId>>,
    pub next: Option<Option<MemoryId>>,
}

impl EpisodicPatch {
    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn link_previous(mut self, previous: MemoryId) -> Self {
        self.previous = Some(Some(previous));
        self
    }

    pub fn unlink_previous(mut self) -> Self {
        self.previous = Some(None);
        self
    }

    pub fn link_next(mut self, next: MemoryId) -> Self {
        self.next = Some(Some(next));
        self
    }

    pub fn unlink_next(mut self) -> Self {
        self.next = Some(None);
        self
    }
}

/// Patch for a semantic memory
#[derive(Debug, Clone, Default)]
pub struct SemanticPatch {
    pub concept: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub confidence: Option<f32>,
}

impl SemanticPatch {
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
}

/// CRUD and relationship-integrity logic over the two stores
pub struct MemoryRepository {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    chain_locks: KeyedMutex,
}

impl MemoryRepository {
    /// Create a repository over the given stores and embedding provider
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedder,
            retry,
            chain_locks: KeyedMutex::new(),
        }
    }

    /// The configured embedding dimension
    pub fn embedding_dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub(crate) fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub(crate) fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub(crate) fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    // ========== Episodic Memory ==========

    /// Store an episodic memory, maintaining the session chain
    ///
    /// If `links.previous` or `links.next` are set, the referenced
    /// memories' opposite slots are rewritten to point back. Link
    /// rewrites for one (user, session) never race each other.
    pub async fn store_episodic(&self, memory: EpisodicMemory) -> Result<EpisodicMemory> {
        memory.validate()?;

        let has_links = memory.links.previous.is_some()
            || memory.links.next.is_some()
            || !memory.links.related.is_empty();

        let _guard = if has_links {
            let key = KeyedMutex::session_key(&memory.user_id, &memory.session_id);
            Some(self.chain_locks.lock(&key).await)
        } else {
            None
        };

        // Verify every referenced target before any write
        if let Some(prev) = memory.links.previous {
            self.verify_chain_target(&memory, prev).await?;
        }
        if let Some(next) = memory.links.next {
            self.verify_chain_target(&memory, next).await?;
        }
        for related in &memory.links.related {
            self.fetch_episodic(&memory.user_id, *related).await?;
        }

        let node = MemoryNode::Episodic(memory.clone());
        self.retry
            .run("graph.create_node", || {
                self.graph.create_node(node.clone())
            })
            .await?;

        // Rewrite the neighbors' opposite slots to point back
        if let Some(prev) = memory.links.previous {
            self.retry
                .run("graph.create_edge", || {
                    self.graph
                        .create_edge(&memory.user_id, prev, memory.id, EdgeKind::Next)
                })
                .await?;
        }
        if let Some(next) = memory.links.next {
            self.retry
                .run("graph.create_edge", || {
                    self.graph
                        .create_edge(&memory.user_id, next, memory.id, EdgeKind::Previous)
                })
                .await?;
        }
        for related in memory.links.related.clone() {
            self.retry
                .run("graph.create_edge", || {
                    self.graph
                        .create_edge(&memory.user_id, related, memory.id, EdgeKind::Related)
                })
                .await?;
        }

        debug!("Stored episodic memory {} for user {}", memory.id, memory.user_id);
        Ok(memory)
    }

    /// Fetch an episodic memory by id
    pub async fn get_episodic(&self, user_id: &str, id: MemoryId) -> Result<Option<EpisodicMemory>> {
        let node = self
            .retry
            .run("graph.get_node", || self.graph.get_node(user_id, id))
            .await?;
        node.map(MemoryNode::into_episodic).transpose()
    }

    /// Patch an episodic memory's metadata or fix its chain links
    pub async fn update_episodic(
        &self,
        user_id: &str,
        id: MemoryId,
        patch: EpisodicPatch,
    ) -> Result<EpisodicMemory> {
        let memory = self.fetch_episodic(user_id, id).await?;

        // Serialize against chain rewrites touching this node, then
        // re-read so the patch applies to current state
        let key = KeyedMutex::session_key(user_id, &memory.session_id);
        let _guard = self.chain_locks.lock(&key).await;
        let mut memory = self.fetch_episodic(user_id, id).await?;

        if let Some(importance) = patch.importance {
            memory.metadata.importance = importance;
        }
        if let Some(tags) = patch.tags {
            memory.metadata.tags = tags;
        }
        if let Some(location) = patch.location {
            memory.metadata.location = Some(location);
        }
        if let Some(participants) = patch.participants {
            memory.metadata.participants = participants;
        }
        if let Some(context) = patch.context {
            memory.context = context;
        }
        memory.validate()?;

        if let Some(new_previous) = patch.previous {
            self.relink(&mut memory, EdgeKind::Previous, new_previous)
                .await?;
        }
        if let Some(new_next) = patch.next {
            self.relink(&mut memory, EdgeKind::Next, new_next).await?;
        }

        let node = MemoryNode::Episodic(memory.clone());
        self.retry
            .run("graph.update_node", || {
                self.graph.update_node(node.clone())
            })
            .await?;

        debug!("Updated episodic memory {}", id);
        Ok(memory)
    }

    /// Rewire one chain slot of `memory`, keeping both directions coherent
    async fn relink(
        &self,
        memory: &mut EpisodicMemory,
        slot: EdgeKind,
        new_target: Option<MemoryId>,
    ) -> Result<()> {
        let old_target = match slot {
            EdgeKind::Previous => memory.links.previous,
            EdgeKind::Next => memory.links.next,
            _ => return Err(Error::Internal(format!("relink on non-chain slot {slot:?}"))),
        };
        if old_target == new_target {
            return Ok(());
        }
        let back_slot = slot.inverse().expect("chain slots have inverses");

        // Detach the old neighbor if it still points back at us
        if let Some(old_id) = old_target {
            if let Some(mut old) = self.get_episodic(&memory.user_id, old_id).await? {
                let points_back = match back_slot {
                    EdgeKind::Previous => old.links.previous == Some(memory.id),
                    _ => old.links.next == Some(memory.id),
                };
                if points_back {
                    match back_slot {
                        EdgeKind::Previous => old.links.previous = None,
                        _ => old.links.next = None,
                    }
                    let node = MemoryNode::Episodic(old);
                    self.retry
                        .run("graph.update_node", || {
                            self.graph.update_node(node.clone())
                        })
                        .await?;
                }
            }
        }

        // Attach the new neighbor
        if let Some(new_id) = new_target {
            self.verify_chain_target(memory, new_id).await?;
            self.retry
                .run("graph.create_edge", || {
                    self.graph
                        .create_edge(&memory.user_id, new_id, memory.id, back_slot)
                })
                .await?;
        }

        match slot {
            EdgeKind::Previous => memory.links.previous = new_target,
            _ => memory.links.next = new_target,
        }
        Ok(())
    }

    // ========== Semantic Memory ==========

    /// Store a semantic memory, computing the embedding when absent
    ///
    /// The graph write must succeed; a failed vector write degrades the
    /// memory to `PendingIndex` and is reported, not raised.
    pub async fn store_semantic(&self, mut memory: SemanticMemory) -> Result<StoredSemantic> {
        memory.validate()?;

        if memory.vector.is_empty() {
            let description = memory.description.clone();
            memory.vector = self
                .retry
                .run("embedder.embed", || async {
                    self.embedder
                        .embed(&description)
                        .await
                        .map_err(Error::from)
                })
                .await?;
        }
        if memory.vector.len() != self.embedder.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.embedder.dimension(),
                got: memory.vector.len(),
            });
        }

        // Verify edge targets before any write
        for target in memory.edges.all_targets() {
            self.fetch_semantic_raw(&memory.user_id, target).await?;
        }

        memory.index_state = IndexState::Indexed;
        let node = MemoryNode::Semantic(memory.clone());
        self.retry
            .run("graph.create_node", || {
                self.graph.create_node(node.clone())
            })
            .await?;

        self.mirror_semantic_edges(&memory).await?;

        let pending_index = !self.try_index(&mut memory).await;

        debug!(
            "Stored semantic memory {} ({}) for user {}",
            memory.id, memory.concept, memory.user_id
        );
        Ok(StoredSemantic {
            memory,
            pending_index,
        })
    }

    /// Write the vector entry; on failure downgrade to `PendingIndex`
    ///
    /// Returns true if the memory is indexed.
    async fn try_index(&self, memory: &mut SemanticMemory) -> bool {
        let meta = VectorMetadata {
            user_id: memory.user_id.clone(),
            category: memory.metadata.category.clone(),
        };
        let outcome = self
            .retry
            .run("vectors.upsert", || {
                self.vectors
                    .upsert(memory.id, memory.vector.clone(), meta.clone())
            })
            .await;

        match outcome {
            Ok(()) => {
                if memory.index_state != IndexState::Indexed {
                    memory.index_state = IndexState::Indexed;
                    let node = MemoryNode::Semantic(memory.clone());
                    if let Err(e) = self.graph.update_node(node).await {
                        warn!("Failed to record index state for {}: {}", memory.id, e);
                    }
                }
                true
            }
            Err(e) => {
                warn!(
                    "Vector write failed for {}; memory degraded to pending-index: {}",
                    memory.id, e
                );
                memory.index_state = IndexState::PendingIndex;
                let node = MemoryNode::Semantic(memory.clone());
                if let Err(e) = self.graph.update_node(node).await {
                    warn!("Failed to record pending-index state for {}: {}", memory.id, e);
                }
                false
            }
        }
    }

    /// Mirror symmetric edges and write inverse slots on directed ones
    async fn mirror_semantic_edges(&self, memory: &SemanticMemory) -> Result<()> {
        for kind in [
            EdgeKind::Similar,
            EdgeKind::Related,
            EdgeKind::Parent,
            EdgeKind::Child,
            EdgeKind::Causes,
            EdgeKind::CausedBy,
            EdgeKind::PartOf,
            EdgeKind::HasPart,
            EdgeKind::Opposite,
            EdgeKind::InstanceOf,
        ] {
            let Some(back) = mirror_kind(kind) else {
                continue;
            };
            let targets = memory.edges.slot(kind).cloned().unwrap_or_default();
            for target in targets {
                self.retry
                    .run("graph.create_edge", || {
                        self.graph
                            .create_edge(&memory.user_id, target, memory.id, back)
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Fetch a semantic memory by id, recording the access
    ///
    /// Every read bumps `access_count` and `last_accessed`; the write-back
    /// is best-effort so a flaky store never fails a read.
    pub async fn get_semantic(&self, user_id: &str, id: MemoryId) -> Result<Option<SemanticMemory>> {
        let node = self
            .retry
            .run("graph.get_node", || self.graph.get_node(user_id, id))
            .await?;
        let Some(node) = node else { return Ok(None) };
        let mut memory = node.into_semantic()?;
        memory.touch();

        let node = MemoryNode::Semantic(memory.clone());
        if let Err(e) = self.graph.update_node(node).await {
            warn!("Failed to persist access tracking for {}: {}", id, e);
        }
        Ok(Some(memory))
    }

    /// Patch a semantic memory; a description change recomputes the vector
    pub async fn update_semantic(
        &self,
        user_id: &str,
        id: MemoryId,
        patch: SemanticPatch,
    ) -> Result<StoredSemantic> {
        let mut memory = self.fetch_semantic_raw(user_id, id).await?;

        let mut reembed = false;
        let mut reindex = false;
        if let Some(concept) = patch.concept {
            memory.concept = concept;
        }
        if let Some(description) = patch.description {
            if description != memory.description {
                memory.description = description;
                reembed = true;
            }
        }
        if let Some(category) = patch.category {
            if category != memory.metadata.category {
                memory.metadata.category = category;
                // Vector metadata carries the category, so rewrite the entry
                reindex = true;
            }
        }
        if let Some(confidence) = patch.confidence {
            memory.metadata.confidence = confidence;
        }
        memory.validate()?;

        if reembed {
            let description = memory.description.clone();
            memory.vector = self
                .retry
                .run("embedder.embed", || async {
                    self.embedder
                        .embed(&description)
                        .await
                        .map_err(Error::from)
                })
                .await?;
        }

        let node = MemoryNode::Semantic(memory.clone());
        self.retry
            .run("graph.update_node", || {
                self.graph.update_node(node.clone())
            })
            .await?;

        let pending_index = if reembed || reindex || memory.index_state == IndexState::PendingIndex
        {
            !self.try_index(&mut memory).await
        } else {
            false
        };

        debug!("Updated semantic memory {}", id);
        Ok(StoredSemantic {
            memory,
            pending_index,
        })
    }

    /// Merge an extraction candidate into an existing concept
    ///
    /// Appends source ids, unions keywords, raises confidence to the max
    /// of old and new. Used by the pipeline instead of creating a
    /// near-duplicate memory.
    pub async fn merge_extracted(
        &self,
        user_id: &str,
        id: MemoryId,
        extraction: &ExtractionMetadata,
        confidence: f32,
    ) -> Result<SemanticMemory> {
        let mut memory = self.fetch_semantic_raw(user_id, id).await?;

        memory.metadata.confidence = memory.metadata.confidence.max(confidence);
        match &mut memory.metadata.extraction {
            Some(existing) => existing.merge(extraction),
            None => memory.metadata.extraction = Some(extraction.clone()),
        }

        let node = MemoryNode::Semantic(memory.clone());
        self.retry
            .run("graph.update_node", || {
                self.graph.update_node(node.clone())
            })
            .await?;

        debug!("Merged extraction candidate into {}", id);
        Ok(memory)
    }

    // ========== Shared Operations ==========

    /// Add a relationship edge, applying symmetry/inverse rules
    ///
    /// Returns the number of edge slots written (1, or 2 when a mirror or
    /// inverse slot applies).
    pub async fn add_edge(
        &self,
        user_id: &str,
        from: MemoryId,
        to: MemoryId,
        kind: EdgeKind,
    ) -> Result<usize> {
        // Both endpoints must exist up front
        for id in [from, to] {
            if self
                .retry
                .run("graph.get_node", || self.graph.get_node(user_id, id))
                .await?
                .is_none()
            {
                return Err(Error::NotFound(format!("memory {id}")));
            }
        }

        self.retry
            .run("graph.create_edge", || {
                self.graph.create_edge(user_id, from, to, kind)
            })
            .await?;
        let mut written = 1;

        if let Some(back) = mirror_kind(kind) {
            self.retry
                .run("graph.create_edge", || {
                    self.graph.create_edge(user_id, to, from, back)
                })
                .await?;
            written += 1;
        }
        Ok(written)
    }

    /// Delete a memory, scrubbing edges and the vector entry first
    pub async fn delete_memory(&self, user_id: &str, id: MemoryId) -> Result<bool> {
        let node = self
            .retry
            .run("graph.get_node", || self.graph.get_node(user_id, id))
            .await?;
        let Some(node) = node else { return Ok(false) };

        // Scrub dangling references before the node goes away
        self.retry
            .run("graph.delete_edges_to", || {
                self.graph.delete_edges_to(user_id, id)
            })
            .await?;

        if node.kind() == NodeKind::Semantic {
            if let Err(e) = self
                .retry
                .run("vectors.delete", || self.vectors.delete(id))
                .await
            {
                // The node lookup on future matches will miss, so a stale
                // vector entry cannot resurface results
                warn!("Vector delete failed for {}: {}", id, e);
            }
        }

        let deleted = self
            .retry
            .run("graph.delete_node", || self.graph.delete_node(user_id, id))
            .await?;
        info!("Deleted memory {} for user {}", id, user_id);
        Ok(deleted)
    }

    /// Best-effort cascading delete of everything a user owns
    pub async fn clear_user_memories(&self, user_id: &str) -> Result<ClearReport> {
        let all_filter = NodeFilter::all(user_id);
        let nodes = self
            .retry
            .run("graph.query", || {
                self.graph.query(&all_filter)
            })
            .await?;

        let mut report = ClearReport::default();
        for node in nodes {
            let id = node.id();
            if node.kind() == NodeKind::Semantic && self.vectors.delete(id).await.is_err() {
                report.failures += 1;
            }
            match self.graph.delete_node(user_id, id).await {
                Ok(true) => match node.kind() {
                    NodeKind::Episodic => report.episodic_deleted += 1,
                    NodeKind::Semantic => report.semantic_deleted += 1,
                },
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to delete {} during clear: {}", id, e);
                    report.failures += 1;
                }
            }
        }

        info!(
            "Cleared user {}: {} episodic, {} semantic, {} failures",
            user_id, report.episodic_deleted, report.semantic_deleted, report.failures
        );
        Ok(report)
    }

    /// Every memory referenced by `id`'s relationship slots
    pub async fn get_related(&self, user_id: &str, id: MemoryId) -> Result<Vec<MemoryNode>> {
        let node = self
            .retry
            .run("graph.get_node", || self.graph.get_node(user_id, id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("memory {id}")))?;

        let targets: Vec<MemoryId> = match &node {
            MemoryNode::Episodic(m) => {
                let mut out: Vec<MemoryId> = m.links.related.clone();
                out.extend(m.links.previous);
                out.extend(m.links.next);
                out
            }
            MemoryNode::Semantic(m) => m.edges.all_targets(),
        };

        let mut related = Vec::with_capacity(targets.len());
        for target in targets {
            if let Some(node) = self
                .retry
                .run("graph.get_node", || self.graph.get_node(user_id, target))
                .await?
            {
                related.push(node);
            }
        }
        Ok(related)
    }

    /// Retry vector writes for memories stuck in `PendingIndex`
    pub async fn reindex_pending(&self, user_id: &str) -> Result<usize> {
        let semantic_filter = NodeFilter::semantic(user_id);
        let nodes = self
            .retry
            .run("graph.query", || {
                self.graph.query(&semantic_filter)
            })
            .await?;

        let mut reindexed = 0;
        for node in nodes {
            let Ok(mut memory) = node.into_semantic() else {
                continue;
            };
            if memory.index_state == IndexState::PendingIndex && self.try_index(&mut memory).await {
                reindexed += 1;
            }
        }
        if reindexed > 0 {
            info!("Reindexed {} pending memories for user {}", reindexed, user_id);
        }
        Ok(reindexed)
    }

    /// Per-user memory counts
    pub async fn stats(&self, user_id: &str) -> Result<MemoryStats> {
        let episodic_count = self
            .retry
            .run("graph.count", || {
                self.graph.count(user_id, Some(NodeKind::Episodic))
            })
            .await?;
        let stats_semantic_filter = NodeFilter::semantic(user_id);
        let semantic = self
            .retry
            .run("graph.query", || {
                self.graph.query(&stats_semantic_filter)
            })
            .await?;
        let pending_index_count = semantic
            .iter()
            .filter_map(|n| n.as_semantic())
            .filter(|m| m.index_state == IndexState::PendingIndex)
            .count();

        Ok(MemoryStats {
            episodic_count,
            semantic_count: semantic.len(),
            pending_index_count,
        })
    }

    // ========== Private Helpers ==========

    async fn fetch_episodic(&self, user_id: &str, id: MemoryId) -> Result<EpisodicMemory> {
        self.get_episodic(user_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("episodic memory {id}")))
    }

    /// Fetch without access tracking (internal writes)
    async fn fetch_semantic_raw(&self, user_id: &str, id: MemoryId) -> Result<SemanticMemory> {
        let node = self
            .retry
            .run("graph.get_node", || self.graph.get_node(user_id, id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("semantic memory {id}")))?;
        node.into_semantic()
    }

    /// A chain target must exist, be episodic, and share user and session
    async fn verify_chain_target(&self, memory: &EpisodicMemory, target: MemoryId) -> Result<()> {
        let existing = self.fetch_episodic(&memory.user_id, target).await?;
        if existing.session_id != memory.session_id {
            return Err(Error::Validation(format!(
                "chain target {} belongs to session {}, not {}",
                target, existing.session_id, memory.session_id
            )));
        }
        Ok(())
    }
}

/// The slot written on the target when an edge of `kind` is recorded
fn mirror_kind(kind: EdgeKind) -> Option<EdgeKind> {
    if kind.is_symmetric() {
        Some(kind)
    } else {
        kind.inverse()
    }
}
