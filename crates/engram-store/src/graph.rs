//! Graph store contract and in-memory implementation
//!
//! The graph side persists memory nodes and their typed relationships.
//! The engine defines this contract and consumes implementations of it;
//! the in-memory implementation here backs tests and embedded use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engram_core::{EdgeKind, EpisodicMemory, Error, MemoryId, Result, SemanticMemory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Discriminator for the two memory kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Episodic,
    Semantic,
}

/// A node stored on the graph side: either memory kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MemoryNode {
    Episodic(EpisodicMemory),
    Semantic(SemanticMemory),
}

impl MemoryNode {
    /// The node's id
    pub fn id(&self) -> MemoryId {
        match self {
            MemoryNode::Episodic(m) => m.id,
            MemoryNode::Semantic(m) => m.id,
        }
    }

    /// The owning user
    pub fn user_id(&self) -> &str {
        match self {
            MemoryNode::Episodic(m) => &m.user_id,
            MemoryNode::Semantic(m) => &m.user_id,
        }
    }

    /// Which kind of memory this node holds
    pub fn kind(&self) -> NodeKind {
        match self {
            MemoryNode::Episodic(_) => NodeKind::Episodic,
            MemoryNode::Semantic(_) => NodeKind::Semantic,
        }
    }

    /// Borrow as episodic, if that is the kind
    pub fn as_episodic(&self) -> Option<&EpisodicMemory> {
        match self {
            MemoryNode::Episodic(m) => Some(m),
            MemoryNode::Semantic(_) => None,
        }
    }

    /// Borrow as semantic, if that is the kind
    pub fn as_semantic(&self) -> Option<&SemanticMemory> {
        match self {
            MemoryNode::Semantic(m) => Some(m),
            MemoryNode::Episodic(_) => None,
        }
    }

    /// Consume into episodic, erroring on kind mismatch
    pub fn into_episodic(self) -> Result<EpisodicMemory> {
        match self {
            MemoryNode::Episodic(m) => Ok(m),
            MemoryNode::Semantic(m) => Err(Error::Validation(format!(
                "memory {} is semantic, not episodic",
                m.id
            ))),
        }
    }

    /// Consume into semantic, erroring on kind mismatch
    pub fn into_semantic(self) -> Result<SemanticMemory> {
        match self {
            MemoryNode::Semantic(m) => Ok(m),
            MemoryNode::Episodic(m) => Err(Error::Validation(format!(
                "memory {} is episodic, not semantic",
                m.id
            ))),
        }
    }

    /// True if any relationship slot references `id`
    pub fn references(&self, id: MemoryId) -> bool {
        match self {
            MemoryNode::Episodic(m) => m.links.references(id),
            MemoryNode::Semantic(m) => m.edges.references(id),
        }
    }

    /// Remove every relationship reference to `id`
    pub fn remove_references(&mut self, id: MemoryId) -> usize {
        match self {
            MemoryNode::Episodic(m) => m.links.remove_references(id),
            MemoryNode::Semantic(m) => m.edges.remove_references(id),
        }
    }

    /// Write an outgoing edge slot on this node
    ///
    /// Only the `from` side is written here; symmetry and inverse-slot
    /// maintenance is repository policy. Returns false if the edge was
    /// already present.
    pub fn attach_edge(&mut self, kind: EdgeKind, to: MemoryId) -> Result<bool> {
        match self {
            MemoryNode::Episodic(m) => {
                if !kind.is_episodic() {
                    return Err(Error::Validation(format!(
                        "edge kind {kind:?} not valid on episodic memory"
                    )));
                }
                match kind {
                    EdgeKind::Previous => {
                        let changed = m.links.previous != Some(to);
                        m.links.previous = Some(to);
                        Ok(changed)
                    }
                    EdgeKind::Next => {
                        let changed = m.links.next != Some(to);
                        m.links.next = Some(to);
                        Ok(changed)
                    }
                    EdgeKind::Related => {
                        if m.links.related.contains(&to) {
                            Ok(false)
                        } else {
                            m.links.related.push(to);
                            Ok(true)
                        }
                    }
                    _ => unreachable!("guarded by is_episodic"),
                }
            }
            MemoryNode::Semantic(m) => m.edges.add(kind, to),
        }
    }
}

/// Inclusive time span filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Filter specification for graph queries
///
/// Always scoped by `user_id`. Tag filtering is any-match. Ordering and
/// result bounding are ranking policy and live in the search engine, not
/// in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFilter {
    pub user_id: String,
    pub kind: Option<NodeKind>,
    pub session_id: Option<String>,
    pub time_range: Option<TimeRange>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<(f32, f32)>,
    pub categories: Option<Vec<String>>,
}

impl NodeFilter {
    /// Filter matching all nodes of a user
    pub fn all(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind: None,
            session_id: None,
            time_range: None,
            tags: None,
            importance: None,
            categories: None,
        }
    }

    /// Filter matching a user's episodic memories
    pub fn episodic(user_id: &str) -> Self {
        Self {
            kind: Some(NodeKind::Episodic),
            ..Self::all(user_id)
        }
    }

    /// Filter matching a user's semantic memories
    pub fn semantic(user_id: &str) -> Self {
        Self {
            kind: Some(NodeKind::Semantic),
            ..Self::all(user_id)
        }
    }

    /// Builder: restrict to a session
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Builder: restrict to a time range
    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    /// Builder: require any of the given tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: restrict to an importance range (inclusive)
    pub fn with_importance(mut self, min: f32, max: f32) -> Self {
        self.importance = Some((min, max));
        self
    }

    /// Builder: restrict to any of the given categories
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    /// Whether a node satisfies this filter
    pub fn matches(&self, node: &MemoryNode) -> bool {
        if node.user_id() != self.user_id {
            return false;
        }
        if let Some(kind) = self.kind {
            if node.kind() != kind {
                return false;
            }
        }
        match node {
            MemoryNode::Episodic(m) => {
                if let Some(session) = &self.session_id {
                    if &m.session_id != session {
                        return false;
                    }
                }
                if let Some(range) = &self.time_range {
                    if !range.contains(m.timestamp) {
                        return false;
                    }
                }
                if let Some(tags) = &self.tags {
                    if !m.matches_any_tag(tags) {
                        return false;
                    }
                }
                if let Some((min, max)) = self.importance {
                    if m.metadata.importance < min || m.metadata.importance > max {
                        return false;
                    }
                }
                true
            }
            MemoryNode::Semantic(m) => {
                // Session, time, tag, and importance filters are episodic-only
                if self.session_id.is_some()
                    || self.time_range.is_some()
                    || self.tags.is_some()
                    || self.importance.is_some()
                {
                    return false;
                }
                if let Some(categories) = &self.categories {
                    if !categories.contains(&m.metadata.category) {
                        return false;
                    }
                }
                true
            }
        }
    }
}

/// Contract for the relationship-oriented store
///
/// Writes are keyed by pre-assigned memory ids, so retrying a write is
/// idempotent. Every operation is scoped by `user_id`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Write a node (put semantics keyed by id)
    async fn create_node(&self, node: MemoryNode) -> Result<()>;

    /// Fetch a node by id
    async fn get_node(&self, user_id: &str, id: MemoryId) -> Result<Option<MemoryNode>>;

    /// Rewrite an existing node; fails with `NotFound` if missing
    async fn update_node(&self, node: MemoryNode) -> Result<()>;

    /// Remove a node; returns false if it did not exist
    async fn delete_node(&self, user_id: &str, id: MemoryId) -> Result<bool>;

    /// Write an outgoing edge slot on the `from` node
    async fn create_edge(
        &self,
        user_id: &str,
        from: MemoryId,
        to: MemoryId,
        kind: EdgeKind,
    ) -> Result<()>;

    /// Scrub every relationship reference to `id` across the user's nodes
    async fn delete_edges_to(&self, user_id: &str, id: MemoryId) -> Result<usize>;

    /// All nodes satisfying the filter, unordered
    async fn query(&self, filter: &NodeFilter) -> Result<Vec<MemoryNode>>;

    /// Number of a user's nodes, optionally restricted to one kind
    async fn count(&self, user_id: &str, kind: Option<NodeKind>) -> Result<usize>;
}

/// In-memory graph store for tests and embedded deployments
#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: RwLock<HashMap<String, HashMap<MemoryId, MemoryNode>>>,
}

impl InMemoryGraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn create_node(&self, node: MemoryNode) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        let user_nodes = nodes.entry(node.user_id().to_string()).or_default();
        debug!("Stored {:?} node {}", node.kind(), node.id());
        user_nodes.insert(node.id(), node);
        Ok(())
    }

    async fn get_node(&self, user_id: &str, id: MemoryId) -> Result<Option<MemoryNode>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.get(user_id).and_then(|m| m.get(&id)).cloned())
    }

    async fn update_node(&self, node: MemoryNode) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        let user_nodes = nodes
            .get_mut(node.user_id())
            .ok_or_else(|| Error::NotFound(format!("memory {}", node.id())))?;
        match user_nodes.get_mut(&node.id()) {
            Some(existing) => {
                *existing = node;
                Ok(())
            }
            None => Err(Error::NotFound(format!("memory {}", node.id()))),
        }
    }

    async fn delete_node(&self, user_id: &str, id: MemoryId) -> Result<bool> {
        let mut nodes = self.nodes.write().await;
        let removed = nodes
            .get_mut(user_id)
            .map(|m| m.remove(&id).is_some())
            .unwrap_or(false);
        if removed {
            debug!("Deleted node {} for user {}", id, user_id);
        }
        Ok(removed)
    }

    async fn create_edge(
        &self,
        user_id: &str,
        from: MemoryId,
        to: MemoryId,
        kind: EdgeKind,
    ) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(user_id)
            .and_then(|m| m.get_mut(&from))
            .ok_or_else(|| Error::NotFound(format!("memory {from}")))?;
        node.attach_edge(kind, to)?;
        Ok(())
    }

    async fn delete_edges_to(&self, user_id: &str, id: MemoryId) -> Result<usize> {
        let mut nodes = self.nodes.write().await;
        let mut removed = 0;
        if let Some(user_nodes) = nodes.get_mut(user_id) {
            for node in user_nodes.values_mut() {
                removed += node.remove_references(id);
            }
        }
        if removed > 0 {
            info!("Scrubbed {} edge references to {}", removed, id);
        }
        Ok(removed)
    }

    async fn query(&self, filter: &NodeFilter) -> Result<Vec<MemoryNode>> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .get(&filter.user_id)
            .map(|m| m.values().filter(|n| filter.matches(n)).cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, user_id: &str, kind: Option<NodeKind>) -> Result<usize> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .get(user_id)
            .map(|m| {
                m.values()
                    .filter(|n| kind.is_none_or(|k| n.kind() == k))
                    .count()
            })
            .unwrap_or(0))
    }
}
