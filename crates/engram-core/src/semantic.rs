//! Semantic memory: a distilled concept

use crate::edge::EdgeKind;
use crate::error::{Error, Result};
use crate::id::MemoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A generalized concept distilled from events or asserted directly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMemory {
    /// Unique identifier, assigned at creation
    pub id: MemoryId,

    /// Owning user
    pub user_id: String,

    /// Short concept label; uniqueness is enforced by similarity-based
    /// deduplication, not by label equality
    pub concept: String,

    /// Free-text description; the embedding is computed from this
    pub description: String,

    /// Embedding of `description`; dimension is fixed per deployment
    pub vector: Vec<f32>,

    /// Scoring and provenance metadata
    pub metadata: SemanticMetadata,

    /// Typed relationship edges to other semantic memories
    pub edges: SemanticEdges,

    /// Whether the vector index currently carries this memory
    pub index_state: IndexState,
}

/// Metadata attached to a semantic memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMetadata {
    /// Confidence score in [0, 1]
    pub confidence: f32,

    /// Classification category
    pub category: String,

    /// How this memory came to exist
    pub source: MemorySource,

    /// Updated on every read
    pub last_accessed: DateTime<Utc>,

    /// Incremented on every read
    pub access_count: u64,

    /// Present only when derived by the extraction pipeline
    pub extraction: Option<ExtractionMetadata>,
}

/// Origin of a semantic memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// Asserted directly by the user or application
    Asserted,
    /// Derived from episodic memories by the extraction pipeline
    Extracted,
    /// Any other origin
    Custom(String),
}

/// Provenance recorded when the extraction pipeline derives a concept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// Episodic memories the concept was derived from
    pub source_memory_ids: Vec<MemoryId>,

    /// When the extraction ran
    pub extracted_at: DateTime<Utc>,

    /// Confidence the extractor assigned to the candidate
    pub extraction_confidence: f32,

    /// Salient keywords surfaced by the extractor
    pub keywords: Vec<String>,

    /// Wall-clock time the extraction step spent, in milliseconds
    pub processing_time_ms: u64,
}

impl ExtractionMetadata {
    /// Merge another extraction record into this one
    ///
    /// Source ids and keywords are unioned; confidence is raised to the
    /// max of the two.
    pub fn merge(&mut self, other: &ExtractionMetadata) {
        for id in &other.source_memory_ids {
            if !self.source_memory_ids.contains(id) {
                self.source_memory_ids.push(*id);
            }
        }
        for kw in &other.keywords {
            if !self.keywords.contains(kw) {
                self.keywords.push(kw.clone());
            }
        }
        self.extraction_confidence = self.extraction_confidence.max(other.extraction_confidence);
        self.extracted_at = self.extracted_at.max(other.extracted_at);
    }
}

/// Vector-index state of a semantic memory
///
/// The graph node is the source of truth; the vector entry is a secondary,
/// rebuildable index. A failed vector write leaves the memory readable but
/// excluded from similarity search until a reindex succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexState {
    /// The vector store carries this memory
    Indexed,
    /// The vector write failed; retried by the pipeline or a reindex call
    PendingIndex,
}

/// Typed edge sets of a semantic memory
///
/// All edges are directed except `similar` and `related`. Cycles are valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticEdges {
    pub similar: Vec<MemoryId>,
    pub parents: Vec<MemoryId>,
    pub children: Vec<MemoryId>,
    pub related: Vec<MemoryId>,
    pub causes: Vec<MemoryId>,
    pub caused_by: Vec<MemoryId>,
    pub part_of: Vec<MemoryId>,
    pub has_parts: Vec<MemoryId>,
    pub opposite: Vec<MemoryId>,
    pub instance_of: Vec<MemoryId>,
}

impl SemanticEdges {
    /// The edge set for a given kind
    ///
    /// Returns `None` for kinds that do not apply to semantic memories.
    pub fn slot(&self, kind: EdgeKind) -> Option<&Vec<MemoryId>> {
        match kind {
            EdgeKind::Similar => Some(&self.similar),
            EdgeKind::Parent => Some(&self.parents),
            EdgeKind::Child => Some(&self.children),
            EdgeKind::Related => Some(&self.related),
            EdgeKind::Causes => Some(&self.causes),
            EdgeKind::CausedBy => Some(&self.caused_by),
            EdgeKind::PartOf => Some(&self.part_of),
            EdgeKind::HasPart => Some(&self.has_parts),
            EdgeKind::Opposite => Some(&self.opposite),
            EdgeKind::InstanceOf => Some(&self.instance_of),
            EdgeKind::Previous | EdgeKind::Next => None,
        }
    }

    fn slot_mut(&mut self, kind: EdgeKind) -> Option<&mut Vec<MemoryId>> {
        match kind {
            EdgeKind::Similar => Some(&mut self.similar),
            EdgeKind::Parent => Some(&mut self.parents),
            EdgeKind::Child => Some(&mut self.children),
            EdgeKind::Related => Some(&mut self.related),
            EdgeKind::Causes => Some(&mut self.causes),
            EdgeKind::CausedBy => Some(&mut self.caused_by),
            EdgeKind::PartOf => Some(&mut self.part_of),
            EdgeKind::HasPart => Some(&mut self.has_parts),
            EdgeKind::Opposite => Some(&mut self.opposite),
            EdgeKind::InstanceOf => Some(&mut self.instance_of),
            EdgeKind::Previous | EdgeKind::Next => None,
        }
    }

    /// Add an edge of the given kind, deduplicating
    pub fn add(&mut self, kind: EdgeKind, target: MemoryId) -> Result<bool> {
        let slot = self.slot_mut(kind).ok_or_else(|| {
            Error::Validation(format!("edge kind {kind:?} not valid on semantic memory"))
        })?;
        if slot.contains(&target) {
            Ok(false)
        } else {
            slot.push(target);
            Ok(true)
        }
    }

    /// Remove every reference to `id` across all slots
    pub fn remove_references(&mut self, id: MemoryId) -> usize {
        let mut removed = 0;
        for slot in self.slots_mut() {
            let before = slot.len();
            slot.retain(|r| *r != id);
            removed += before - slot.len();
        }
        removed
    }

    /// Union another edge set into this one
    pub fn union(&mut self, other: &SemanticEdges) {
        let pairs = self.slots_mut().into_iter().zip(other.slots());
        for (mine, theirs) in pairs {
            for id in theirs {
                if !mine.contains(id) {
                    mine.push(*id);
                }
            }
        }
    }

    /// True if any slot references `id`
    pub fn references(&self, id: MemoryId) -> bool {
        self.slots().iter().any(|s| s.contains(&id))
    }

    /// All referenced ids across every slot, deduplicated
    pub fn all_targets(&self) -> Vec<MemoryId> {
        let mut out = Vec::new();
        for slot in self.slots() {
            for id in slot {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
        }
        out
    }

    fn slots(&self) -> [&Vec<MemoryId>; 10] {
        [
            &self.similar,
            &self.parents,
            &self.children,
            &self.related,
            &self.causes,
            &self.caused_by,
            &self.part_of,
            &self.has_parts,
            &self.opposite,
            &self.instance_of,
        ]
    }

    fn slots_mut(&mut self) -> [&mut Vec<MemoryId>; 10] {
        [
            &mut self.similar,
            &mut self.parents,
            &mut self.children,
            &mut self.related,
            &mut self.causes,
            &mut self.caused_by,
            &mut self.part_of,
            &mut self.has_parts,
            &mut self.opposite,
            &mut self.instance_of,
        ]
    }
}

impl SemanticMemory {
    /// Create a new semantic memory with a fresh id
    ///
    /// The vector starts empty; the repository computes it from the
    /// description on store unless one is supplied.
    pub fn new(user_id: &str, concept: &str, description: &str) -> Self {
        Self {
            id: MemoryId::new(),
            user_id: user_id.to_string(),
            concept: concept.to_string(),
            description: description.to_string(),
            vector: Vec::new(),
            metadata: SemanticMetadata {
                confidence: 1.0,
                category: "general".to_string(),
                source: MemorySource::Asserted,
                last_accessed: Utc::now(),
                access_count: 0,
                extraction: None,
            },
            edges: SemanticEdges::default(),
            index_state: IndexState::Indexed,
        }
    }

    /// Builder: set the confidence score
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.metadata.confidence = confidence;
        self
    }

    /// Builder: set the category
    pub fn with_category(mut self, category: &str) -> Self {
        self.metadata.category = category.to_string();
        self
    }

    /// Builder: set the source
    pub fn with_source(mut self, source: MemorySource) -> Self {
        self.metadata.source = source;
        self
    }

    /// Builder: supply a precomputed embedding
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    /// Builder: attach extraction provenance
    pub fn with_extraction(mut self, extraction: ExtractionMetadata) -> Self {
        self.metadata.source = MemorySource::Extracted;
        self.metadata.extraction = Some(extraction);
        self
    }

    /// Record a read access
    pub fn touch(&mut self) {
        self.metadata.access_count += 1;
        self.metadata.last_accessed = Utc::now();
    }

    /// Validate invariants before persisting
    ///
    /// The embedding dimension is checked separately by the repository,
    /// which knows the configured dimension.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }
        if self.concept.is_empty() {
            return Err(Error::Validation("concept must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.metadata.confidence) {
            return Err(Error::Validation(format!(
                "confidence {} outside [0, 1]",
                self.metadata.confidence
            )));
        }
        if let Some(extraction) = &self.metadata.extraction {
            if !(0.0..=1.0).contains(&extraction.extraction_confidence) {
                return Err(Error::Validation(format!(
                    "extraction confidence {} outside [0, 1]",
                    extraction.extraction_confidence
                )));
            }
        }
        Ok(())
    }
}
