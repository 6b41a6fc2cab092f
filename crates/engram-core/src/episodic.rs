//! Episodic memory: a single observed event

use crate::error::{Error, Result};
use crate::id::MemoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Open key/value bag of situational data attached to an episodic memory
///
/// Contents are deliberately untyped; callers store whatever scalar or
/// structured values describe the situation.
pub type ContextBag = HashMap<String, serde_json::Value>;

/// A single observed event in a user's conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMemory {
    /// Unique identifier, assigned at creation
    pub id: MemoryId,

    /// Owning user; every query is scoped by this
    pub user_id: String,

    /// Conversation session the event belongs to
    pub session_id: String,

    /// Event time, immutable after creation
    pub timestamp: DateTime<Utc>,

    /// Free-text content of the event
    pub content: String,

    /// Situational data captured alongside the event
    pub context: ContextBag,

    /// Scoring and classification metadata
    pub metadata: EpisodicMetadata,

    /// Links into the session's temporal chain and cross-references
    pub links: EpisodicLinks,
}

/// Metadata attached to an episodic memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodicMetadata {
    /// Importance score in [0, 1]
    pub importance: f32,

    /// Free-form tags; search matches any of them
    pub tags: Vec<String>,

    /// Where the event happened, if known
    pub location: Option<String>,

    /// Who was involved, if known
    pub participants: Vec<String>,
}

/// Relationship links of an episodic memory
///
/// `previous`/`next` form a doubly linked temporal chain per session; the
/// repository keeps the two directions consistent, callers never do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodicLinks {
    /// The memory immediately before this one in the session chain
    pub previous: Option<MemoryId>,

    /// The memory immediately after this one in the session chain
    pub next: Option<MemoryId>,

    /// Unordered cross-references to other memories
    pub related: Vec<MemoryId>,
}

impl EpisodicLinks {
    /// Remove every reference to `id`, returning how many were removed
    pub fn remove_references(&mut self, id: MemoryId) -> usize {
        let mut removed = 0;
        if self.previous == Some(id) {
            self.previous = None;
            removed += 1;
        }
        if self.next == Some(id) {
            self.next = None;
            removed += 1;
        }
        let before = self.related.len();
        self.related.retain(|r| *r != id);
        removed + before - self.related.len()
    }

    /// True if any slot references `id`
    pub fn references(&self, id: MemoryId) -> bool {
        self.previous == Some(id) || self.next == Some(id) || self.related.contains(&id)
    }
}

impl EpisodicMemory {
    /// Create a new episodic memory with a fresh id and the current time
    pub fn new(user_id: &str, session_id: &str, content: &str) -> Self {
        Self {
            id: MemoryId::new(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            content: content.to_string(),
            context: ContextBag::new(),
            metadata: EpisodicMetadata::default(),
            links: EpisodicLinks::default(),
        }
    }

    /// Builder: set the event time
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builder: set the importance score
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.metadata.importance = importance;
        self
    }

    /// Builder: add tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builder: set a context value
    pub fn with_context<K: Into<String>, V: Into<serde_json::Value>>(
        mut self,
        key: K,
        value: V,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Builder: link to the previous memory in the session chain
    pub fn with_previous(mut self, previous: MemoryId) -> Self {
        self.links.previous = Some(previous);
        self
    }

    /// Builder: set the location
    pub fn with_location(mut self, location: &str) -> Self {
        self.metadata.location = Some(location.to_string());
        self
    }

    /// Builder: add participants
    pub fn with_participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata
            .participants
            .extend(participants.into_iter().map(Into::into));
        self
    }

    /// True if any of `tags` appears in this memory's tag set
    pub fn matches_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.metadata.tags.contains(t))
    }

    /// Validate invariants before persisting
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(Error::Validation("user_id must not be empty".to_string()));
        }
        if self.session_id.is_empty() {
            return Err(Error::Validation(
                "session_id must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.metadata.importance) {
            return Err(Error::Validation(format!(
                "importance {} outside [0, 1]",
                self.metadata.importance
            )));
        }
        Ok(())
    }
}
