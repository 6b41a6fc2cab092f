//! Relationship edge kinds
//!
//! Edges are an explicit enumeration rather than object references; cycles
//! (e.g. causes/caused-by loops) are valid data.

use serde::{Deserialize, Serialize};

/// Every relationship type a memory node can carry
///
/// `Previous`/`Next`/`Related` apply to episodic memories; the remaining
/// kinds apply to semantic memories (`Related` is shared by both).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    /// Temporal chain: the memory immediately before this one in a session
    Previous,
    /// Temporal chain: the memory immediately after this one in a session
    Next,
    /// Unordered cross-reference (symmetric)
    Related,
    /// Near-duplicate or closely similar concept (symmetric)
    Similar,
    /// Broader concept this one specializes
    Parent,
    /// Narrower concept specializing this one
    Child,
    /// This concept causes the target
    Causes,
    /// This concept is caused by the target
    CausedBy,
    /// This concept is a component of the target
    PartOf,
    /// The target is a component of this concept
    HasPart,
    /// Antonym or opposing concept
    Opposite,
    /// This concept is an instance of the target
    InstanceOf,
}

impl EdgeKind {
    /// The inverse slot written on the target of a directed edge, if any
    pub fn inverse(self) -> Option<EdgeKind> {
        match self {
            EdgeKind::Previous => Some(EdgeKind::Next),
            EdgeKind::Next => Some(EdgeKind::Previous),
            EdgeKind::Parent => Some(EdgeKind::Child),
            EdgeKind::Child => Some(EdgeKind::Parent),
            EdgeKind::Causes => Some(EdgeKind::CausedBy),
            EdgeKind::CausedBy => Some(EdgeKind::Causes),
            EdgeKind::PartOf => Some(EdgeKind::HasPart),
            EdgeKind::HasPart => Some(EdgeKind::PartOf),
            _ => None,
        }
    }

    /// True for kinds the repository mirrors as the same slot on both ends
    pub fn is_symmetric(self) -> bool {
        matches!(self, EdgeKind::Related | EdgeKind::Similar)
    }

    /// True for kinds valid on episodic memories
    pub fn is_episodic(self) -> bool {
        matches!(self, EdgeKind::Previous | EdgeKind::Next | EdgeKind::Related)
    }

    /// True for kinds valid on semantic memories
    pub fn is_semantic(self) -> bool {
        !matches!(self, EdgeKind::Previous | EdgeKind::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_pairs() {
        assert_eq!(EdgeKind::Previous.inverse(), Some(EdgeKind::Next));
        assert_eq!(EdgeKind::Causes.inverse(), Some(EdgeKind::CausedBy));
        assert_eq!(EdgeKind::PartOf.inverse(), Some(EdgeKind::HasPart));
        assert_eq!(EdgeKind::Parent.inverse(), Some(EdgeKind::Child));
        assert_eq!(EdgeKind::Similar.inverse(), None);
        assert_eq!(EdgeKind::InstanceOf.inverse(), None);
    }

    #[test]
    fn test_inverse_is_involutive() {
        for kind in [
            EdgeKind::Previous,
            EdgeKind::Next,
            EdgeKind::Parent,
            EdgeKind::Child,
            EdgeKind::Causes,
            EdgeKind::CausedBy,
            EdgeKind::PartOf,
            EdgeKind::HasPart,
        ] {
            assert_eq!(kind.inverse().unwrap().inverse(), Some(kind));
        }
    }

    #[test]
    fn test_symmetric_kinds() {
        assert!(EdgeKind::Related.is_symmetric());
        assert!(EdgeKind::Similar.is_symmetric());
        assert!(!EdgeKind::Opposite.is_symmetric());
        assert!(!EdgeKind::Causes.is_symmetric());
    }

    #[test]
    fn test_kind_scoping() {
        assert!(EdgeKind::Previous.is_episodic());
        assert!(!EdgeKind::Previous.is_semantic());
        assert!(EdgeKind::Related.is_episodic());
        assert!(EdgeKind::Related.is_semantic());
        assert!(EdgeKind::InstanceOf.is_semantic());
        assert!(!EdgeKind::InstanceOf.is_episodic());
    }
}
