//! Error types for the Engram memory engine
//!
//! One taxonomy shared by every crate in the workspace, with a
//! retryability classification used by the shared retry policy.

use thiserror::Error;

/// The main error type for memory-engine operations
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lookup / Validation Errors ==========
    /// A referenced memory or relationship target does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input failed validation (out-of-range score, empty partition key, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// An embedding vector does not match the configured dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    // ========== Backend Errors ==========
    /// Graph or vector backend unreachable after the retry budget
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The embedding model backing the provider is unreachable
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// An external call exceeded its deadline
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    // ========== Pipeline Errors ==========
    /// An extraction run aborted mid-batch; partial counts are preserved
    #[error(
        "Extraction failed: {reason} ({concepts_extracted} concepts, \
         {relationships_created} relationships persisted before failure)"
    )]
    ExtractionFailed {
        reason: String,
        concepts_extracted: usize,
        relationships_created: usize,
    },

    // ========== Serialization Errors ==========
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for memory-engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if retrying the operation may succeed
    ///
    /// `NotFound` and `Validation` are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::EmbeddingUnavailable(_) | Error::Timeout(_)
        )
    }

    /// Returns true if this error reports a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
