//! Reasoning collaborator for concept extraction
//!
//! The extraction pipeline hands batches of episodic memories to an
//! external reasoning call and gets back structured concept candidates.
//! The mock extractor derives candidates deterministically from content,
//! which keeps deduplication behavior testable; the OpenAI extractor
//! (behind the `openai` feature) prompts a chat model for a JSON array.

use async_trait::async_trait;
use engram_core::{EdgeKind, EpisodicMemory, Error};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::{debug, info};

/// Errors raised by reasoning collaborators
#[derive(Debug, ThisError)]
pub enum ReasoningError {
    /// The backing model is unreachable
    #[error("Reasoning backend unavailable: {0}")]
    Unavailable(String),

    /// Input the extractor cannot process
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Provider missing required configuration
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Response could not be decoded into candidates
    #[error("Response parsing error: {0}")]
    ParseError(String),
}

/// Result type for reasoning operations
pub type ReasoningResult<T> = Result<T, ReasoningError>;

impl From<ReasoningError> for Error {
    fn from(e: ReasoningError) -> Self {
        match e {
            ReasoningError::Unavailable(msg) => Error::StoreUnavailable(msg),
            ReasoningError::InvalidInput(msg) => Error::Validation(msg),
            ReasoningError::NotConfigured(msg) => Error::Internal(msg),
            ReasoningError::ParseError(msg) => Error::Serialization(msg),
        }
    }
}

/// A relation the extractor discovered between candidates of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRelation {
    /// Concept label of the target candidate
    pub to_concept: String,

    /// Edge kind; symmetric/directed handling follows the data-model rules
    pub kind: EdgeKind,
}

/// A concept candidate derived from one or more episodic memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptCandidate {
    /// Short concept label
    pub concept: String,

    /// Description; the dedup embedding is computed from this
    pub description: String,

    /// Classification category
    pub category: String,

    /// Extractor confidence in [0, 1]
    pub confidence: f32,

    /// Salient keywords
    pub keywords: Vec<String>,

    /// Relations to other candidates in the same batch
    #[serde(default)]
    pub relations: Vec<CandidateRelation>,
}

/// Contract for the external reasoning call
#[async_trait]
pub trait ConceptExtractor: Send + Sync {
    /// Derive concept candidates from a batch of episodic memories
    async fn extract_concepts(
        &self,
        batch: &[EpisodicMemory],
    ) -> ReasoningResult<Vec<ConceptCandidate>>;
}

/// Deterministic mock extractor for tests
///
/// Derives one candidate per memory from its most significant words. The
/// same content always yields the same candidate, so repeated runs
/// exercise the dedup path.
pub struct MockConceptExtractor {
    confidence: f32,
}

impl MockConceptExtractor {
    /// Create a mock extractor emitting candidates at the given confidence
    pub fn new(confidence: f32) -> Self {
        info!("Created mock concept extractor");
        Self { confidence }
    }

    fn candidate_for(&self, memory: &EpisodicMemory) -> Option<ConceptCandidate> {
        // Longest words carry the topic; ignore short function words.
        let mut words: Vec<&str> = memory
            .content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .collect();
        words.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        words.dedup();
        if words.is_empty() {
            return None;
        }

        let keywords: Vec<String> = words
            .iter()
            .take(3)
            .map(|w| w.to_lowercase())
            .collect();
        let concept = keywords.join(" ");

        Some(ConceptCandidate {
            concept,
            description: format!("Recurring topic: {}", keywords.join(", ")),
            category: "general".to_string(),
            confidence: self.confidence,
            keywords,
            relations: Vec::new(),
        })
    }
}

impl Default for MockConceptExtractor {
    fn default() -> Self {
        Self::new(0.8)
    }
}

#[async_trait]
impl ConceptExtractor for MockConceptExtractor {
    async fn extract_concepts(
        &self,
        batch: &[EpisodicMemory],
    ) -> ReasoningResult<Vec<ConceptCandidate>> {
        let candidates: Vec<ConceptCandidate> = batch
            .iter()
            .filter_map(|m| self.candidate_for(m))
            .collect();
        debug!(
            "Mock extractor produced {} candidates from {} memories",
            candidates.len(),
            batch.len()
        );
        Ok(candidates)
    }
}

/// Configuration for the OpenAI-backed extractor
#[cfg(feature = "openai")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub model: String,
    pub api_key: String,
    pub api_base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// OpenAI chat-backed concept extractor
#[cfg(feature = "openai")]
pub struct OpenAIConceptExtractor {
    config: ReasoningConfig,
    client: reqwest::Client,
}

#[cfg(feature = "openai")]
impl OpenAIConceptExtractor {
    const SYSTEM_PROMPT: &'static str = "You distill conversation events into general \
        concepts. Reply with a JSON array of objects with fields: concept, description, \
        category, confidence (0-1), keywords (array of strings). No prose.";

    /// Create an extractor from configuration
    pub fn new(config: ReasoningConfig) -> ReasoningResult<Self> {
        if config.api_key.is_empty() {
            return Err(ReasoningError::NotConfigured(
                "OpenAI API key required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ReasoningError::Unavailable(e.to_string()))?;
        info!("Created OpenAI concept extractor ({})", config.model);
        Ok(Self { config, client })
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl ConceptExtractor for OpenAIConceptExtractor {
    async fn extract_concepts(
        &self,
        batch: &[EpisodicMemory],
    ) -> ReasoningResult<Vec<ConceptCandidate>> {
        if batch.is_empty() {
            return Ok(vec![]);
        }

        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: String,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            max_tokens: u32,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }

        let events: String = batch
            .iter()
            .map(|m| format!("- {}\n", m.content))
            .collect();

        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");

        let response = self
            .client
            .post(format!("{base}/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&Request {
                model: &self.config.model,
                messages: vec![
                    Message {
                        role: "system",
                        content: Self::SYSTEM_PROMPT.to_string(),
                    },
                    Message {
                        role: "user",
                        content: format!("Events:\n{events}"),
                    },
                ],
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            })
            .send()
            .await
            .map_err(|e| ReasoningError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Unavailable(format!("{status}: {body}")));
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| ReasoningError::ParseError(e.to_string()))?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ReasoningError::ParseError("no choices in response".to_string()))?;

        serde_json::from_str(content).map_err(|e| ReasoningError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_extractor_is_deterministic() {
        let extractor = MockConceptExtractor::default();
        let memory = EpisodicMemory::new("u1", "s1", "Discussed machine learning models today");

        let a = extractor.extract_concepts(&[memory.clone()]).await.unwrap();
        let b = extractor.extract_concepts(&[memory]).await.unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(a[0].concept, b[0].concept);
        assert_eq!(a[0].description, b[0].description);
    }

    #[tokio::test]
    async fn test_mock_extractor_skips_contentless_memories() {
        let extractor = MockConceptExtractor::default();
        let memory = EpisodicMemory::new("u1", "s1", "ok, go on");
        let candidates = extractor.extract_concepts(&[memory]).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_mock_extractor_one_candidate_per_memory() {
        let extractor = MockConceptExtractor::default();
        let batch = vec![
            EpisodicMemory::new("u1", "s1", "Learned about neural networks"),
            EpisodicMemory::new("u1", "s1", "Compared sourdough starter recipes"),
        ];
        let candidates = extractor.extract_concepts(&batch).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_ne!(candidates[0].concept, candidates[1].concept);
    }

    #[tokio::test]
    async fn test_mock_confidence_is_configurable() {
        let extractor = MockConceptExtractor::new(0.3);
        let memory = EpisodicMemory::new("u1", "s1", "Talked about quantum computing");
        let candidates = extractor.extract_concepts(&[memory]).await.unwrap();
        assert_eq!(candidates[0].confidence, 0.3);
    }

    #[test]
    fn test_candidate_parses_from_json() {
        let json = r#"[{
            "concept": "Machine Learning",
            "description": "Statistical learning from data",
            "category": "technology",
            "confidence": 0.9,
            "keywords": ["ml", "statistics"]
        }]"#;
        let candidates: Vec<ConceptCandidate> = serde_json::from_str(json).unwrap();
        assert_eq!(candidates[0].concept, "Machine Learning");
        assert!(candidates[0].relations.is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let err: Error = ReasoningError::Unavailable("down".to_string()).into();
        assert!(err.is_retryable());
    }
}
