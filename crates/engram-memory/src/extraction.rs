//! Background promotion of episodic memories into semantic concepts
//!
//! Each run walks the state machine Idle -> Collecting -> Extracting ->
//! Deduplicating -> Persisting -> Idle, with Failed reachable from any
//! non-idle state. Runs are idempotent on retry: consumed episodic
//! memories are recognized by their presence in extraction provenance,
//! and near-duplicate candidates merge into existing concepts instead of
//! creating new ones.

use crate::config::ExtractionConfig;
use crate::reasoning::{ConceptCandidate, ConceptExtractor};
use crate::repository::MemoryRepository;
use crate::search::{SearchEngine, SemanticQuery};
use chrono::Utc;
use engram_core::{
    EpisodicMemory, Error, ExtractionMetadata, MemoryId, Result, RetryPolicy, RunId,
    SemanticMemory,
};
use engram_store::NodeFilter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State of an extraction run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Collecting,
    Extracting,
    Deduplicating,
    Persisting,
    Failed,
}

/// Outcome of one extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub run_id: RunId,
    /// Episodic memories consumed by this run
    pub memories_processed: usize,
    /// New semantic memories created
    pub concepts_extracted: usize,
    /// Candidates merged into existing concepts
    pub concepts_merged: usize,
    /// Relationship edge slots written
    pub relationships_created: usize,
    pub elapsed_ms: u64,
    /// True when the run stopped early at a cancellation point
    pub cancelled: bool,
}

/// Cumulative pipeline statistics across runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_runs: u64,
    pub failed_runs: u64,
    pub total_concepts_extracted: u64,
    pub total_concepts_merged: u64,
    pub total_relationships_created: u64,
    pub last_run_at: Option<chrono::DateTime<Utc>>,
    pub last_state: RunState,
}

impl Default for ExtractionStats {
    fn default() -> Self {
        Self {
            total_runs: 0,
            failed_runs: 0,
            total_concepts_extracted: 0,
            total_concepts_merged: 0,
            total_relationships_created: 0,
            last_run_at: None,
            last_state: RunState::Idle,
        }
    }
}

/// Running counters, folded into the report or the failure error
#[derive(Default)]
struct RunCounters {
    memories_processed: usize,
    concepts_extracted: usize,
    concepts_merged: usize,
    relationships_created: usize,
}

/// The background semantic-extraction pipeline
pub struct ExtractionPipeline {
    repository: Arc<MemoryRepository>,
    search: Arc<SearchEngine>,
    extractor: Arc<dyn ConceptExtractor>,
    retry: RetryPolicy,
    config: ExtractionConfig,
    state: RwLock<RunState>,
    stats: RwLock<ExtractionStats>,
}

impl ExtractionPipeline {
    /// Create a pipeline over the repository, search engine, and extractor
    pub fn new(
        repository: Arc<MemoryRepository>,
        search: Arc<SearchEngine>,
        extractor: Arc<dyn ConceptExtractor>,
        retry: RetryPolicy,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            repository,
            search,
            extractor,
            retry,
            config,
            state: RwLock::new(RunState::Idle),
            stats: RwLock::new(ExtractionStats::default()),
        }
    }

    /// Current run state
    pub async fn state(&self) -> RunState {
        *self.state.read().await
    }

    /// Cumulative statistics across runs
    pub async fn stats(&self) -> ExtractionStats {
        self.stats.read().await.clone()
    }

    /// Run one extraction pass for a user, optionally scoped to a session
    ///
    /// Cancellation is honored between phases and between memories during
    /// extraction; partial progress stays persisted (retries converge via
    /// deduplication).
    pub async fn run(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ExtractionReport> {
        let run_id = RunId::new();
        let started = Instant::now();
        let mut counters = RunCounters::default();
        info!("Extraction run {} started for user {}", run_id, user_id);

        let outcome = self
            .run_inner(user_id, session_id, cancel, &mut counters)
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(cancelled) => {
                self.set_state(RunState::Idle).await;
                let report = ExtractionReport {
                    run_id,
                    memories_processed: counters.memories_processed,
                    concepts_extracted: counters.concepts_extracted,
                    concepts_merged: counters.concepts_merged,
                    relationships_created: counters.relationships_created,
                    elapsed_ms,
                    cancelled,
                };
                self.record_run(&report, RunState::Idle).await;
                info!(
                    "Extraction run {} finished: {} extracted, {} merged, {} relationships ({}ms)",
                    run_id,
                    report.concepts_extracted,
                    report.concepts_merged,
                    report.relationships_created,
                    elapsed_ms
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(RunState::Failed).await;
                {
                    let mut stats = self.stats.write().await;
                    stats.total_runs += 1;
                    stats.failed_runs += 1;
                    stats.total_concepts_extracted += counters.concepts_extracted as u64;
                    stats.total_concepts_merged += counters.concepts_merged as u64;
                    stats.total_relationships_created += counters.relationships_created as u64;
                    stats.last_run_at = Some(Utc::now());
                    stats.last_state = RunState::Failed;
                }
                warn!("Extraction run {} failed: {}", run_id, e);
                Err(Error::ExtractionFailed {
                    reason: e.to_string(),
                    concepts_extracted: counters.concepts_extracted,
                    relationships_created: counters.relationships_created,
                })
            }
        }
    }

    /// The phases proper; returns whether the run was cancelled early
    async fn run_inner(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
        counters: &mut RunCounters,
    ) -> Result<bool> {
        // ========== Collecting ==========
        self.set_state(RunState::Collecting).await;
        let batch = self.collect(user_id, session_id).await?;
        if batch.is_empty() {
            debug!("Nothing to extract for user {}", user_id);
            return Ok(false);
        }
        if cancel.is_cancelled() {
            return Ok(true);
        }

        // ========== Extracting ==========
        self.set_state(RunState::Extracting).await;
        let mut extracted: Vec<(MemoryId, ConceptCandidate)> = Vec::new();
        for memory in &batch {
            if cancel.is_cancelled() {
                return Ok(true);
            }
            let slice = std::slice::from_ref(memory);
            let candidates = self
                .retry
                .run("extractor.extract_concepts", || async {
                    self.extractor
                        .extract_concepts(slice)
                        .await
                        .map_err(Error::from)
                })
                .await?;

            let kept = candidates
                .into_iter()
                .filter(|c| c.confidence >= self.config.min_confidence)
                .take(self.config.max_concepts_per_memory);
            for candidate in kept {
                extracted.push((memory.id, candidate));
            }
            counters.memories_processed += 1;
        }

        if cancel.is_cancelled() {
            return Ok(true);
        }

        // ========== Deduplicating ==========
        // Each candidate is checked against the user's existing concepts
        // (including ones persisted earlier in this same run) and either
        // merged or created.
        self.set_state(RunState::Deduplicating).await;
        let mut concept_ids: HashMap<String, MemoryId> = HashMap::new();
        let run_started = Instant::now();
        for (source_id, candidate) in &extracted {
            let extraction = ExtractionMetadata {
                source_memory_ids: vec![*source_id],
                extracted_at: Utc::now(),
                extraction_confidence: candidate.confidence,
                keywords: candidate.keywords.clone(),
                processing_time_ms: run_started.elapsed().as_millis() as u64,
            };

            let merge_target = self.find_merge_target(user_id, candidate).await?;
            let id = match merge_target {
                Some(existing_id) => {
                    self.repository
                        .merge_extracted(user_id, existing_id, &extraction, candidate.confidence)
                        .await?;
                    counters.concepts_merged += 1;
                    debug!(
                        "Merged candidate '{}' into existing concept {}",
                        candidate.concept, existing_id
                    );
                    existing_id
                }
                None => {
                    let memory = SemanticMemory::new(
                        user_id,
                        &candidate.concept,
                        &candidate.description,
                    )
                    .with_confidence(candidate.confidence)
                    .with_category(&candidate.category)
                    .with_extraction(extraction);

                    let stored = self.repository.store_semantic(memory).await?;
                    if stored.pending_index {
                        warn!(
                            "Extracted concept {} persisted without vector index",
                            stored.memory.id
                        );
                    }
                    counters.concepts_extracted += 1;
                    stored.memory.id
                }
            };
            concept_ids.entry(candidate.concept.clone()).or_insert(id);
        }

        if cancel.is_cancelled() {
            return Ok(true);
        }

        // ========== Persisting ==========
        // Record the relations the extractor discovered between this
        // run's candidates, under the symmetric/directed edge rules.
        self.set_state(RunState::Persisting).await;
        for (_, candidate) in &extracted {
            let Some(&from) = concept_ids.get(&candidate.concept) else {
                continue;
            };
            for relation in &candidate.relations {
                let Some(&to) = concept_ids.get(&relation.to_concept) else {
                    continue;
                };
                if from == to {
                    continue;
                }
                counters.relationships_created +=
                    self.repository.add_edge(user_id, from, to, relation.kind).await?;
            }
        }

        Ok(false)
    }

    /// Episodic memories not yet consumed by any extraction, oldest first
    async fn collect(
        &self,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<EpisodicMemory>> {
        let mut filter = NodeFilter::episodic(user_id);
        filter.session_id = session_id.map(str::to_string);
        let episodic = self
            .retry
            .run("graph.query", || self.repository.graph().query(&filter))
            .await?;

        let semantic_filter = NodeFilter::semantic(user_id);
        let semantic = self
            .retry
            .run("graph.query", || {
                self.repository.graph().query(&semantic_filter)
            })
            .await?;
        let consumed: HashSet<MemoryId> = semantic
            .iter()
            .filter_map(|n| n.as_semantic())
            .filter_map(|m| m.metadata.extraction.as_ref())
            .flat_map(|e| e.source_memory_ids.iter().copied())
            .collect();

        let mut batch: Vec<EpisodicMemory> = episodic
            .into_iter()
            .filter_map(|n| n.into_episodic().ok())
            .filter(|m| !consumed.contains(&m.id))
            .collect();
        batch.sort_by_key(|m| m.timestamp);
        batch.truncate(self.config.batch_size);

        debug!(
            "Collected {} unconsumed episodic memories for user {}",
            batch.len(),
            user_id
        );
        Ok(batch)
    }

    /// The existing concept a candidate should merge into, if any
    ///
    /// Searches at the merge threshold, which sits above the ordinary
    /// search threshold. A degraded search means dedup cannot be trusted,
    /// so the run fails rather than risking duplicates.
    async fn find_merge_target(
        &self,
        user_id: &str,
        candidate: &ConceptCandidate,
    ) -> Result<Option<MemoryId>> {
        let result = self
            .search
            .search_semantic(
                &SemanticQuery::new(user_id, &candidate.description)
                    .with_threshold(self.config.merge_threshold)
                    .with_limit(1),
            )
            .await?;
        if result.degraded {
            return Err(Error::StoreUnavailable(
                "vector store unreachable; deduplication unavailable".to_string(),
            ));
        }
        Ok(result.matches.first().map(|m| m.item.id))
    }

    async fn set_state(&self, state: RunState) {
        *self.state.write().await = state;
    }

    async fn record_run(&self, report: &ExtractionReport, state: RunState) {
        let mut stats = self.stats.write().await;
        stats.total_runs += 1;
        stats.total_concepts_extracted += report.concepts_extracted as u64;
        stats.total_concepts_merged += report.concepts_merged as u64;
        stats.total_relationships_created += report.relationships_created as u64;
        stats.last_run_at = Some(Utc::now());
        stats.last_state = state;
    }
}
