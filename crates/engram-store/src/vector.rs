//! Vector store contract and in-memory implementation
//!
//! The vector side carries one embedding per semantic memory and answers
//! nearest-neighbor queries with a similarity threshold and metadata
//! filter. It is a secondary, rebuildable index; the graph is the source
//! of truth.

use async_trait::async_trait;
use engram_core::{Error, MemoryId, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Metadata stored alongside a vector entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub user_id: String,
    pub category: String,
}

/// Filter applied during nearest-neighbor search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorFilter {
    pub user_id: String,
    pub categories: Option<Vec<String>>,
}

impl VectorFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            categories: None,
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    fn matches(&self, meta: &VectorMetadata) -> bool {
        meta.user_id == self.user_id
            && self
                .categories
                .as_ref()
                .is_none_or(|cats| cats.contains(&meta.category))
    }
}

/// One nearest-neighbor match
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorMatch {
    pub id: MemoryId,
    pub score: f32,
}

/// Contract for the similarity-oriented store
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the vector for a memory
    async fn upsert(&self, id: MemoryId, vector: Vec<f32>, meta: VectorMetadata) -> Result<()>;

    /// Remove a vector entry; returns false if it did not exist
    async fn delete(&self, id: MemoryId) -> Result<bool>;

    /// Nearest neighbors of `vector`, scoped by the filter
    ///
    /// Returns at most `top_k` matches ordered by descending similarity;
    /// no match below `threshold` is ever returned.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &VectorFilter,
        threshold: f32,
    ) -> Result<Vec<VectorMatch>>;
}

// ============== Similarity Math ==============

/// Cosine similarity between two vectors, in [-1, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Normalize a vector in-place to unit length
pub fn normalize(v: &mut [f32]) {
    let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in v.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Rank candidate entries against a query vector
///
/// Pure scoring core of the in-memory store: applies the threshold,
/// orders by descending similarity, truncates to `top_k`.
pub fn rank_entries<'a, I>(query: &[f32], entries: I, top_k: usize, threshold: f32) -> Vec<VectorMatch>
where
    I: IntoIterator<Item = (MemoryId, &'a [f32])>,
{
    let mut matches: Vec<VectorMatch> = entries
        .into_iter()
        .map(|(id, v)| VectorMatch {
            id,
            score: cosine_similarity(query, v),
        })
        .filter(|m| m.score >= threshold)
        .collect();

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches.truncate(top_k);
    matches
}

/// In-memory vector store for tests and embedded deployments
///
/// Brute-force cosine ranking; fine at the scale a single user's concept
/// set reaches.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<MemoryId, (Vec<f32>, VectorMetadata)>>,
}

impl InMemoryVectorStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors (test helper)
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True if no vectors are stored
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, id: MemoryId, vector: Vec<f32>, meta: VectorMetadata) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::Validation("vector must not be empty".to_string()));
        }
        let mut entries = self.entries.write().await;
        debug!("Upserted vector for {} ({} dims)", id, vector.len());
        entries.insert(id, (vector, meta));
        Ok(())
    }

    async fn delete(&self, id: MemoryId) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(&id).is_some())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &VectorFilter,
        threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        let entries = self.entries.read().await;
        if let Some((_, (stored, _))) = entries.iter().next() {
            if stored.len() != vector.len() {
                return Err(Error::DimensionMismatch {
                    expected: stored.len(),
                    got: vector.len(),
                });
            }
        }
        Ok(rank_entries(
            vector,
            entries
                .iter()
                .filter(|(_, (_, meta))| filter.matches(meta))
                .map(|(id, (v, _))| (*id, v.as_slice())),
            top_k,
            threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn meta(user: &str) -> VectorMetadata {
        VectorMetadata {
            user_id: user.to_string(),
            category: "general".to_string(),
        }
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_rank_entries_orders_and_thresholds() {
        let query = vec![1.0, 0.0];
        let identical = (MemoryId::new(), vec![1.0, 0.0]);
        let close = (MemoryId::new(), vec![0.9, 0.1]);
        let orthogonal = (MemoryId::new(), vec![0.0, 1.0]);

        let entries = [&identical, &close, &orthogonal]
            .map(|(id, v)| (*id, v.as_slice()));

        let ranked = rank_entries(&query, entries, 10, 0.5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, identical.0);
        assert_eq!(ranked[1].id, close.0);
        assert!(ranked.iter().all(|m| m.score >= 0.5));
    }

    proptest! {
        /// Raising the threshold never grows the result set, and no
        /// returned score falls below the threshold.
        #[test]
        fn prop_threshold_monotonicity(
            vectors in prop::collection::vec(
                prop::collection::vec(-1.0f32..1.0, 4),
                1..20,
            ),
            query in prop::collection::vec(-1.0f32..1.0, 4),
            low in -1.0f32..0.5,
            delta in 0.0f32..0.5,
        ) {
            let ids: Vec<MemoryId> = vectors.iter().map(|_| MemoryId::new()).collect();
            let entries = || {
                ids.iter()
                    .zip(vectors.iter())
                    .map(|(id, v)| (*id, v.as_slice()))
            };
            let high = low + delta;

            let loose = rank_entries(&query, entries(), usize::MAX, low);
            let strict = rank_entries(&query, entries(), usize::MAX, high);

            prop_assert!(strict.len() <= loose.len());
            prop_assert!(loose.iter().all(|m| m.score >= low));
            prop_assert!(strict.iter().all(|m| m.score >= high));
            for m in &strict {
                prop_assert!(loose.iter().any(|l| l.id == m.id));
            }
        }
    }

    #[tokio::test]
    async fn test_upsert_query_delete() {
        let store = InMemoryVectorStore::new();
        let id = MemoryId::new();
        store
            .upsert(id, vec![1.0, 0.0], meta("u1"))
            .await
            .unwrap();

        let matches = store
            .query(&[1.0, 0.0], 5, &VectorFilter::for_user("u1"), 0.5)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, id);

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_query_scoped_by_user_and_category() {
        let store = InMemoryVectorStore::new();
        let mine = MemoryId::new();
        let theirs = MemoryId::new();
        let food = MemoryId::new();

        store.upsert(mine, vec![1.0, 0.0], meta("u1")).await.unwrap();
        store.upsert(theirs, vec![1.0, 0.0], meta("u2")).await.unwrap();
        store
            .upsert(
                food,
                vec![1.0, 0.0],
                VectorMetadata {
                    user_id: "u1".to_string(),
                    category: "food".to_string(),
                },
            )
            .await
            .unwrap();

        let all_mine = store
            .query(&[1.0, 0.0], 10, &VectorFilter::for_user("u1"), 0.0)
            .await
            .unwrap();
        assert_eq!(all_mine.len(), 2);

        let food_only = store
            .query(
                &[1.0, 0.0],
                10,
                &VectorFilter::for_user("u1").with_categories(["food"]),
                0.0,
            )
            .await
            .unwrap();
        assert_eq!(food_only.len(), 1);
        assert_eq!(food_only[0].id, food);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(MemoryId::new(), vec![1.0, 0.0, 0.0], meta("u1"))
            .await
            .unwrap();

        let result = store
            .query(&[1.0, 0.0], 5, &VectorFilter::for_user("u1"), 0.0)
            .await;
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_empty_vector_rejected() {
        let store = InMemoryVectorStore::new();
        let result = store.upsert(MemoryId::new(), vec![], meta("u1")).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
