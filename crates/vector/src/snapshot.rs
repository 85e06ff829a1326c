use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use replica_common::{ReplicaError, Result};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::ranker::{Ranker, ScoredKey};
use crate::types::VectorSnapshot;

/// Immutable search structure over the vectors present at build time
#[derive(Debug)]
pub struct IndexSnapshot {
    id: Uuid,
    generation: u64,
    built_at: DateTime<Utc>,
    keys: Vec<String>,
    positions: HashMap<String, usize>,
    vectors: Array2<f32>,
}

impl IndexSnapshot {
    pub fn new(space: VectorSnapshot, generation: u64) -> Self {
        let (keys, vectors) = space.into_parts();
        let positions = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), i))
            .collect();

        Self {
            id: Uuid::new_v4(),
            generation,
            built_at: Utc::now(),
            keys,
            positions,
            vectors,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of successful rebuilds that led to this snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    /// First of `keys` this snapshot does not know
    pub fn first_missing<'a, I>(&self, keys: I) -> Option<&'a String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        keys.into_iter().find(|key| !self.contains(key))
    }

    /// Rank the snapshot's items for a relevance query
    pub fn search(
        &self,
        ranker: &Ranker,
        positive: &[String],
        negative: &[String],
        k: usize,
    ) -> Result<Vec<ScoredKey>> {
        if let Some(missing) = self.first_missing(positive.iter().chain(negative)) {
            return Err(ReplicaError::stale_index(missing.as_str()));
        }

        let scores = ranker.score_with_negatives(positive, negative, &self.keys, self.vectors())?;
        debug!(
            "Snapshot {} (generation {}) ranked {} items",
            self.id,
            self.generation,
            scores.len()
        );
        Ok(scores.top_k(k))
    }
}

/// Turns a point-in-time copy of the store into a snapshot
///
/// Runs on a blocking worker, outside every scheduler lock.
pub trait SnapshotBuilder: Send + Sync {
    fn build(&self, space: VectorSnapshot, generation: u64) -> Result<IndexSnapshot>;
}

/// Keeps the full dense matrix, ranked by brute force at query time
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseSnapshotBuilder;

impl SnapshotBuilder for DenseSnapshotBuilder {
    fn build(&self, space: VectorSnapshot, generation: u64) -> Result<IndexSnapshot> {
        if space.vectors().iter().any(|v| !v.is_finite()) {
            return Err(ReplicaError::rebuild_failed(
                "vector space contains non-finite values",
            ));
        }

        Ok(IndexSnapshot::new(space, generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn snapshot() -> IndexSnapshot {
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let vectors = array![[1.0f32, 0.0], [0.0, 1.0], [0.9, 0.1]];
        DenseSnapshotBuilder
            .build(VectorSnapshot::new(keys, vectors), 3)
            .unwrap()
    }

    #[test]
    fn test_build_keeps_rows() {
        let snapshot = snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.generation(), 3);
        assert!(snapshot.contains("b"));
        assert!(!snapshot.contains("d"));
        assert_eq!(snapshot.vectors().row(2).to_vec(), vec![0.9, 0.1]);
    }

    #[test]
    fn test_search_ranks_neighbour_first() {
        let snapshot = snapshot();
        let hits = snapshot
            .search(&Ranker::default(), &["a".to_string()], &[], 2)
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "a");
        assert_eq!(hits[1].key, "c");
    }

    #[test]
    fn test_search_reports_stale_keys() {
        let snapshot = snapshot();
        let result = snapshot.search(
            &Ranker::default(),
            &["a".to_string()],
            &["new".to_string()],
            2,
        );
        assert!(matches!(result, Err(ReplicaError::StaleIndex(key)) if key == "new"));
    }
}
