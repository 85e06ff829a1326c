use ndarray::Array2;
use replica_common::{ReplicaError, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{Item, Metadata, VectorSnapshot};

/// Authoritative set of items with a dense key -> position index
///
/// All mutations take the write lock, so readers see either the state before
/// or after a removal's reindexing, never a half-shifted index.
pub struct VectorStore {
    dimension: usize,
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    items: Vec<Item>,
    positions: HashMap<String, usize>,
}

impl StoreInner {
    fn get(&self, key: &str) -> Option<&Item> {
        self.positions.get(key).map(|&position| &self.items[position])
    }

    fn push(&mut self, item: Item) {
        self.positions.insert(item.key.clone(), self.items.len());
        self.items.push(item);
    }

    /// Remove `key` and shift every later position down by one
    fn remove(&mut self, key: &str) -> Option<Item> {
        let position = self.positions.remove(key)?;
        let item = self.items.remove(position);

        for moved in &self.items[position..] {
            if let Some(slot) = self.positions.get_mut(&moved.key) {
                *slot -= 1;
            }
        }

        Some(item)
    }
}

impl VectorStore {
    /// Create an empty store holding vectors of `dimension` components
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(ReplicaError::invalid_input("Vector dimension cannot be 0"));
        }

        Ok(Self {
            dimension,
            inner: RwLock::new(StoreInner::default()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert a new item
    pub async fn insert(
        &self,
        key: impl Into<String>,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Result<()> {
        let key = key.into();
        self.check_vector(&vector)?;

        let mut inner = self.inner.write().await;
        if inner.positions.contains_key(&key) {
            return Err(ReplicaError::duplicate_key(key));
        }

        debug!("Inserting item {} at position {}", key, inner.items.len());
        inner.push(Item {
            key,
            vector,
            metadata,
            inserted_at: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Remove an item, returning it
    pub async fn remove(&self, key: &str) -> Result<Item> {
        let mut inner = self.inner.write().await;
        let item = inner
            .remove(key)
            .ok_or_else(|| ReplicaError::not_found(key))?;

        debug!(
            "Removed item {} inserted at {} ({} remaining)",
            key,
            item.inserted_at,
            inner.items.len()
        );
        Ok(item)
    }

    /// Vector and metadata of an item
    pub async fn lookup(&self, key: &str) -> Result<(Vec<f32>, Metadata)> {
        let inner = self.inner.read().await;
        inner
            .get(key)
            .map(|item| (item.vector.clone(), item.metadata.clone()))
            .ok_or_else(|| ReplicaError::not_found(key))
    }

    /// Metadata of an item, without copying its vector
    pub async fn metadata(&self, key: &str) -> Result<Metadata> {
        let inner = self.inner.read().await;
        inner
            .get(key)
            .map(|item| item.metadata.clone())
            .ok_or_else(|| ReplicaError::not_found(key))
    }

    /// Replace the metadata of an item in place
    pub async fn update_metadata(&self, key: &str, metadata: Metadata) -> Result<()> {
        let mut inner = self.inner.write().await;
        let position = *inner
            .positions
            .get(key)
            .ok_or_else(|| ReplicaError::not_found(key))?;

        inner.items[position].metadata = metadata;
        Ok(())
    }

    /// Consistent copy of all keys and vectors, in insertion order
    pub async fn snapshot_vectors(&self) -> Result<VectorSnapshot> {
        let inner = self.inner.read().await;
        let keys: Vec<String> = inner.items.iter().map(|item| item.key.clone()).collect();

        let mut flat = Vec::with_capacity(inner.items.len() * self.dimension);
        for item in &inner.items {
            flat.extend_from_slice(&item.vector);
        }
        drop(inner);

        let vectors = Array2::from_shape_vec((keys.len(), self.dimension), flat)
            .map_err(|e| ReplicaError::internal(format!("Corrupted vector layout: {}", e)))?;
        Ok(VectorSnapshot::new(keys, vectors))
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.positions.contains_key(key)
    }

    /// First key of `keys` that is not stored, if any
    pub async fn first_missing<'a, I>(&self, keys: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let inner = self.inner.read().await;
        keys.into_iter()
            .find(|key| !inner.positions.contains_key(key.as_str()))
            .map(String::as_str)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.items.is_empty()
    }

    /// All keys, in insertion order
    pub async fn keys(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.items.iter().map(|item| item.key.clone()).collect()
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(ReplicaError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        if vector.iter().any(|v| !v.is_finite()) {
            return Err(ReplicaError::invalid_input(
                "Vector contains NaN or infinite components",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn assert_dense(store: &VectorStore) {
        let inner = store.inner.read().await;
        assert_eq!(inner.items.len(), inner.positions.len());
        for (position, item) in inner.items.iter().enumerate() {
            assert_eq!(inner.positions[&item.key], position);
        }
    }

    #[tokio::test]
    async fn test_insert_then_lookup() {
        let store = VectorStore::new(2).unwrap();
        store
            .insert("a", vec![1.0, 0.0], json!({"title": "A"}))
            .await
            .unwrap();

        let (vector, metadata) = store.lookup("a").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(metadata, json!({"title": "A"}));
    }

    #[tokio::test]
    async fn test_duplicate_key_leaves_store_unchanged() {
        let store = VectorStore::new(2).unwrap();
        store.insert("a", vec![1.0, 0.0], json!(1)).await.unwrap();
        store.insert("b", vec![0.0, 1.0], json!(2)).await.unwrap();

        let err = store.insert("a", vec![5.0, 5.0], json!(3)).await.unwrap_err();
        assert!(matches!(err, ReplicaError::DuplicateKey(key) if key == "a"));
        assert_eq!(store.len().await, 2);
        assert_eq!(store.lookup("a").await.unwrap(), (vec![1.0, 0.0], json!(1)));
        assert_dense(&store).await;
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let store = VectorStore::new(3).unwrap();
        let err = store.insert("a", vec![1.0], json!(null)).await.unwrap_err();
        assert!(matches!(
            err,
            ReplicaError::DimensionMismatch { expected: 3, actual: 1 }
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_rejects_non_finite_vectors() {
        let store = VectorStore::new(2).unwrap();
        let err = store
            .insert("a", vec![f32::NAN, 0.0], json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_remove_reindexes_later_items() {
        let store = VectorStore::new(1).unwrap();
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            store.insert(*key, vec![i as f32], json!(i)).await.unwrap();
        }

        let removed = store.remove("b").await.unwrap();
        assert_eq!(removed.key, "b");
        assert!(removed.inserted_at <= chrono::Utc::now());
        assert_dense(&store).await;

        assert!(matches!(
            store.lookup("b").await,
            Err(ReplicaError::NotFound(_))
        ));
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            if *key == "b" {
                continue;
            }
            assert_eq!(
                store.lookup(key).await.unwrap(),
                (vec![i as f32], json!(i))
            );
        }
        assert_eq!(store.keys().await, vec!["a", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_remove_first_and_last() {
        let store = VectorStore::new(1).unwrap();
        for key in ["a", "b", "c"] {
            store.insert(key, vec![0.0], json!(key)).await.unwrap();
        }

        store.remove("c").await.unwrap();
        store.remove("a").await.unwrap();
        assert_dense(&store).await;
        assert_eq!(store.keys().await, vec!["b"]);

        assert!(matches!(
            store.remove("a").await,
            Err(ReplicaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_metadata_keeps_vector() {
        let store = VectorStore::new(2).unwrap();
        store.insert("a", vec![0.5, 0.5], json!({"v": 1})).await.unwrap();

        store.update_metadata("a", json!({"v": 2})).await.unwrap();
        assert_eq!(
            store.lookup("a").await.unwrap(),
            (vec![0.5, 0.5], json!({"v": 2}))
        );

        assert!(matches!(
            store.update_metadata("zz", json!({})).await,
            Err(ReplicaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_vectors_follows_insertion_order() {
        let store = VectorStore::new(2).unwrap();
        store.insert("x", vec![1.0, 2.0], json!(null)).await.unwrap();
        store.insert("y", vec![3.0, 4.0], json!(null)).await.unwrap();
        store.insert("z", vec![5.0, 6.0], json!(null)).await.unwrap();
        store.remove("y").await.unwrap();

        let snapshot = store.snapshot_vectors().await.unwrap();
        assert_eq!(snapshot.keys(), &["x".to_string(), "z".to_string()]);
        assert_eq!(snapshot.dimension(), 2);
        assert_eq!(snapshot.vectors().row(1).to_vec(), vec![5.0, 6.0]);
    }

    #[tokio::test]
    async fn test_first_missing() {
        let store = VectorStore::new(1).unwrap();
        store.insert("a", vec![0.0], json!(null)).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(store.first_missing(&keys).await, Some("b"));
        assert_eq!(store.first_missing(&keys[..1]).await, None);
    }
}
