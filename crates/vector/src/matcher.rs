use replica_common::{AppConfig, ReplicaError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::extractor::FeatureExtractor;
use crate::ranker::{Ranker, RankerParams, ScoredKey};
use crate::scheduler::IndexScheduler;
use crate::snapshot::DenseSnapshotBuilder;
use crate::store::VectorStore;
use crate::types::{Metadata, SearchQuery, SearchResult};

/// Content-based retrieval over one feature signature
///
/// Owns the store, the index scheduler and the extractor; every mutation
/// marks the scheduler dirty.
pub struct Matcher {
    store: Arc<VectorStore>,
    scheduler: Arc<IndexScheduler>,
    extractor: Arc<dyn FeatureExtractor>,
    feature_name: String,
    default_top_k: usize,
}

impl Matcher {
    /// Wire a store and scheduler from configuration
    pub fn new(config: &AppConfig, extractor: Arc<dyn FeatureExtractor>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(VectorStore::new(config.dimension)?);
        let scheduler = Arc::new(IndexScheduler::new(
            Arc::clone(&store),
            Arc::new(DenseSnapshotBuilder),
            Ranker::new(RankerParams::from_config(config)),
            config.rebuild_period(),
        ));

        Self::from_parts(
            store,
            scheduler,
            extractor,
            config.feature_name.clone(),
            config.default_top_k,
        )
    }

    /// Assemble from existing parts
    pub fn from_parts(
        store: Arc<VectorStore>,
        scheduler: Arc<IndexScheduler>,
        extractor: Arc<dyn FeatureExtractor>,
        feature_name: impl Into<String>,
        default_top_k: usize,
    ) -> Result<Self> {
        let feature_name = feature_name.into();
        if !extractor.signature_names().contains(&feature_name) {
            return Err(ReplicaError::config(format!(
                "Extractor does not provide signature {}",
                feature_name
            )));
        }

        let params = scheduler.ranker().params();
        info!(
            "Matcher initialized - signature {}, dimension {}, rebuild every {:?}, nu {}, C {}",
            feature_name,
            store.dimension(),
            scheduler.period(),
            params.nu,
            params.c
        );

        Ok(Self {
            store,
            scheduler,
            extractor,
            feature_name,
            default_top_k,
        })
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<IndexScheduler> {
        &self.scheduler
    }

    pub fn feature_name(&self) -> &str {
        &self.feature_name
    }

    /// Extract features from an image and store it
    ///
    /// Nothing is stored when extraction fails.
    pub async fn add_image(
        &self,
        key: impl Into<String>,
        image: &[u8],
        metadata: Metadata,
    ) -> Result<()> {
        let key = key.into();
        if self.store.contains(&key).await {
            return Err(ReplicaError::duplicate_key(key));
        }

        let mut signatures = self.extractor.extract(image).await?;
        let vector = signatures.remove(&self.feature_name).ok_or_else(|| {
            ReplicaError::extraction(format!("Signature {} was not produced", self.feature_name))
        })?;

        self.add_vector(key, vector, metadata).await
    }

    /// Store a precomputed feature vector
    pub async fn add_vector(
        &self,
        key: impl Into<String>,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Result<()> {
        let key = key.into();
        self.store.insert(key.clone(), vector, metadata).await?;
        self.scheduler.ask_for_rebuild().await;

        info!("Item added: {}", key);
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Metadata> {
        self.store.metadata(key).await
    }

    pub async fn update_metadata(&self, key: &str, metadata: Metadata) -> Result<()> {
        self.store.update_metadata(key, metadata).await?;
        self.scheduler.ask_for_rebuild().await;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(key).await?;
        self.scheduler.ask_for_rebuild().await;

        info!("Item removed: {}", key);
        Ok(())
    }

    /// Rank stored items by relevance to the query's examples
    ///
    /// Served from the index snapshot when it knows every example; otherwise
    /// a rebuild is requested and the live vectors are ranked instead.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        if query.positive.is_empty() {
            return Err(ReplicaError::EmptyPositiveSet);
        }
        if let Some(missing) = self
            .store
            .first_missing(query.positive.iter().chain(&query.negative))
            .await
        {
            return Err(ReplicaError::not_found(missing));
        }

        let limit = query.limit.unwrap_or(self.default_top_k);
        debug!(
            "Searching: {} positive, {} negative, limit {}",
            query.positive.len(),
            query.negative.len(),
            limit
        );

        let hits = match self
            .scheduler
            .search(&query.positive, &query.negative, limit)
            .await
        {
            Ok(hits) => hits,
            Err(err) if err.is_recoverable() => {
                warn!("{} - ranking live vectors", err);
                self.scheduler.ask_for_rebuild().await;
                self.scheduler
                    .search_live(&query.positive, &query.negative, limit)
                    .await?
            }
            Err(err) => return Err(err),
        };

        self.attach_metadata(hits).await
    }

    async fn attach_metadata(&self, hits: Vec<ScoredKey>) -> Result<Vec<SearchResult>> {
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.metadata(&hit.key).await {
                Ok(metadata) => results.push(SearchResult::new(hit.key, hit.score, metadata)),
                // removed after the snapshot was built
                Err(ReplicaError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }
}
