use async_trait::async_trait;
use replica_common::{ReplicaError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Signature name -> feature vector
pub type Signatures = HashMap<String, Vec<f32>>;

/// Turns raw image bytes into named feature vectors
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Names of the signatures `extract` produces
    fn signature_names(&self) -> Vec<String>;

    /// Compute every signature for one image
    async fn extract(&self, image: &[u8]) -> Result<Signatures>;
}

/// Several extractors behind one [`FeatureExtractor`]
///
/// Signature names must be unique across registered extractors.
#[derive(Default)]
pub struct ExtractorSet {
    extractors: Vec<Arc<dyn FeatureExtractor>>,
}

impl ExtractorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extractor, rejecting signature names that are already provided
    pub fn register(&mut self, extractor: Arc<dyn FeatureExtractor>) -> Result<()> {
        let existing: HashSet<String> = self.signature_names().into_iter().collect();
        if let Some(name) = extractor
            .signature_names()
            .into_iter()
            .find(|name| existing.contains(name))
        {
            return Err(ReplicaError::invalid_input(format!(
                "Signature {} is already provided by another extractor",
                name
            )));
        }

        self.extractors.push(extractor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

#[async_trait]
impl FeatureExtractor for ExtractorSet {
    fn signature_names(&self) -> Vec<String> {
        self.extractors
            .iter()
            .flat_map(|extractor| extractor.signature_names())
            .collect()
    }

    async fn extract(&self, image: &[u8]) -> Result<Signatures> {
        let mut signatures = Signatures::new();
        for extractor in &self.extractors {
            let produced = extractor.extract(image).await?;
            for name in extractor.signature_names() {
                if !produced.contains_key(&name) {
                    return Err(ReplicaError::extraction(format!(
                        "Extractor did not produce signature {}",
                        name
                    )));
                }
            }
            signatures.extend(produced);
        }

        debug!("Extracted {} signatures", signatures.len());
        Ok(signatures)
    }
}

/// Reads precomputed signatures from a JSON object `{"name": [f32, ...]}`
#[derive(Debug, Clone)]
pub struct JsonSignatureExtractor {
    names: Vec<String>,
}

impl JsonSignatureExtractor {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl FeatureExtractor for JsonSignatureExtractor {
    fn signature_names(&self) -> Vec<String> {
        self.names.clone()
    }

    async fn extract(&self, image: &[u8]) -> Result<Signatures> {
        let mut decoded: Signatures = serde_json::from_slice(image)
            .map_err(|e| ReplicaError::extraction(format!("Undecodable signature payload: {}", e)))?;

        let mut signatures = Signatures::new();
        for name in &self.names {
            let vector = decoded
                .remove(name)
                .ok_or_else(|| ReplicaError::extraction(format!("Missing signature {}", name)))?;
            signatures.insert(name.clone(), vector);
        }
        Ok(signatures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_extractor() {
        let extractor = JsonSignatureExtractor::new(["fc6"]);
        let signatures = extractor
            .extract(br#"{"fc6": [1.0, 2.0], "fc7": [3.0]}"#)
            .await
            .unwrap();
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures["fc6"], vec![1.0, 2.0]);

        assert!(matches!(
            extractor.extract(b"not json").await,
            Err(ReplicaError::Extraction(_))
        ));
        assert!(matches!(
            extractor.extract(br#"{"fc7": [3.0]}"#).await,
            Err(ReplicaError::Extraction(_))
        ));
    }

    #[tokio::test]
    async fn test_extractor_set_merges_and_rejects_duplicates() {
        let mut set = ExtractorSet::new();
        set.register(Arc::new(JsonSignatureExtractor::new(["fc6"])))
            .unwrap();
        set.register(Arc::new(JsonSignatureExtractor::new(["fc7"])))
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.signature_names(), vec!["fc6", "fc7"]);

        let err = set
            .register(Arc::new(JsonSignatureExtractor::new(["fc7", "fc8"])))
            .unwrap_err();
        assert!(matches!(err, ReplicaError::InvalidInput(_)));
        assert_eq!(set.len(), 2);

        let signatures = set
            .extract(br#"{"fc6": [1.0], "fc7": [2.0]}"#)
            .await
            .unwrap();
        assert_eq!(signatures["fc6"], vec![1.0]);
        assert_eq!(signatures["fc7"], vec![2.0]);
    }
}
