use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Opaque per-item document, decoded only at the system boundary
pub type Metadata = serde_json::Value;

/// Stored item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Unique key (e.g. image URL)
    pub key: String,

    /// Feature vector, always of the store dimension
    pub vector: Vec<f32>,

    /// Caller-owned metadata
    pub metadata: Metadata,

    /// Timestamp when inserted
    pub inserted_at: DateTime<Utc>,
}

/// Point-in-time copy of every key and vector in a store
///
/// Row `i` of `vectors` belongs to `keys[i]`; rows follow insertion order.
#[derive(Debug, Clone)]
pub struct VectorSnapshot {
    keys: Vec<String>,
    vectors: Array2<f32>,
}

impl VectorSnapshot {
    pub(crate) fn new(keys: Vec<String>, vectors: Array2<f32>) -> Self {
        debug_assert_eq!(keys.len(), vectors.nrows());
        Self { keys, vectors }
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

    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn into_parts(self) -> (Vec<String>, Array2<f32>) {
        (self.keys, self.vectors)
    }
}

/// Relevance search request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Keys marked relevant
    pub positive: Vec<String>,

    /// Keys marked irrelevant
    #[serde(default)]
    pub negative: Vec<String>,

    /// Maximum number of results (configured default when absent)
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn positive<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            positive: keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_negative<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.negative = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Item key
    pub key: String,

    /// Relevance score, only comparable within one query
    pub score: f64,

    /// Current metadata of the item
    pub metadata: Metadata,
}

impl SearchResult {
    pub fn new(key: String, score: f64, metadata: Metadata) -> Self {
        Self {
            key,
            score,
            metadata,
        }
    }
}
