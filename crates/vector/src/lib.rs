//! Replica vector core
//!
//! Mutable feature-vector store, query-time SVM relevance ranking and the
//! background scheduler that keeps an immutable index snapshot in sync.

pub mod extractor;
pub mod matcher;
pub mod ranker;
pub mod scheduler;
pub mod snapshot;
pub mod store;
mod svm;
pub mod types;

pub use extractor::{ExtractorSet, FeatureExtractor, JsonSignatureExtractor, Signatures};
pub use matcher::Matcher;
pub use ranker::{Gamma, Ranker, RankerParams, ScoreMap, ScoredKey};
pub use scheduler::{CycleOutcome, IndexScheduler, RebuildStats, SchedulerHandle, SchedulerPhase};
pub use snapshot::{DenseSnapshotBuilder, IndexSnapshot, SnapshotBuilder};
pub use store::VectorStore;
pub use types::{Item, Metadata, SearchQuery, SearchResult, VectorSnapshot};
