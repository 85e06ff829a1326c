/// Replica error types
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// Key already present in the store
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Key absent from the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Vector length differs from the store dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Ranking requested without any positive example
    #[error("Positive key set is empty")]
    EmptyPositiveSet,

    /// Ranking key missing from the vector space being scored
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    /// No index snapshot has been built yet
    #[error("Index unavailable: no snapshot has been built yet")]
    IndexUnavailable,

    /// Current snapshot does not know the requested key
    #[error("Stale index: key {0} is not in the current snapshot")]
    StaleIndex(String),

    /// Snapshot rebuild failed
    #[error("Index rebuild failed: {0}")]
    RebuildFailed(String),

    /// Feature extraction failed
    #[error("Feature extraction error: {0}")]
    Extraction(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General error (anyhow integration)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReplicaError {
    pub fn duplicate_key<S: Into<String>>(key: S) -> Self {
        Self::DuplicateKey(key.into())
    }

    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound(key.into())
    }

    pub fn unknown_key<S: Into<String>>(key: S) -> Self {
        Self::UnknownKey(key.into())
    }

    pub fn stale_index<S: Into<String>>(key: S) -> Self {
        Self::StaleIndex(key.into())
    }

    pub fn rebuild_failed<S: Into<String>>(msg: S) -> Self {
        Self::RebuildFailed(msg.into())
    }

    pub fn extraction<S: Into<String>>(msg: S) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Errors a caller can clear by requesting a rebuild and retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::IndexUnavailable | Self::StaleIndex(_))
    }

    /// HTTP-style status code for transport layers
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_)
            | Self::DimensionMismatch { .. }
            | Self::EmptyPositiveSet
            | Self::UnknownKey(_)
            | Self::Json(_) => 400,
            Self::NotFound(_) => 404,
            Self::DuplicateKey(_) => 409,
            Self::Extraction(_) => 422,
            Self::IndexUnavailable | Self::StaleIndex(_) => 503,
            Self::RebuildFailed(_)
            | Self::Config(_)
            | Self::Internal(_)
            | Self::Io(_)
            | Self::Other(_) => 500,
        }
    }
}

impl From<::config::ConfigError> for ReplicaError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ReplicaError::duplicate_key("a").status_code(), 409);
        assert_eq!(ReplicaError::not_found("a").status_code(), 404);
        assert_eq!(ReplicaError::EmptyPositiveSet.status_code(), 400);
        assert_eq!(ReplicaError::IndexUnavailable.status_code(), 503);
        assert_eq!(
            ReplicaError::DimensionMismatch { expected: 2, actual: 3 }.status_code(),
            400
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(ReplicaError::IndexUnavailable.is_recoverable());
        assert!(ReplicaError::stale_index("k").is_recoverable());
        assert!(!ReplicaError::rebuild_failed("boom").is_recoverable());
        assert!(!ReplicaError::not_found("k").is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = ReplicaError::DimensionMismatch { expected: 4, actual: 2 };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 4, got 2");
    }
}
