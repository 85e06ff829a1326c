use crate::error::ReplicaError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for every environment variable read by [`AppConfig`]
const ENV_PREFIX: &str = "REPLICA";

/// Replica application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log directory
    pub log_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Signature name whose vectors populate the store
    pub feature_name: String,

    /// Fixed vector dimension of the store
    pub dimension: usize,

    /// Seconds between two index rebuild checks
    pub rebuild_period_secs: u64,

    /// Result count when a search does not ask for one
    pub default_top_k: usize,

    /// One-class SVM `nu` (upper bound on the outlier fraction)
    pub one_class_nu: f64,

    /// Binary SVM penalty `C`
    pub svm_c: f64,

    /// SMO stopping tolerance
    pub svm_tolerance: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./data/log"),
            log_level: "info".to_string(),
            feature_name: "VGG16_center_fc7".to_string(),
            dimension: 4096,
            rebuild_period_secs: 15 * 60,
            default_top_k: 30,
            one_class_nu: 0.5,
            svm_c: 100.0,
            svm_tolerance: 1e-3,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self, ReplicaError> {
        // Load .env file (ignore if not exists)
        let _ = dotenv::dotenv();

        let defaults = Self::default();
        let config = Self {
            log_dir: Self::env_var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            log_level: Self::env_var("LOG_LEVEL").unwrap_or(defaults.log_level),
            feature_name: Self::env_var("FEATURE_NAME").unwrap_or(defaults.feature_name),
            dimension: Self::env_parse("DIMENSION")?.unwrap_or(defaults.dimension),
            rebuild_period_secs: Self::env_parse("REBUILD_PERIOD_SECS")?
                .unwrap_or(defaults.rebuild_period_secs),
            default_top_k: Self::env_parse("DEFAULT_TOP_K")?.unwrap_or(defaults.default_top_k),
            one_class_nu: Self::env_parse("ONE_CLASS_NU")?.unwrap_or(defaults.one_class_nu),
            svm_c: Self::env_parse("SVM_C")?.unwrap_or(defaults.svm_c),
            svm_tolerance: Self::env_parse("SVM_TOLERANCE")?.unwrap_or(defaults.svm_tolerance),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, with `REPLICA_*` variables layered on top
    pub fn from_file(path: &Path) -> Result<Self, ReplicaError> {
        Self::load(path, ::config::Environment::with_prefix(ENV_PREFIX))
    }

    fn load(path: &Path, environment: ::config::Environment) -> Result<Self, ReplicaError> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn env_var(key: &str) -> Option<String> {
        std::env::var(format!("{}_{}", ENV_PREFIX, key)).ok()
    }

    fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ReplicaError> {
        match Self::env_var(key) {
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                ReplicaError::config(format!("{}_{} has an invalid value: {}", ENV_PREFIX, key, raw))
            }),
            None => Ok(None),
        }
    }

    /// Interval between two rebuild checks
    pub fn rebuild_period(&self) -> Duration {
        Duration::from_secs(self.rebuild_period_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ReplicaError> {
        if self.feature_name.is_empty() {
            return Err(ReplicaError::config("Feature name cannot be empty"));
        }

        if self.dimension == 0 {
            return Err(ReplicaError::config("Vector dimension cannot be 0"));
        }

        if self.rebuild_period_secs == 0 {
            return Err(ReplicaError::config("Rebuild period cannot be 0"));
        }

        if self.default_top_k == 0 {
            return Err(ReplicaError::config("Default top-k cannot be 0"));
        }

        if !(self.one_class_nu > 0.0 && self.one_class_nu <= 1.0) {
            return Err(ReplicaError::config(format!(
                "One-class nu must be in (0, 1], got {}",
                self.one_class_nu
            )));
        }

        if !(self.svm_c > 0.0) || !(self.svm_tolerance > 0.0) {
            return Err(ReplicaError::config("SVM C and tolerance must be positive"));
        }

        Ok(())
    }
}
