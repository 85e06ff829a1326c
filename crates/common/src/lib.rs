//! Replica shared infrastructure
//!
//! Error taxonomy, configuration and logging used by every crate.

pub mod config;
pub mod error;
pub mod logger;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::ReplicaError;
pub type Result<T> = std::result::Result<T, ReplicaError>;
