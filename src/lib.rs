//! Crag-Harvest: an incremental, rate-limited route harvester
//!
//! This crate discovers route pages from a sitemap, diffs them against what
//! has already been harvested, fetches only new or stale items under a global
//! rate limit, extracts structured records and persists them in atomic batches.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod frontier;
pub mod output;
pub mod storage;

use thiserror::Error;

/// Main error type for Crag-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Discovery failed for {locator}: {message}")]
    Discovery { locator: String, message: String },

    #[error("Fetch worker failed: {0}")]
    Worker(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read label table: {0}")]
    Csv(#[from] csv::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Crag-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run, Coordinator, FetchOutcome, RateLimiter};
pub use extract::{ExtractedRecord, Extractor, ParseFailure, RecordPayload};
pub use frontier::{diff, FrontierDiff, FrontierItem, ProcessedRecord};
pub use output::{ProgressTracker, RunSummary};
