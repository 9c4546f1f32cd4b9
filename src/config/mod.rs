//! Configuration module for Crag-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use crag_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Rate limit: {} calls", config.harvest.rate_limit.calls);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ClassifyConfig, Config, HarvestConfig, NotFoundPolicy, OutputConfig, RateLimitConfig,
    SourceConfig, SourceKind, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
