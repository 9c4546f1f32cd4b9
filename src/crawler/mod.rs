//! Crawler module for rate-limited, incremental fetching
//!
//! This module contains the fetch side of a harvest run:
//! - The shared rolling-window rate limiter
//! - Document sources (HTTP and test doubles)
//! - The fetch executor with bounded concurrency and retries
//! - Overall run coordination

mod coordinator;
mod executor;
mod rate_limiter;
mod source;

#[cfg(test)]
pub(crate) mod testutil;

pub use coordinator::{run, Coordinator};
pub use executor::{
    DocumentPart, FetchExecutor, FetchOutcome, FetchPlan, Pagination, PlannedPart, RawDocument,
    RetryPolicy,
};
pub use rate_limiter::RateLimiter;
pub use source::{build_http_client, DocumentSource, HttpSource, SourceResponse};
