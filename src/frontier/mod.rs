//! Frontier module: what exists remotely and what still needs harvesting
//!
//! - `FrontierItem`: one fetchable item discovered from the sitemap
//! - `ProcessedRecord`: the watermark left behind once an item is harvested
//! - `diff`: turns discovered items and watermarks into the work queue
//! - discovery sources that enumerate the frontier

mod differ;
mod discovery;

pub use differ::{diff, FrontierDiff};
pub use discovery::{
    extract_item_id, parse_sitemap, DiscoverySource, SitemapDiscovery, SitemapDocument,
    SitemapEntry, StaticFrontier,
};

use chrono::{DateTime, Utc};

/// A known-fetchable item, uniquely keyed by `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierItem {
    /// Stable identifier (the numeric page id of the route)
    pub id: String,

    /// Fetchable address
    pub locator: String,

    /// The sub-sitemap this item was listed in
    pub source_group: String,

    /// Remote last-modified marker, compared verbatim
    pub remote_version: String,
}

impl FrontierItem {
    pub fn new(
        id: impl Into<String>,
        locator: impl Into<String>,
        source_group: impl Into<String>,
        remote_version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            source_group: source_group.into(),
            remote_version: remote_version.into(),
        }
    }
}

/// Watermark of work already durably written for an `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub id: String,
    pub remote_version: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedRecord {
    /// Returns true once the watermark is older than `threshold` at `now`
    pub fn is_stale(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.processed_at) > threshold
    }
}
