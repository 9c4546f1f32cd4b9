//! Record extraction
//!
//! An `Extractor` is pure: it decides what to fetch for an item and turns the
//! fetched bodies into a typed record, without any I/O of its own.
//!
//! - `RouteExtractor`: route detail pages (HTML)
//! - `StatsExtractor`: per-route stats from the paginated JSON API
//! - `LabelTable`: maps free-text section titles onto output buckets

mod classify;
mod route;
mod stats;

pub use classify::{Bucket, LabelTable, Sections};
pub use route::{RouteExtractor, RouteRecord};
pub use stats::{StatCategory, StatCounts, StatEntry, StatsExtractor, StatsRecord};

use crate::crawler::{FetchPlan, RawDocument};
use crate::frontier::FrontierItem;
use thiserror::Error;

/// A required field could not be extracted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to extract {field} for item {id}: {reason}")]
pub struct ParseFailure {
    pub id: String,
    pub field: String,
    pub reason: String,
}

impl ParseFailure {
    pub fn new(id: &str, field: &str, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Typed payload of an extracted record
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    Route(RouteRecord),
    Stats(StatsRecord),
}

/// A record ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord {
    pub id: String,
    pub locator: String,
    pub remote_version: String,
    pub payload: RecordPayload,
}

/// Turns fetched documents into records
pub trait Extractor: Send + Sync + 'static {
    /// Name of the record kind, also used as the watermark namespace
    fn kind(&self) -> &'static str;

    /// What has to be fetched for `item`
    fn plan(&self, item: &FrontierItem) -> FetchPlan {
        FetchPlan::single(&item.locator)
    }

    /// Extracts a record from the fetched document
    fn extract(
        &self,
        document: &RawDocument,
        item: &FrontierItem,
    ) -> Result<ExtractedRecord, ParseFailure>;
}

/// Collapses every run of whitespace into a single space and trims the ends
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
