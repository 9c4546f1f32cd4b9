//! Frontier differ
//!
//! Compares the discovered frontier against persisted watermarks. Everything
//! is keyed through `BTreeMap`s so the result depends only on the contents of
//! the inputs, never on their order.

use crate::frontier::{FrontierItem, ProcessedRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// The work queue for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierDiff {
    /// Items to fetch, sorted by id
    pub to_fetch: Vec<FrontierItem>,

    /// Ids whose derived records must be deleted before re-fetching, sorted
    pub to_retire: Vec<String>,

    /// Discovered ids that are fresh and left alone this run
    pub skipped: usize,
}

impl FrontierDiff {
    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty()
    }
}

/// Computes which discovered items need (re-)fetching
///
/// An item is fetched when it has no watermark, when its remote version
/// differs from the watermark, or when the watermark is older than
/// `staleness_threshold`. Items that already have a watermark and are fetched
/// again are also listed in `to_retire`.
///
/// # Arguments
///
/// * `discovered` - Items enumerated by discovery
/// * `processed` - Watermarks loaded from the store
/// * `staleness_threshold` - Age after which a watermark no longer counts
/// * `now` - Reference time for staleness
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use crag_harvest::frontier::{diff, FrontierItem};
///
/// let item = FrontierItem::new("101", "https://example.com/route/101", "routes-1", "2024-01-01");
/// let result = diff(&[item], &[], Duration::days(30), Utc::now());
/// assert_eq!(result.to_fetch.len(), 1);
/// assert!(result.to_retire.is_empty());
/// ```
pub fn diff(
    discovered: &[FrontierItem],
    processed: &[ProcessedRecord],
    staleness_threshold: chrono::Duration,
    now: DateTime<Utc>,
) -> FrontierDiff {
    let latest = latest_items(discovered);
    let watermarks = latest_watermarks(processed);

    let mut result = FrontierDiff::default();

    for (id, item) in latest {
        match watermarks.get(id) {
            None => result.to_fetch.push(item.clone()),
            Some(watermark) => {
                let changed = watermark.remote_version != item.remote_version;
                let stale = watermark.is_stale(staleness_threshold, now);

                if changed || stale {
                    tracing::trace!(id, changed, stale, "Item selected for re-fetch");
                    result.to_fetch.push(item.clone());
                    result.to_retire.push(id.to_string());
                } else {
                    result.skipped += 1;
                }
            }
        }
    }

    result
}

/// Collapses duplicate ids, keeping the greatest `(remote_version, locator)`
fn latest_items(discovered: &[FrontierItem]) -> BTreeMap<&str, &FrontierItem> {
    let mut latest: BTreeMap<&str, &FrontierItem> = BTreeMap::new();

    for item in discovered {
        latest
            .entry(item.id.as_str())
            .and_modify(|current| {
                if (item.remote_version.as_str(), item.locator.as_str())
                    > (current.remote_version.as_str(), current.locator.as_str())
                {
                    *current = item;
                }
            })
            .or_insert(item);
    }

    latest
}

/// Collapses duplicate watermarks, keeping the most recent one
fn latest_watermarks(processed: &[ProcessedRecord]) -> BTreeMap<&str, &ProcessedRecord> {
    let mut latest: BTreeMap<&str, &ProcessedRecord> = BTreeMap::new();

    for record in processed {
        latest
            .entry(record.id.as_str())
            .and_modify(|current| {
                if (record.processed_at, record.remote_version.as_str())
                    > (current.processed_at, current.remote_version.as_str())
                {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    latest
}
