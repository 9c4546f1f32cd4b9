//! Output module for run summaries and reports
//!
//! This module handles:
//! - The per-run summary returned by a harvest
//! - Progress tracking and remaining-time projection
//! - Database statistics and the stats consistency check

mod progress;
pub mod stats;

pub use progress::{format_duration, ProgressTracker};
pub use stats::{
    check_stats, load_statistics, print_statistics, print_stats_check, HarvestStatistics,
};

use std::fmt;

/// Counts describing one harvest run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items enumerated by discovery
    pub discovered: usize,

    /// Items that came back with a document
    pub fetched: usize,

    /// Discovered items that were fresh and not fetched
    pub skipped: usize,

    /// Items that ended the run without a record
    pub failed: usize,

    /// Records committed
    pub persisted: usize,

    /// Watermarked ids retired ahead of re-fetch
    pub retired: usize,

    /// Failures that were `NotFound`
    pub not_found: usize,

    /// Failures during extraction
    pub parse_failures: usize,

    /// The run stopped early on cancellation
    pub interrupted: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} discovered, {} fetched, {} skipped, {} failed ({} not found, {} unparseable), {} persisted, {} retired",
            self.discovered,
            self.fetched,
            self.skipped,
            self.failed,
            self.not_found,
            self.parse_failures,
            self.persisted,
            self.retired
        )?;
        if self.interrupted {
            write!(f, " [interrupted]")?;
        }
        Ok(())
    }
}
