//! Batch progress tracking and remaining-time projection

use std::time::Duration;

/// Observes batch boundaries and projects the time left in a run
///
/// Each batch with at least one item contributes one per-item time sample
/// (`elapsed / count`). The projection is the mean of those samples times
/// the remaining item count.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    batches: usize,
    items: usize,
    sample_count: u128,
    sample_sum_nanos: u128,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one finished batch
    ///
    /// A batch that produced nothing is counted but adds no time sample.
    pub fn record(&mut self, count: usize, elapsed: Duration) {
        self.batches += 1;
        self.items += count;

        if count == 0 {
            tracing::debug!("Batch produced no items, projection unchanged");
            return;
        }

        self.sample_sum_nanos += elapsed.as_nanos() / count as u128;
        self.sample_count += 1;
    }

    /// Mean time per item so far, `None` before the first non-empty batch
    pub fn mean_per_item(&self) -> Option<Duration> {
        if self.sample_count == 0 {
            return None;
        }
        Some(nanos_to_duration(self.sample_sum_nanos / self.sample_count))
    }

    /// Projected time to process `remaining` more items
    ///
    /// # Example
    ///
    /// ```
    /// use crag_harvest::ProgressTracker;
    /// use std::time::Duration;
    ///
    /// let mut tracker = ProgressTracker::new();
    /// assert_eq!(tracker.projected_remaining(10), None);
    ///
    /// tracker.record(100, Duration::from_secs(10));
    /// assert_eq!(tracker.projected_remaining(50), Some(Duration::from_secs(5)));
    /// ```
    pub fn projected_remaining(&self, remaining: usize) -> Option<Duration> {
        if self.sample_count == 0 {
            return None;
        }
        let nanos = self.sample_sum_nanos * remaining as u128 / self.sample_count;
        Some(nanos_to_duration(nanos))
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn items(&self) -> usize {
        self.items
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    let secs = (nanos / 1_000_000_000).min(u64::MAX as u128) as u64;
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

/// Formats a duration as `1h 02m 03s`, `2m 03s` or `3.5s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
