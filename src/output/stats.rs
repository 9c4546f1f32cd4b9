//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer, plus the consistency check
//! between reported stat totals and stored stat entries.

use crate::storage::{RunRecord, StatsCheckRow, Storage, DATA_TABLES};
use crate::Result;

/// Number of recent runs shown in the statistics
const RECENT_RUNS: usize = 5;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Row count per data table
    pub table_counts: Vec<(String, u64)>,

    /// Watermarks per record kind
    pub watermarks: Vec<(String, u64)>,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<HarvestStatistics> {
    let mut table_counts = Vec::with_capacity(DATA_TABLES.len());
    for table in DATA_TABLES {
        table_counts.push((table.to_string(), storage.count_rows(table)?));
    }

    let mut watermarks = Vec::new();
    for kind in ["routes", "stats"] {
        watermarks.push((kind.to_string(), storage.load_watermarks(kind)?.len() as u64));
    }

    let recent_runs = storage.list_runs(RECENT_RUNS)?;

    Ok(HarvestStatistics {
        table_counts,
        watermarks,
        recent_runs,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Tables:");
    for (table, count) in &stats.table_counts {
        println!("  {}: {}", table, count);
    }
    println!();

    println!("Watermarks:");
    for (kind, count) in &stats.watermarks {
        println!("  {}: {}", kind, count);
    }
    println!();

    if stats.recent_runs.is_empty() {
        println!("No runs recorded yet");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} {} [{}] started {}",
            run.id,
            run.kind,
            run.status.to_db_string(),
            run.started_at
        );
        println!("      {}", run.summary);
    }
}

/// Compares reported stat totals with stored entries and saves the result
///
/// # Returns
///
/// Every checked route, including consistent ones
pub fn check_stats(storage: &mut dyn Storage) -> Result<Vec<StatsCheckRow>> {
    let rows: Vec<StatsCheckRow> = storage
        .load_stats_tallies()?
        .iter()
        .map(StatsCheckRow::from)
        .collect();

    storage.save_stats_check(&rows)?;

    let inconsistent = rows.iter().filter(|row| row.sum_difference != 0).count();
    tracing::info!(
        "Checked stats for {} routes, {} inconsistent",
        rows.len(),
        inconsistent
    );

    Ok(rows)
}

/// Prints routes whose stored entries do not add up to the reported totals
pub fn print_stats_check(rows: &[StatsCheckRow]) {
    let inconsistent: Vec<_> = rows.iter().filter(|row| row.sum_difference != 0).collect();

    println!("=== Stats Check ===\n");
    println!(
        "{} routes checked, {} inconsistent",
        rows.len(),
        inconsistent.len()
    );

    if inconsistent.is_empty() {
        return;
    }

    println!();
    println!(
        "{:>12} {:>7} {:>7} {:>7} {:>7} {:>7}",
        "route", "stars", "ratings", "ticks", "todos", "sum"
    );
    for row in inconsistent {
        println!(
            "{:>12} {:>7} {:>7} {:>7} {:>7} {:>7}",
            row.route_id,
            row.stars_difference,
            row.ratings_difference,
            row.ticks_difference,
            row.todos_difference,
            row.sum_difference
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{
        ExtractedRecord, RecordPayload, StatCategory, StatCounts, StatEntry, StatsRecord,
    };
    use crate::storage::{Batch, SqliteStorage};

    fn stats_batch() -> Batch {
        let entry = |category| StatEntry {
            category,
            user: "alice".to_string(),
            created_at: None,
            updated_at: None,
            details: serde_json::json!({}),
        };

        let mut batch = Batch::new("stats");
        batch.records = vec![
            ExtractedRecord {
                id: "1".to_string(),
                locator: "https://example.com/route/1".to_string(),
                remote_version: "v1".to_string(),
                payload: RecordPayload::Stats(StatsRecord {
                    counts: StatCounts {
                        stars: 1,
                        ..StatCounts::default()
                    },
                    entries: vec![entry(StatCategory::Stars)],
                }),
            },
            ExtractedRecord {
                id: "2".to_string(),
                locator: "https://example.com/route/2".to_string(),
                remote_version: "v1".to_string(),
                payload: RecordPayload::Stats(StatsRecord {
                    counts: StatCounts {
                        ratings: 2,
                        ..StatCounts::default()
                    },
                    entries: vec![entry(StatCategory::Ratings)],
                }),
            },
        ];
        batch
    }

    #[test]
    fn test_load_statistics() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.persist_batch(&stats_batch()).unwrap();

        let stats = load_statistics(&storage).unwrap();

        let entries = stats
            .table_counts
            .iter()
            .find(|(table, _)| table == "stats_entries")
            .map(|(_, count)| *count);
        assert_eq!(entries, Some(2));
        assert_eq!(stats.watermarks[1], ("stats".to_string(), 2));
        assert!(stats.recent_runs.is_empty());
    }

    #[test]
    fn test_check_stats_finds_inconsistent_routes() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.persist_batch(&stats_batch()).unwrap();

        let rows = check_stats(&mut storage).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sum_difference, 0);
        assert_eq!(rows[1].route_id, "2");
        assert_eq!(rows[1].ratings_difference, 1);
        assert_eq!(storage.count_rows("stats_check").unwrap(), 2);
    }
}
