//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::frontier::{FrontierItem, ProcessedRecord};
use crate::output::RunSummary;
use crate::storage::{Batch, RunRecord, RunStatus, StatsCheckRow, StatsTally};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Batch of {size} records exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This is the sink a harvest run writes to. Every write that touches more
/// than one row is all-or-nothing.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run for record `kind`
    ///
    /// # Arguments
    ///
    /// * `kind` - The record kind being harvested
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, kind: &str, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Gets the most recent runs, newest first
    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    /// Closes a run with its final status and counts
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
    ) -> StorageResult<()>;

    // ===== Frontier =====

    /// Inserts or refreshes discovered items, returns how many were written
    fn upsert_frontier_items(&mut self, items: &[FrontierItem]) -> StorageResult<usize>;

    /// Loads the stored frontier, optionally only locators containing `filter`
    fn load_frontier_items(&self, filter: Option<&str>) -> StorageResult<Vec<FrontierItem>>;

    // ===== Watermarks and batches =====

    /// Loads every watermark of `kind`, tombstones included
    fn load_watermarks(&self, kind: &str) -> StorageResult<Vec<ProcessedRecord>>;

    /// Drops every watermark of `kind` so the next run fetches everything
    fn clear_watermarks(&mut self, kind: &str) -> StorageResult<usize>;

    /// Writes a batch in one transaction
    ///
    /// Derived rows of `batch.retire` are deleted first, then records are
    /// upserted by id and each record (plus each not-found tombstone) gets
    /// its watermark. Nothing is written or deleted if any row fails.
    fn persist_batch(&mut self, batch: &Batch) -> StorageResult<()>;

    // ===== Statistics =====

    /// Counts the rows of a data table
    fn count_rows(&self, table: &str) -> StorageResult<u64>;

    /// Reported totals next to stored entry counts, per route
    fn load_stats_tallies(&self) -> StorageResult<Vec<StatsTally>>;

    /// Replaces the stored consistency check results
    fn save_stats_check(&mut self, rows: &[StatsCheckRow]) -> StorageResult<()>;
}
