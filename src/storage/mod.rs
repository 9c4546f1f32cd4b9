//! Storage module for persisting harvest data
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Frontier and watermark persistence
//! - Atomic batch writes of extracted records
//! - Run tracking

mod persister;
mod schema;
mod sqlite;
mod traits;

pub use persister::{Batch, BatchPersister};
pub use schema::DATA_TABLES;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::extract::{StatCategory, StatCounts};
use crate::output::RunSummary;
use crate::HarvestError;

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(HarvestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub kind: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub summary: RunSummary,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Reported stat totals next to the entries actually stored for a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsTally {
    pub route_id: String,
    pub reported: StatCounts,
    pub stored: StatCounts,
}

/// Per-route difference between reported totals and stored entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsCheckRow {
    pub route_id: String,
    pub stars_difference: i64,
    pub ratings_difference: i64,
    pub ticks_difference: i64,
    pub todos_difference: i64,
    pub sum_difference: i64,
}

impl From<&StatsTally> for StatsCheckRow {
    fn from(tally: &StatsTally) -> Self {
        let difference = |category: StatCategory| {
            tally.reported.get(category) as i64 - tally.stored.get(category) as i64
        };

        let stars_difference = difference(StatCategory::Stars);
        let ratings_difference = difference(StatCategory::Ratings);
        let ticks_difference = difference(StatCategory::Ticks);
        let todos_difference = difference(StatCategory::Todos);

        Self {
            route_id: tally.route_id.clone(),
            stars_difference,
            ratings_difference,
            ticks_difference,
            todos_difference,
            sum_difference: stars_difference
                + ratings_difference
                + ticks_difference
                + todos_difference,
        }
    }
}
