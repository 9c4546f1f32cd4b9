//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::extract::{ExtractedRecord, RecordPayload, RouteRecord, StatCounts, StatsRecord};
use crate::frontier::{FrontierItem, ProcessedRecord};
use crate::output::RunSummary;
use crate::storage::schema::{initialize_schema, DATA_TABLES};
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{Batch, RunRecord, RunStatus, StatsCheckRow, StatsTally};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const RUN_COLUMNS: &str = "id, kind, started_at, finished_at, config_hash, status,
     discovered, fetched, skipped, failed, persisted, retired, not_found, parse_failures";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        // Initialize schema
        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status = RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Failed);
    let count = |index: usize| -> rusqlite::Result<usize> {
        Ok(row.get::<_, i64>(index)?.max(0) as usize)
    };

    Ok(RunRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status,
        summary: RunSummary {
            discovered: count(6)?,
            fetched: count(7)?,
            skipped: count(8)?,
            failed: count(9)?,
            persisted: count(10)?,
            retired: count(11)?,
            not_found: count(12)?,
            parse_failures: count(13)?,
            interrupted: status == RunStatus::Interrupted,
        },
    })
}

fn parse_timestamp(id: &str, value: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(timestamp) => timestamp.with_timezone(&Utc),
        Err(e) => {
            // Unreadable watermarks count as infinitely old
            tracing::warn!(id, "Invalid processed_at '{}': {}", value, e);
            DateTime::<Utc>::MIN_UTC
        }
    }
}

fn upsert_watermark(
    conn: &Connection,
    kind: &str,
    id: &str,
    remote_version: &str,
    processed_at: &str,
    tombstone: bool,
) -> StorageResult<()> {
    conn.prepare_cached(
        "INSERT INTO watermarks (kind, id, remote_version, processed_at, tombstone)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(kind, id) DO UPDATE SET
            remote_version = excluded.remote_version,
            processed_at = excluded.processed_at,
            tombstone = excluded.tombstone",
    )?
    .execute(params![kind, id, remote_version, processed_at, tombstone])?;
    Ok(())
}

fn upsert_route(
    conn: &Connection,
    record: &ExtractedRecord,
    route: &RouteRecord,
    harvested_at: &str,
) -> StorageResult<()> {
    let date_added = route
        .date_added
        .map(|date| date.format("%Y-%m-%d").to_string());

    conn.prepare_cached(
        "INSERT INTO routes (
            id, locator, remote_version, harvested_at, name, grade, long_grade,
            first_ascent, route_type, long_route_type, distance_ft, pitches,
            fixed_pieces, stars, votes, views, location, date_added, shared_by,
            latitude, longitude, description, protection, directions, misc
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                   ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
         ON CONFLICT(id) DO UPDATE SET
            locator = excluded.locator,
            remote_version = excluded.remote_version,
            harvested_at = excluded.harvested_at,
            name = excluded.name,
            grade = excluded.grade,
            long_grade = excluded.long_grade,
            first_ascent = excluded.first_ascent,
            route_type = excluded.route_type,
            long_route_type = excluded.long_route_type,
            distance_ft = excluded.distance_ft,
            pitches = excluded.pitches,
            fixed_pieces = excluded.fixed_pieces,
            stars = excluded.stars,
            votes = excluded.votes,
            views = excluded.views,
            location = excluded.location,
            date_added = excluded.date_added,
            shared_by = excluded.shared_by,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            description = excluded.description,
            protection = excluded.protection,
            directions = excluded.directions,
            misc = excluded.misc",
    )?
    .execute(params![
        record.id,
        record.locator,
        record.remote_version,
        harvested_at,
        route.name,
        route.grade,
        route.long_grade,
        route.first_ascent,
        route.route_type,
        route.long_route_type,
        route.distance_ft,
        route.pitches,
        route.fixed_pieces,
        route.stars,
        route.votes,
        route.views,
        route.location,
        date_added,
        route.shared_by,
        route.latitude,
        route.longitude,
        serde_json::to_string(&route.description)?,
        serde_json::to_string(&route.protection)?,
        serde_json::to_string(&route.directions)?,
        serde_json::to_string(&route.misc)?,
    ])?;

    Ok(())
}

fn upsert_stats(
    conn: &Connection,
    record: &ExtractedRecord,
    stats: &StatsRecord,
    harvested_at: &str,
) -> StorageResult<()> {
    conn.prepare_cached(
        "INSERT INTO stats_count (id, locator, remote_version, harvested_at, stars, ticks, todos, ratings)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            locator = excluded.locator,
            remote_version = excluded.remote_version,
            harvested_at = excluded.harvested_at,
            stars = excluded.stars,
            ticks = excluded.ticks,
            todos = excluded.todos,
            ratings = excluded.ratings",
    )?
    .execute(params![
        record.id,
        record.locator,
        record.remote_version,
        harvested_at,
        stats.counts.stars as i64,
        stats.counts.ticks as i64,
        stats.counts.todos as i64,
        stats.counts.ratings as i64,
    ])?;

    // Entries are replaced, never appended
    conn.prepare_cached("DELETE FROM stats_entries WHERE route_id = ?1")?
        .execute(params![record.id])?;

    let mut insert = conn.prepare_cached(
        "INSERT INTO stats_entries (route_id, category, user, created_at, updated_at, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for entry in &stats.entries {
        insert.execute(params![
            record.id,
            entry.category.as_str(),
            entry.user,
            entry.created_at,
            entry.updated_at,
            serde_json::to_string(&entry.details)?,
        ])?;
    }

    Ok(())
}

/// Deletes the derived rows of `ids` so their replacements start clean
fn delete_derived(conn: &Connection, kind: &str, ids: &[String]) -> StorageResult<()> {
    for (table, column) in derived_tables(kind) {
        let mut stmt = conn.prepare(&format!("DELETE FROM {} WHERE {} = ?1", table, column))?;
        for id in ids {
            stmt.execute(params![id])?;
        }
    }
    Ok(())
}

/// Tables holding the derived rows of each record kind
fn derived_tables(kind: &str) -> &'static [(&'static str, &'static str)] {
    match kind {
        "routes" => &[("routes", "id")],
        "stats" => &[
            ("stats_entries", "route_id"),
            ("stats_count", "id"),
            ("stats_check", "route_id"),
        ],
        _ => &[],
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, kind: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (kind, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![kind, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;

        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, discovered = ?3, fetched = ?4,
                skipped = ?5, failed = ?6, persisted = ?7, retired = ?8, not_found = ?9,
                parse_failures = ?10
             WHERE id = ?11",
            params![
                status.to_db_string(),
                now,
                summary.discovered as i64,
                summary.fetched as i64,
                summary.skipped as i64,
                summary.failed as i64,
                summary.persisted as i64,
                summary.retired as i64,
                summary.not_found as i64,
                summary.parse_failures as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Frontier =====

    fn upsert_frontier_items(&mut self, items: &[FrontierItem]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO frontier_items (id, locator, source_group, remote_version, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    locator = excluded.locator,
                    source_group = excluded.source_group,
                    remote_version = excluded.remote_version",
            )?;

            for item in items {
                stmt.execute(params![
                    item.id,
                    item.locator,
                    item.source_group,
                    item.remote_version,
                    now
                ])?;
            }
        }

        tx.commit()?;
        Ok(items.len())
    }

    fn load_frontier_items(&self, filter: Option<&str>) -> StorageResult<Vec<FrontierItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, locator, source_group, remote_version FROM frontier_items
             WHERE ?1 IS NULL OR instr(locator, ?1) > 0
             ORDER BY id",
        )?;

        let items = stmt
            .query_map(params![filter], |row| {
                Ok(FrontierItem {
                    id: row.get(0)?,
                    locator: row.get(1)?,
                    source_group: row.get(2)?,
                    remote_version: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    // ===== Watermarks and batches =====

    fn load_watermarks(&self, kind: &str) -> StorageResult<Vec<ProcessedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, remote_version, processed_at FROM watermarks WHERE kind = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![kind], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, remote_version, processed_at)| ProcessedRecord {
                processed_at: parse_timestamp(&id, &processed_at),
                id,
                remote_version,
            })
            .collect())
    }

    fn clear_watermarks(&mut self, kind: &str) -> StorageResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM watermarks WHERE kind = ?1", params![kind])?;
        Ok(removed)
    }

    fn persist_batch(&mut self, batch: &Batch) -> StorageResult<()> {
        let processed_at = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        delete_derived(&tx, batch.kind, &batch.retire)?;

        for record in &batch.records {
            match &record.payload {
                RecordPayload::Route(route) => upsert_route(&tx, record, route, &processed_at)?,
                RecordPayload::Stats(stats) => upsert_stats(&tx, record, stats, &processed_at)?,
            }
            upsert_watermark(
                &tx,
                batch.kind,
                &record.id,
                &record.remote_version,
                &processed_at,
                false,
            )?;
        }

        for item in &batch.not_found {
            upsert_watermark(
                &tx,
                batch.kind,
                &item.id,
                &item.remote_version,
                &processed_at,
                true,
            )?;
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit()?;
        Ok(())
    }

    // ===== Statistics =====

    fn count_rows(&self, table: &str) -> StorageResult<u64> {
        if table != "runs" && !DATA_TABLES.contains(&table) {
            return Err(StorageError::UnknownTable(table.to_string()));
        }

        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn load_stats_tallies(&self) -> StorageResult<Vec<StatsTally>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.stars, c.ticks, c.todos, c.ratings,
                (SELECT COUNT(*) FROM stats_entries e WHERE e.route_id = c.id AND e.category = 'stars'),
                (SELECT COUNT(*) FROM stats_entries e WHERE e.route_id = c.id AND e.category = 'ticks'),
                (SELECT COUNT(*) FROM stats_entries e WHERE e.route_id = c.id AND e.category = 'todos'),
                (SELECT COUNT(*) FROM stats_entries e WHERE e.route_id = c.id AND e.category = 'ratings')
             FROM stats_count c
             ORDER BY c.id",
        )?;

        let tallies = stmt
            .query_map([], |row| {
                let count = |index: usize| -> rusqlite::Result<u64> {
                    Ok(row.get::<_, i64>(index)?.max(0) as u64)
                };
                Ok(StatsTally {
                    route_id: row.get(0)?,
                    reported: StatCounts {
                        stars: count(1)?,
                        ticks: count(2)?,
                        todos: count(3)?,
                        ratings: count(4)?,
                    },
                    stored: StatCounts {
                        stars: count(5)?,
                        ticks: count(6)?,
                        todos: count(7)?,
                        ratings: count(8)?,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tallies)
    }

    fn save_stats_check(&mut self, rows: &[StatsCheckRow]) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM stats_check", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO stats_check (route_id, stars_difference, ratings_difference,
                    ticks_difference, todos_difference, sum_difference, checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.route_id,
                    row.stars_difference,
                    row.ratings_difference,
                    row.ticks_difference,
                    row.todos_difference,
                    row.sum_difference,
                    now
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}
