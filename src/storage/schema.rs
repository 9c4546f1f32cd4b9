//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Crag-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    discovered INTEGER NOT NULL DEFAULT 0,
    fetched INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    persisted INTEGER NOT NULL DEFAULT 0,
    retired INTEGER NOT NULL DEFAULT 0,
    not_found INTEGER NOT NULL DEFAULT 0,
    parse_failures INTEGER NOT NULL DEFAULT 0
);

-- Discovered frontier
CREATE TABLE IF NOT EXISTS frontier_items (
    id TEXT PRIMARY KEY CHECK (length(id) > 0),
    locator TEXT NOT NULL UNIQUE,
    source_group TEXT NOT NULL,
    remote_version TEXT NOT NULL,
    discovered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frontier_items_group ON frontier_items(source_group);

-- What has been durably harvested, per record kind
CREATE TABLE IF NOT EXISTS watermarks (
    kind TEXT NOT NULL,
    id TEXT NOT NULL CHECK (length(id) > 0),
    remote_version TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    tombstone INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (kind, id)
);

-- Route records
CREATE TABLE IF NOT EXISTS routes (
    id TEXT PRIMARY KEY CHECK (length(id) > 0),
    locator TEXT NOT NULL,
    remote_version TEXT NOT NULL,
    harvested_at TEXT NOT NULL,
    name TEXT NOT NULL,
    grade TEXT NOT NULL,
    long_grade TEXT NOT NULL,
    first_ascent TEXT NOT NULL,
    route_type TEXT NOT NULL,
    long_route_type TEXT NOT NULL,
    distance_ft INTEGER NOT NULL,
    pitches INTEGER NOT NULL,
    fixed_pieces INTEGER NOT NULL,
    stars REAL NOT NULL,
    votes INTEGER NOT NULL,
    views INTEGER NOT NULL,
    location TEXT NOT NULL,
    date_added TEXT,
    shared_by TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    description TEXT NOT NULL,
    protection TEXT NOT NULL,
    directions TEXT NOT NULL,
    misc TEXT NOT NULL
);

-- Reported stat totals per route
CREATE TABLE IF NOT EXISTS stats_count (
    id TEXT PRIMARY KEY CHECK (length(id) > 0),
    locator TEXT NOT NULL,
    remote_version TEXT NOT NULL,
    harvested_at TEXT NOT NULL,
    stars INTEGER NOT NULL,
    ticks INTEGER NOT NULL,
    todos INTEGER NOT NULL,
    ratings INTEGER NOT NULL
);

-- Individual stat entries, replaced wholesale per route
CREATE TABLE IF NOT EXISTS stats_entries (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
    route_id TEXT NOT NULL CHECK (length(route_id) > 0),
    category TEXT NOT NULL,
    user TEXT NOT NULL,
    created_at TEXT,
    updated_at TEXT,
    details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stats_entries_route ON stats_entries(route_id, category);

-- Reported totals vs stored entries
CREATE TABLE IF NOT EXISTS stats_check (
    route_id TEXT PRIMARY KEY,
    stars_difference INTEGER NOT NULL,
    ratings_difference INTEGER NOT NULL,
    ticks_difference INTEGER NOT NULL,
    todos_difference INTEGER NOT NULL,
    sum_difference INTEGER NOT NULL,
    checked_at TEXT NOT NULL
);
"#;

/// Tables holding harvested data, in display order
pub const DATA_TABLES: [&str; 6] = [
    "frontier_items",
    "watermarks",
    "routes",
    "stats_count",
    "stats_entries",
    "stats_check",
];

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in std::iter::once("runs").chain(DATA_TABLES) {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_empty_id_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO watermarks (kind, id, remote_version, processed_at) VALUES ('routes', '', 'v1', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
