//! Index schema migrations.
//!
//! Migrations are versioned and applied automatically when opening the index.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::warn;

use crate::error::IndexError;

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the index to the current schema version.
///
/// # Errors
/// Returns [`IndexError::UnsupportedSchema`] if the file was written by a newer
/// build, or [`IndexError::MigrationFailed`] if a step fails.
pub fn migrate(conn: &Connection) -> Result<(), IndexError> {
    create_schema_version_table(conn).map_err(migration_failed)?;

    let current_version = get_schema_version(conn).map_err(migration_failed)?;
    if current_version > SCHEMA_VERSION {
        return Err(IndexError::UnsupportedSchema {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        migrate_v1(conn).map_err(migration_failed)?;
    }
    if current_version < 2 {
        migrate_v2(conn).map_err(migration_failed)?;
    }
    ensure_origin_index(conn).map_err(migration_failed)?;

    Ok(())
}

fn migration_failed(err: rusqlite::Error) -> IndexError {
    IndexError::MigrationFailed(err.to_string())
}

/// Create the schema_version table if it doesn't exist.
fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the index.
///
/// Returns 0 if no version is set (fresh file, or an index created before
/// versions were tracked).
pub(crate) fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i32>>(0)
    }) {
        Ok(v) => Ok(v.unwrap_or(0)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: baseline schema.
///
/// Matches indexes written before blockers carried a fingerprint. Uses
/// `IF NOT EXISTS` so an unversioned legacy file is adopted as-is.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS calendars (
            account_name TEXT NOT NULL,
            calendar_id  TEXT NOT NULL,
            PRIMARY KEY (account_name, calendar_id)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_calendars_calendar_id
            ON calendars(calendar_id);

        CREATE TABLE IF NOT EXISTS calendar_blocks (
            source_calendar_id TEXT NOT NULL
                REFERENCES calendars(calendar_id) ON DELETE CASCADE,
            target_calendar_id TEXT NOT NULL
                REFERENCES calendars(calendar_id) ON DELETE CASCADE,
            PRIMARY KEY (source_calendar_id, target_calendar_id)
        );

        CREATE TABLE IF NOT EXISTS account_tokens (
            account_name TEXT PRIMARY KEY,
            token_json   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blocker_events (
            event_id           TEXT NOT NULL,
            calendar_id        TEXT NOT NULL,
            account_name       TEXT NOT NULL,
            origin_calendar_id TEXT NOT NULL,
            origin_event_id    TEXT NOT NULL,
            last_updated       TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (calendar_id, event_id)
        );

        CREATE INDEX IF NOT EXISTS idx_blocker_events_account
            ON blocker_events(account_name);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: change detection for projected blockers.
///
/// Adds:
/// - origin_fingerprint: digest of the source event state the blocker was
///   written from. Existing rows get '' so the next sync re-patches them.
/// - last_seen_at: when the blocker was last written, backfilled from
///   last_updated.
///
/// Legacy duplicates (two rows for one origin event in one target) are left
/// alone: each row still points at a live remote blocker, and only a sync can
/// delete the extra one remotely before dropping its row.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE blocker_events ADD COLUMN origin_fingerprint TEXT NOT NULL DEFAULT '';
         ALTER TABLE blocker_events ADD COLUMN last_seen_at TEXT NOT NULL DEFAULT '';",
    )?;

    tx.execute(
        "UPDATE blocker_events SET last_seen_at = last_updated WHERE last_seen_at = ''",
        [],
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Create the one-blocker-per-origin unique index once no duplicates remain.
///
/// Runs on every open, so an upgraded index gains the constraint on the first
/// open after a sync has collapsed its duplicates.
fn ensure_origin_index(conn: &Connection) -> SqliteResult<()> {
    let duplicates: i64 = conn.query_row(
        "SELECT COUNT(*) FROM (
             SELECT 1 FROM blocker_events
             GROUP BY calendar_id, origin_calendar_id, origin_event_id
             HAVING COUNT(*) > 1
         )",
        [],
        |row| row.get(0),
    )?;
    if duplicates > 0 {
        warn!(duplicates, "duplicate blockers in index, next sync removes them");
        return Ok(());
    }

    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_blocker_events_origin
            ON blocker_events(calendar_id, origin_calendar_id, origin_event_id);",
    )
}

/// Whether the one-blocker-per-origin unique index exists.
pub fn has_origin_index(conn: &Connection) -> SqliteResult<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master
         WHERE type = 'index' AND name = 'idx_blocker_events_origin'",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}
