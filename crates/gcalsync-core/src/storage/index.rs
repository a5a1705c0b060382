//! SQLite-backed local index.
//!
//! The index is the source of truth for what has been projected where:
//! - registered calendars and the account that owns each of them
//! - block-policy edges between calendars
//! - every blocker event this tool created in a target calendar
//! - opaque per-account OAuth tokens
//!
//! Every mutation is a single statement (or one short transaction), so a crash
//! leaves the file consistent at statement granularity.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::migrations;
use crate::error::{CoreError, IndexError, Result, UserError};

/// File name of the index inside the working directory.
pub const INDEX_FILE: &str = ".gcalsync.db";

/// A calendar registered for synchronization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Calendar {
    pub account_name: String,
    pub calendar_id: String,
}

/// A placeholder event this tool created in a target calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerEvent {
    /// Remote id assigned on insert.
    pub event_id: String,
    /// Target calendar holding the blocker.
    pub calendar_id: String,
    /// Account owning the target calendar.
    pub account_name: String,
    pub origin_calendar_id: String,
    pub origin_event_id: String,
    pub origin_fingerprint: String,
    pub last_seen_at: DateTime<Utc>,
}

/// A block-policy edge: projections from `source` into `target` read "Busy".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockEdge {
    pub source_calendar_id: String,
    pub target_calendar_id: String,
}

/// A registered calendar with the number of blockers it currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSummary {
    pub account_name: String,
    pub calendar_id: String,
    pub blocker_count: u64,
}

/// SQLite index for calendars, policy edges and projected blockers.
pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the index at `path` and bring its schema up to date.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, or holds a schema this
    /// build does not understand.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| IndexError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory index (tests and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&conn)?;
        Ok(Self { conn })
    }

    // ── calendars ────────────────────────────────────────────────────────

    /// Register `calendar_id` under `account_name`.
    ///
    /// Returns `false` if it was already registered under the same account.
    ///
    /// # Errors
    /// [`UserError::CalendarOwnedElsewhere`] if another account owns the id.
    pub fn add_calendar(&self, account_name: &str, calendar_id: &str) -> Result<bool> {
        if account_name.trim().is_empty() {
            return Err(UserError::EmptyAccountName.into());
        }
        if let Some(existing) = self.calendar(calendar_id)? {
            if existing.account_name == account_name {
                return Ok(false);
            }
            return Err(UserError::CalendarOwnedElsewhere {
                calendar_id: calendar_id.to_string(),
                account_name: existing.account_name,
            }
            .into());
        }
        self.conn.execute(
            "INSERT INTO calendars (account_name, calendar_id) VALUES (?1, ?2)",
            params![account_name, calendar_id],
        )?;
        Ok(true)
    }

    /// Look up a registered calendar by id.
    pub fn calendar(&self, calendar_id: &str) -> Result<Option<Calendar>> {
        let found = self
            .conn
            .query_row(
                "SELECT account_name, calendar_id FROM calendars WHERE calendar_id = ?1",
                params![calendar_id],
                calendar_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// All registered calendars, ordered by calendar id.
    pub fn calendars(&self) -> Result<Vec<Calendar>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_name, calendar_id FROM calendars ORDER BY calendar_id",
        )?;
        let rows = stmt.query_map([], calendar_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Calendars registered under one account.
    pub fn calendars_for_account(&self, account_name: &str) -> Result<Vec<Calendar>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_name, calendar_id FROM calendars
             WHERE account_name = ?1 ORDER BY calendar_id",
        )?;
        let rows = stmt.query_map(params![account_name], calendar_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Registered calendars with the number of blockers each holds.
    pub fn calendar_summaries(&self) -> Result<Vec<CalendarSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.account_name, c.calendar_id, COUNT(b.event_id)
             FROM calendars c
             LEFT JOIN blocker_events b ON b.calendar_id = c.calendar_id
             GROUP BY c.account_name, c.calendar_id
             ORDER BY c.account_name, c.calendar_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CalendarSummary {
                account_name: row.get(0)?,
                calendar_id: row.get(1)?,
                blocker_count: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ── block policy ─────────────────────────────────────────────────────

    /// Insert a policy edge. Returns `false` if it already existed.
    pub fn insert_block(&self, source_calendar_id: &str, target_calendar_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO calendar_blocks (source_calendar_id, target_calendar_id)
             VALUES (?1, ?2)",
            params![source_calendar_id, target_calendar_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete a policy edge. Returns `false` if there was none.
    pub fn delete_block(&self, source_calendar_id: &str, target_calendar_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM calendar_blocks
             WHERE source_calendar_id = ?1 AND target_calendar_id = ?2",
            params![source_calendar_id, target_calendar_id],
        )?;
        Ok(changed > 0)
    }

    pub fn has_block(&self, source_calendar_id: &str, target_calendar_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM calendar_blocks
                 WHERE source_calendar_id = ?1 AND target_calendar_id = ?2",
                params![source_calendar_id, target_calendar_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All policy edges, ordered by (source, target).
    pub fn blocks(&self) -> Result<Vec<BlockEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_calendar_id, target_calendar_id FROM calendar_blocks
             ORDER BY source_calendar_id, target_calendar_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BlockEdge {
                source_calendar_id: row.get(0)?,
                target_calendar_id: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ── blocker events ───────────────────────────────────────────────────

    /// Insert or replace the row for `(calendar_id, event_id)`.
    pub fn upsert_blocker(&self, blocker: &BlockerEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO blocker_events (
                 event_id, calendar_id, account_name, origin_calendar_id,
                 origin_event_id, origin_fingerprint, last_seen_at, last_updated
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (calendar_id, event_id) DO UPDATE SET
                 account_name = excluded.account_name,
                 origin_calendar_id = excluded.origin_calendar_id,
                 origin_event_id = excluded.origin_event_id,
                 origin_fingerprint = excluded.origin_fingerprint,
                 last_seen_at = excluded.last_seen_at,
                 last_updated = excluded.last_updated",
            params![
                blocker.event_id,
                blocker.calendar_id,
                blocker.account_name,
                blocker.origin_calendar_id,
                blocker.origin_event_id,
                blocker.origin_fingerprint,
                blocker.last_seen_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Swap the row for a blocker that had to be recreated remotely.
    ///
    /// Both statements run in one transaction so the origin event never has
    /// zero or two rows.
    pub fn replace_blocker(&self, old_event_id: &str, blocker: &BlockerEvent) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM blocker_events WHERE calendar_id = ?1 AND event_id = ?2",
            params![blocker.calendar_id, old_event_id],
        )?;
        tx.execute(
            "INSERT INTO blocker_events (
                 event_id, calendar_id, account_name, origin_calendar_id,
                 origin_event_id, origin_fingerprint, last_seen_at, last_updated
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                blocker.event_id,
                blocker.calendar_id,
                blocker.account_name,
                blocker.origin_calendar_id,
                blocker.origin_event_id,
                blocker.origin_fingerprint,
                blocker.last_seen_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Record a new fingerprint after a successful patch.
    pub fn update_fingerprint(
        &self,
        calendar_id: &str,
        event_id: &str,
        fingerprint: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE blocker_events
             SET origin_fingerprint = ?3, last_seen_at = ?4, last_updated = ?4
             WHERE calendar_id = ?1 AND event_id = ?2",
            params![calendar_id, event_id, fingerprint, seen_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove a blocker row. Returns `false` if it did not exist.
    pub fn delete_blocker(&self, calendar_id: &str, event_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM blocker_events WHERE calendar_id = ?1 AND event_id = ?2",
            params![calendar_id, event_id],
        )?;
        Ok(changed > 0)
    }

    /// Every blocker row, ordered by (account, calendar, event).
    pub fn blockers(&self) -> Result<Vec<BlockerEvent>> {
        self.query_blockers(
            "SELECT event_id, calendar_id, account_name, origin_calendar_id,
                    origin_event_id, origin_fingerprint, last_seen_at
             FROM blocker_events
             ORDER BY account_name, calendar_id, event_id",
            [],
        )
    }

    /// Blockers held by one target calendar.
    pub fn blockers_in(&self, calendar_id: &str) -> Result<Vec<BlockerEvent>> {
        self.query_blockers(
            "SELECT event_id, calendar_id, account_name, origin_calendar_id,
                    origin_event_id, origin_fingerprint, last_seen_at
             FROM blocker_events
             WHERE calendar_id = ?1
             ORDER BY event_id",
            params![calendar_id],
        )
    }

    /// Blockers in `target_calendar_id` projected from `origin_calendar_id`.
    pub fn blockers_from(
        &self,
        origin_calendar_id: &str,
        target_calendar_id: &str,
    ) -> Result<Vec<BlockerEvent>> {
        self.query_blockers(
            "SELECT event_id, calendar_id, account_name, origin_calendar_id,
                    origin_event_id, origin_fingerprint, last_seen_at
             FROM blocker_events
             WHERE origin_calendar_id = ?1 AND calendar_id = ?2
             ORDER BY event_id",
            params![origin_calendar_id, target_calendar_id],
        )
    }

    /// Blockers living in calendars owned by `account_name`.
    pub fn blockers_for_account(&self, account_name: &str) -> Result<Vec<BlockerEvent>> {
        self.query_blockers(
            "SELECT event_id, calendar_id, account_name, origin_calendar_id,
                    origin_event_id, origin_fingerprint, last_seen_at
             FROM blocker_events
             WHERE account_name = ?1
             ORDER BY calendar_id, event_id",
            params![account_name],
        )
    }

    fn query_blockers<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<BlockerEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, blocker_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            let (blocker, raw_seen) = row?;
            out.push(finish_blocker(blocker, &raw_seen)?);
        }
        Ok(out)
    }

    // ── account tokens ───────────────────────────────────────────────────

    /// Stored token blob for an account, if any. The content is opaque here.
    pub fn account_token(&self, account_name: &str) -> Result<Option<String>> {
        let token = self
            .conn
            .query_row(
                "SELECT token_json FROM account_tokens WHERE account_name = ?1",
                params![account_name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(token)
    }

    pub fn set_account_token(&self, account_name: &str, token_json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO account_tokens (account_name, token_json) VALUES (?1, ?2)",
            params![account_name, token_json],
        )?;
        Ok(())
    }
}

fn calendar_from_row(row: &Row<'_>) -> rusqlite::Result<Calendar> {
    Ok(Calendar {
        account_name: row.get(0)?,
        calendar_id: row.get(1)?,
    })
}

fn blocker_from_row(row: &Row<'_>) -> rusqlite::Result<(BlockerEvent, String)> {
    Ok((
        BlockerEvent {
            event_id: row.get(0)?,
            calendar_id: row.get(1)?,
            account_name: row.get(2)?,
            origin_calendar_id: row.get(3)?,
            origin_event_id: row.get(4)?,
            origin_fingerprint: row.get(5)?,
            last_seen_at: DateTime::<Utc>::MIN_UTC,
        },
        row.get(6)?,
    ))
}

fn finish_blocker(mut blocker: BlockerEvent, raw_seen: &str) -> Result<BlockerEvent> {
    // Legacy rows may never have been stamped.
    if raw_seen.is_empty() {
        return Ok(blocker);
    }
    blocker.last_seen_at = DateTime::parse_from_rfc3339(raw_seen)
        .map_err(|e| {
            CoreError::Index(IndexError::Corrupt {
                table: "blocker_events",
                message: format!("bad last_seen_at '{raw_seen}': {e}"),
            })
        })?
        .with_timezone(&Utc);
    Ok(blocker)
}
