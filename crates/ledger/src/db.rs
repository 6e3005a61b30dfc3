//! SQLite handle and schema.
//!
//! One connection behind a mutex, WAL mode, idempotent migrations at open.
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so lexicographic
//! comparison in SQL matches chronological order.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use fc_domain::{Error, Result};

/// Shared database handle. The connection is exposed so tests can seed and
/// inspect rows directly.
pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the database at `path` and run migrations.
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Arc<Self>> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().map_err(db_err)?
        } else {
            Connection::open(path).map_err(db_err)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(db_err)?;
        migrate(&conn)?;
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    /// Private in-memory database, for tests.
    pub fn open_in_memory() -> Result<Arc<Self>> {
        Self::open(":memory:")
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            phone TEXT PRIMARY KEY,
            user_id TEXT,
            credential TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'paused',
            auto_paused INTEGER NOT NULL DEFAULT 0,
            pause_reason TEXT,
            penalty_until TEXT,
            last_error TEXT,
            last_active TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
            channel_id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            username TEXT,
            member_count INTEGER NOT NULL DEFAULT 0,
            forward_enabled INTEGER NOT NULL DEFAULT 1,
            owning_session TEXT,
            base_delay_ms INTEGER,
            per_member_delay_ms INTEGER,
            min_delay_ms INTEGER,
            max_delay_ms INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            first_name TEXT,
            last_name TEXT,
            username TEXT,
            phone TEXT,
            is_bot INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS operators (
            user_id TEXT PRIMARY KEY,
            role TEXT NOT NULL DEFAULT 'admin',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS forwards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_channel_id TEXT NOT NULL,
            source_message_id TEXT NOT NULL,
            recipient_user_id TEXT NOT NULL,
            session_phone TEXT NOT NULL,
            forwarded_message_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            grouped_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (source_channel_id, source_message_id, recipient_user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_forwards_status_created
            ON forwards(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_forwards_recipient
            ON forwards(recipient_user_id);
        CREATE INDEX IF NOT EXISTS idx_forwards_forwarded_id
            ON forwards(forwarded_message_id);
        CREATE INDEX IF NOT EXISTS idx_members_channel
            ON channel_members(channel_id);",
    )
    .map_err(db_err)
}

// ── Shared helpers ──────────────────────────────────────────────────

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Fixed-width RFC 3339 timestamp (microseconds, `Z` suffix).
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_ts() -> String {
    ts(Utc::now())
}

/// Parse a stored timestamp back into UTC. Stored values are always written
/// by [`ts`], so a parse failure indicates external tampering; it is mapped
/// to a storage error rather than a panic.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip_and_sort() {
        let a = Utc::now();
        let b = a + chrono::Duration::microseconds(1500);
        let (sa, sb) = (ts(a), ts(b));
        assert!(sa < sb, "lexicographic order must match time order");
        // Stored precision is microseconds.
        assert_eq!(
            parse_ts(&sa).unwrap().timestamp_micros(),
            a.timestamp_micros()
        );
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn.lock();
        migrate(&conn).unwrap();
        // Schema exists and is queryable.
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM forwards", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }
}
