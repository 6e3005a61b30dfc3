//! The forward ledger: one row per (source message, recipient) copy.
//!
//! Status transitions are guarded in SQL so concurrent writers cannot move a
//! row outside the allowed DAG: `pending → {sent, failed, skipped}` and
//! `sent → deleted`. The unique key makes `insert_pending` idempotent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use fc_domain::types::{ForwardRecord, ForwardStatus};
use fc_domain::Result;

use crate::db::{db_err, now_ts, parse_ts, ts, Db};

/// Recipient key used for the marker row written when a fan-out is refused
/// for a whole channel (forwarding disabled mid-flight).
pub const CHANNEL_MARKER_RECIPIENT: &str = "*";

#[derive(Clone)]
pub struct Ledger {
    db: Arc<Db>,
}

/// Filter for [`Ledger::statistics`].
#[derive(Debug, Clone, Default)]
pub struct StatsFilter {
    pub session_phone: Option<String>,
    pub source_channel_id: Option<String>,
}

/// Aggregate counts over ledger rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
    pub deleted: u64,
}

impl LedgerStats {
    pub fn total(&self) -> u64 {
        self.pending + self.sent + self.failed + self.skipped + self.deleted
    }
}

impl Ledger {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Create the pending row for one copy. Idempotent: re-dispatching the
    /// same source message leaves existing rows untouched.
    pub fn insert_pending(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
        recipient_user_id: &str,
        session_phone: &str,
        grouped_id: Option<&str>,
    ) -> Result<()> {
        let now = now_ts();
        self.db
            .conn
            .lock()
            .execute(
                "INSERT INTO forwards (source_channel_id, source_message_id, recipient_user_id,
                                       session_phone, status, grouped_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?6)
                 ON CONFLICT (source_channel_id, source_message_id, recipient_user_id)
                 DO NOTHING",
                params![
                    source_channel_id,
                    source_message_id,
                    recipient_user_id,
                    session_phone,
                    grouped_id,
                    now
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Record a whole-channel refusal as a single skipped marker row.
    pub fn insert_skipped_marker(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
        session_phone: &str,
        reason: &str,
    ) -> Result<()> {
        let now = now_ts();
        self.db
            .conn
            .lock()
            .execute(
                "INSERT INTO forwards (source_channel_id, source_message_id, recipient_user_id,
                                       session_phone, status, error_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'skipped', ?5, ?6, ?6)
                 ON CONFLICT (source_channel_id, source_message_id, recipient_user_id)
                 DO NOTHING",
                params![
                    source_channel_id,
                    source_message_id,
                    CHANNEL_MARKER_RECIPIENT,
                    session_phone,
                    reason,
                    now
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Transition `pending → sent`, recording the copy identifier.
    /// Returns `false` when the row is not in `pending` (the guard refused).
    pub fn mark_sent(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
        recipient_user_id: &str,
        forwarded_message_id: &str,
    ) -> Result<bool> {
        let changed = self
            .db
            .conn
            .lock()
            .execute(
                "UPDATE forwards
                 SET status = 'sent', forwarded_message_id = ?4, updated_at = ?5
                 WHERE source_channel_id = ?1 AND source_message_id = ?2
                   AND recipient_user_id = ?3 AND status = 'pending'",
                params![
                    source_channel_id,
                    source_message_id,
                    recipient_user_id,
                    forwarded_message_id,
                    now_ts()
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Transition `pending → failed` with the terminal error message.
    pub fn mark_failed(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
        recipient_user_id: &str,
        error_message: &str,
    ) -> Result<bool> {
        self.terminal_from_pending(
            source_channel_id,
            source_message_id,
            recipient_user_id,
            ForwardStatus::Failed,
            error_message,
        )
    }

    /// Transition `pending → skipped`.
    pub fn mark_skipped(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
        recipient_user_id: &str,
        reason: &str,
    ) -> Result<bool> {
        self.terminal_from_pending(
            source_channel_id,
            source_message_id,
            recipient_user_id,
            ForwardStatus::Skipped,
            reason,
        )
    }

    fn terminal_from_pending(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
        recipient_user_id: &str,
        status: ForwardStatus,
        message: &str,
    ) -> Result<bool> {
        debug_assert!(ForwardStatus::Pending.can_transition(status));
        let changed = self
            .db
            .conn
            .lock()
            .execute(
                "UPDATE forwards
                 SET status = ?4, error_message = ?5, updated_at = ?6
                 WHERE source_channel_id = ?1 AND source_message_id = ?2
                   AND recipient_user_id = ?3 AND status = 'pending'",
                params![
                    source_channel_id,
                    source_message_id,
                    recipient_user_id,
                    status.as_str(),
                    message,
                    now_ts()
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Bump the retry counter; returns the new count.
    pub fn increment_retry(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
        recipient_user_id: &str,
    ) -> Result<u32> {
        let conn = self.db.conn.lock();
        conn.execute(
            "UPDATE forwards SET retry_count = retry_count + 1, updated_at = ?4
             WHERE source_channel_id = ?1 AND source_message_id = ?2 AND recipient_user_id = ?3",
            params![
                source_channel_id,
                source_message_id,
                recipient_user_id,
                now_ts()
            ],
        )
        .map_err(db_err)?;
        conn.query_row(
            "SELECT retry_count FROM forwards
             WHERE source_channel_id = ?1 AND source_message_id = ?2 AND recipient_user_id = ?3",
            params![source_channel_id, source_message_id, recipient_user_id],
            |r| r.get(0),
        )
        .map_err(db_err)
    }

    /// Transition `sent → deleted` by the forwarded-copy identifier, clearing
    /// it. Returns `false` when no matching `sent` row exists.
    pub fn mark_deleted(&self, recipient_user_id: &str, forwarded_message_id: &str) -> Result<bool> {
        let changed = self
            .db
            .conn
            .lock()
            .execute(
                "UPDATE forwards
                 SET status = 'deleted', forwarded_message_id = NULL, updated_at = ?3
                 WHERE recipient_user_id = ?1 AND forwarded_message_id = ?2 AND status = 'sent'",
                params![recipient_user_id, forwarded_message_id, now_ts()],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// All copies of one source message.
    pub fn find_copies(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
    ) -> Result<Vec<ForwardRecord>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT source_channel_id, source_message_id, recipient_user_id, session_phone,
                        forwarded_message_id, status, retry_count, error_message, grouped_id,
                        created_at, updated_at
                 FROM forwards
                 WHERE source_channel_id = ?1 AND source_message_id = ?2
                 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![source_channel_id, source_message_id], map_row)
            .map_err(db_err)?;
        collect_records(rows)
    }

    /// Sent rows created before `older_than`, oldest first — the scheduled
    /// revocation sweep's work list.
    pub fn find_old_sent(&self, older_than: DateTime<Utc>) -> Result<Vec<ForwardRecord>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT source_channel_id, source_message_id, recipient_user_id, session_phone,
                        forwarded_message_id, status, retry_count, error_message, grouped_id,
                        created_at, updated_at
                 FROM forwards
                 WHERE status = 'sent' AND created_at < ?1
                 ORDER BY recipient_user_id ASC, created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map(params![ts(older_than)], map_row).map_err(db_err)?;
        collect_records(rows)
    }

    /// Fetch a single row.
    pub fn get(
        &self,
        source_channel_id: &str,
        source_message_id: &str,
        recipient_user_id: &str,
    ) -> Result<Option<ForwardRecord>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT source_channel_id, source_message_id, recipient_user_id, session_phone,
                        forwarded_message_id, status, retry_count, error_message, grouped_id,
                        created_at, updated_at
                 FROM forwards
                 WHERE source_channel_id = ?1 AND source_message_id = ?2 AND recipient_user_id = ?3",
            )
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(
                params![source_channel_id, source_message_id, recipient_user_id],
                map_row,
            )
            .map_err(db_err)?;
        match rows.next() {
            Some(row) => Ok(Some(finish_row(row.map_err(db_err)?)?)),
            None => Ok(None),
        }
    }

    /// Aggregate counts, optionally narrowed to one session and/or channel.
    pub fn statistics(&self, filter: &StatsFilter) -> Result<LedgerStats> {
        let conn = self.db.conn.lock();
        let mut sql = String::from(
            "SELECT status, COUNT(*) FROM forwards WHERE recipient_user_id != ?1",
        );
        let mut params_vec: Vec<&dyn rusqlite::types::ToSql> = vec![&CHANNEL_MARKER_RECIPIENT];
        if let Some(phone) = &filter.session_phone {
            sql.push_str(" AND session_phone = ?2");
            params_vec.push(phone);
        }
        if let Some(channel) = &filter.source_channel_id {
            sql.push_str(if filter.session_phone.is_some() {
                " AND source_channel_id = ?3"
            } else {
                " AND source_channel_id = ?2"
            });
            params_vec.push(channel);
        }
        sql.push_str(" GROUP BY status");

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_vec.as_slice(), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?))
            })
            .map_err(db_err)?;

        let mut stats = LedgerStats::default();
        for row in rows {
            let (status, count) = row.map_err(db_err)?;
            match ForwardStatus::parse(&status) {
                Some(ForwardStatus::Pending) => stats.pending = count,
                Some(ForwardStatus::Sent) => stats.sent = count,
                Some(ForwardStatus::Failed) => stats.failed = count,
                Some(ForwardStatus::Skipped) => stats.skipped = count,
                Some(ForwardStatus::Deleted) => stats.deleted = count,
                None => {
                    tracing::warn!(status = %status, "unknown status in forwards table");
                }
            }
        }
        Ok(stats)
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

/// Intermediate row shape; timestamps parse outside the rusqlite closure so
/// errors surface as storage errors rather than query failures.
struct RawRecord {
    record: ForwardRecord,
    created_at: String,
    updated_at: String,
}

fn map_row(r: &Row<'_>) -> rusqlite::Result<RawRecord> {
    let status_raw: String = r.get(5)?;
    let status = ForwardStatus::parse(&status_raw).unwrap_or(ForwardStatus::Failed);
    Ok(RawRecord {
        record: ForwardRecord {
            source_channel_id: r.get(0)?,
            source_message_id: r.get(1)?,
            recipient_user_id: r.get(2)?,
            session_phone: r.get(3)?,
            forwarded_message_id: r.get(4)?,
            status,
            retry_count: r.get(6)?,
            error_message: r.get(7)?,
            grouped_id: r.get(8)?,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn finish_row(raw: RawRecord) -> Result<ForwardRecord> {
    let mut record = raw.record;
    record.created_at = parse_ts(&raw.created_at)?;
    record.updated_at = parse_ts(&raw.updated_at)?;
    Ok(record)
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<RawRecord>>,
) -> Result<Vec<ForwardRecord>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(finish_row(row.map_err(db_err)?)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> Ledger {
        Ledger::new(Db::open_in_memory().unwrap())
    }

    #[test]
    fn insert_is_idempotent() {
        let l = ledger();
        for _ in 0..3 {
            l.insert_pending("c1", "m1", "u1", "+100", None).unwrap();
        }
        let copies = l.find_copies("c1", "m1").unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].status, ForwardStatus::Pending);
    }

    #[test]
    fn sent_requires_pending() {
        let l = ledger();
        l.insert_pending("c1", "m1", "u1", "+100", None).unwrap();
        assert!(l.mark_sent("c1", "m1", "u1", "f1").unwrap());
        // Second transition refused.
        assert!(!l.mark_sent("c1", "m1", "u1", "f2").unwrap());

        let row = l.get("c1", "m1", "u1").unwrap().unwrap();
        assert_eq!(row.status, ForwardStatus::Sent);
        assert_eq!(row.forwarded_message_id.as_deref(), Some("f1"));
    }

    #[test]
    fn deleted_only_from_sent() {
        let l = ledger();
        l.insert_pending("c1", "m1", "u1", "+100", None).unwrap();
        // Not sent yet: nothing to delete.
        assert!(!l.mark_deleted("u1", "f1").unwrap());

        l.mark_sent("c1", "m1", "u1", "f1").unwrap();
        assert!(l.mark_deleted("u1", "f1").unwrap());

        let row = l.get("c1", "m1", "u1").unwrap().unwrap();
        assert_eq!(row.status, ForwardStatus::Deleted);
        assert_eq!(row.forwarded_message_id, None);

        // Deleted is terminal.
        assert!(!l.mark_sent("c1", "m1", "u1", "f2").unwrap());
        assert!(!l.mark_deleted("u1", "f1").unwrap());
    }

    #[test]
    fn failed_records_message_and_blocks_send() {
        let l = ledger();
        l.insert_pending("c1", "m1", "u1", "+100", None).unwrap();
        assert!(l.mark_failed("c1", "m1", "u1", "blocked by user").unwrap());
        assert!(!l.mark_sent("c1", "m1", "u1", "f1").unwrap());

        let row = l.get("c1", "m1", "u1").unwrap().unwrap();
        assert_eq!(row.status, ForwardStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some("blocked by user"));
    }

    #[test]
    fn retry_counter_is_monotone() {
        let l = ledger();
        l.insert_pending("c1", "m1", "u1", "+100", None).unwrap();
        assert_eq!(l.increment_retry("c1", "m1", "u1").unwrap(), 1);
        assert_eq!(l.increment_retry("c1", "m1", "u1").unwrap(), 2);
    }

    #[test]
    fn old_sent_rows_are_found_by_cutoff() {
        let l = ledger();
        l.insert_pending("c1", "m1", "u1", "+100", None).unwrap();
        l.mark_sent("c1", "m1", "u1", "f1").unwrap();
        l.insert_pending("c1", "m2", "u1", "+100", None).unwrap();
        l.mark_sent("c1", "m2", "u1", "f2").unwrap();

        // Backdate m1 by 25 hours.
        let old = ts(Utc::now() - chrono::Duration::hours(25));
        {
            let db = l.db.conn.lock();
            db.execute(
                "UPDATE forwards SET created_at = ?1 WHERE source_message_id = 'm1'",
                params![old],
            )
            .unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let rows = l.find_old_sent(cutoff).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_message_id, "m1");
    }

    #[test]
    fn statistics_exclude_channel_markers() {
        let l = ledger();
        l.insert_pending("c1", "m1", "u1", "+100", None).unwrap();
        l.mark_sent("c1", "m1", "u1", "f1").unwrap();
        l.insert_pending("c1", "m1", "u2", "+100", None).unwrap();
        l.insert_skipped_marker("c2", "m9", "+100", "forwarding disabled")
            .unwrap();

        let all = l.statistics(&StatsFilter::default()).unwrap();
        assert_eq!(all.sent, 1);
        assert_eq!(all.pending, 1);
        assert_eq!(all.skipped, 0, "marker rows are not per-recipient stats");
        assert_eq!(all.total(), 2);

        let narrowed = l
            .statistics(&StatsFilter {
                source_channel_id: Some("c1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(narrowed.total(), 2);
    }

    #[test]
    fn sent_then_deleted_round_trip() {
        let l = ledger();
        l.insert_pending("c1", "m1", "u1", "+100", None).unwrap();
        l.mark_sent("c1", "m1", "u1", "X").unwrap();
        l.mark_deleted("u1", "X").unwrap();

        let row = l.get("c1", "m1", "u1").unwrap().unwrap();
        assert_eq!(row.status, ForwardStatus::Deleted);
        assert_eq!(row.forwarded_message_id, None);
    }
}
