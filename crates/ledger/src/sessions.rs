//! Session identity and quarantine storage.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use fc_domain::types::{Credential, SessionRecord, SessionStatus};
use fc_domain::Result;

use crate::db::{db_err, now_ts, parse_ts, ts, Db};

#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Db>,
}

impl SessionRepo {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Register a session. Re-adding an existing phone refreshes the
    /// credential and requested status but keeps history fields.
    pub fn add(
        &self,
        phone: &str,
        credential: &Credential,
        user_id: Option<&str>,
        status: SessionStatus,
    ) -> Result<SessionRecord> {
        let now = now_ts();
        self.db
            .conn
            .lock()
            .execute(
                "INSERT INTO sessions (phone, user_id, credential, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT (phone) DO UPDATE SET
                   credential = excluded.credential,
                   user_id = COALESCE(excluded.user_id, sessions.user_id),
                   status = excluded.status,
                   updated_at = excluded.updated_at",
                params![phone, user_id, credential.reveal(), status.as_str(), now],
            )
            .map_err(db_err)?;
        self.get(phone)?
            .ok_or_else(|| fc_domain::Error::session(phone, "row vanished after insert"))
    }

    pub fn get(&self, phone: &str) -> Result<Option<SessionRecord>> {
        let conn = self.db.conn.lock();
        let raw = conn
            .query_row(
                &format!("{SESSION_SELECT} WHERE phone = ?1"),
                params![phone],
                map_session,
            )
            .optional()
            .map_err(db_err)?;
        raw.map(finish_session).transpose()
    }

    pub fn list(&self) -> Result<Vec<SessionRecord>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn
            .prepare(&format!("{SESSION_SELECT} ORDER BY phone ASC"))
            .map_err(db_err)?;
        let rows = stmt.query_map([], map_session).map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_session(row.map_err(db_err)?)?);
        }
        Ok(out)
    }

    /// Quarantined sessions whose penalty has expired at `now`.
    pub fn resumable(&self, now: DateTime<Utc>) -> Result<Vec<SessionRecord>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "{SESSION_SELECT}
                 WHERE status = 'paused' AND auto_paused = 1
                   AND (penalty_until IS NULL OR penalty_until <= ?1)"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map(params![ts(now)], map_session).map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_session(row.map_err(db_err)?)?);
        }
        Ok(out)
    }

    /// Record a successful connect: active, user id known, fresh activity.
    pub fn set_connected(&self, phone: &str, user_id: &str) -> Result<()> {
        let now = now_ts();
        self.db
            .conn
            .lock()
            .execute(
                "UPDATE sessions
                 SET status = 'active', user_id = ?2, last_active = ?3, last_error = NULL,
                     auto_paused = 0, pause_reason = NULL, penalty_until = NULL, updated_at = ?3
                 WHERE phone = ?1",
                params![phone, user_id, now],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Quarantine: paused with a penalty deadline.
    pub fn set_quarantine(
        &self,
        phone: &str,
        reason: &str,
        penalty_until: DateTime<Utc>,
    ) -> Result<()> {
        self.db
            .conn
            .lock()
            .execute(
                "UPDATE sessions
                 SET status = 'paused', auto_paused = 1, pause_reason = ?2,
                     penalty_until = ?3, updated_at = ?4
                 WHERE phone = ?1",
                params![phone, reason, ts(penalty_until), now_ts()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Operator-initiated pause; never auto-resumed.
    pub fn manual_pause(&self, phone: &str, reason: &str) -> Result<()> {
        self.db
            .conn
            .lock()
            .execute(
                "UPDATE sessions
                 SET status = 'paused', auto_paused = 0, pause_reason = ?2,
                     penalty_until = NULL, updated_at = ?3
                 WHERE phone = ?1",
                params![phone, reason, now_ts()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Back to active; clears quarantine state.
    pub fn resume(&self, phone: &str) -> Result<()> {
        self.db
            .conn
            .lock()
            .execute(
                "UPDATE sessions
                 SET status = 'active', auto_paused = 0, pause_reason = NULL,
                     penalty_until = NULL, updated_at = ?2
                 WHERE phone = ?1",
                params![phone, now_ts()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Fatal failure (auth loss); requires operator intervention.
    pub fn set_error(&self, phone: &str, message: &str) -> Result<()> {
        self.db
            .conn
            .lock()
            .execute(
                "UPDATE sessions
                 SET status = 'error', last_error = ?2, updated_at = ?3
                 WHERE phone = ?1",
                params![phone, message, now_ts()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn touch_active(&self, phone: &str) -> Result<()> {
        let now = now_ts();
        self.db
            .conn
            .lock()
            .execute(
                "UPDATE sessions SET last_active = ?2, updated_at = ?2 WHERE phone = ?1",
                params![phone, now],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Remove a session. Returns `false` for unknown phones.
    pub fn remove(&self, phone: &str) -> Result<bool> {
        let changed = self
            .db
            .conn
            .lock()
            .execute("DELETE FROM sessions WHERE phone = ?1", params![phone])
            .map_err(db_err)?;
        Ok(changed > 0)
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

const SESSION_SELECT: &str = "SELECT phone, user_id, credential, status, auto_paused, pause_reason,
        penalty_until, last_error, last_active, created_at, updated_at
 FROM sessions";

struct RawSession {
    record: SessionRecord,
    penalty_until: Option<String>,
    last_active: Option<String>,
    created_at: String,
    updated_at: String,
}

fn map_session(r: &Row<'_>) -> rusqlite::Result<RawSession> {
    let status_raw: String = r.get(3)?;
    let status = SessionStatus::parse(&status_raw).unwrap_or(SessionStatus::Error);
    let credential: String = r.get(2)?;
    Ok(RawSession {
        record: SessionRecord {
            phone: r.get(0)?,
            user_id: r.get(1)?,
            credential: Credential::new(credential),
            status,
            auto_paused: r.get(4)?,
            pause_reason: r.get(5)?,
            penalty_until: None,
            last_error: r.get(7)?,
            last_active: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        penalty_until: r.get(6)?,
        last_active: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn finish_session(raw: RawSession) -> Result<SessionRecord> {
    let mut record = raw.record;
    record.penalty_until = raw.penalty_until.as_deref().map(parse_ts).transpose()?;
    record.last_active = raw.last_active.as_deref().map(parse_ts).transpose()?;
    record.created_at = parse_ts(&raw.created_at)?;
    record.updated_at = parse_ts(&raw.updated_at)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SessionRepo {
        SessionRepo::new(Db::open_in_memory().unwrap())
    }

    fn cred() -> Credential {
        Credential::new("opaque-session-blob")
    }

    #[test]
    fn add_and_connect() {
        let r = repo();
        let s = r
            .add("+100", &cred(), None, SessionStatus::Paused)
            .unwrap();
        assert_eq!(s.status, SessionStatus::Paused);
        assert_eq!(s.user_id, None);

        r.set_connected("+100", "u100").unwrap();
        let s = r.get("+100").unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.user_id.as_deref(), Some("u100"));
        assert!(s.last_active.is_some());
    }

    #[test]
    fn quarantine_and_resumable() {
        let r = repo();
        r.add("+100", &cred(), None, SessionStatus::Active).unwrap();
        let until = Utc::now() + chrono::Duration::seconds(120);
        r.set_quarantine("+100", "flood wait 120s", until).unwrap();

        let s = r.get("+100").unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Paused);
        assert!(s.auto_paused);
        assert_eq!(s.pause_reason.as_deref(), Some("flood wait 120s"));

        // Not resumable before the deadline, resumable after.
        assert!(r.resumable(Utc::now()).unwrap().is_empty());
        let later = until + chrono::Duration::seconds(1);
        let due = r.resumable(later).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].phone, "+100");
    }

    #[test]
    fn manual_pause_is_not_resumable() {
        let r = repo();
        r.add("+100", &cred(), None, SessionStatus::Active).unwrap();
        r.manual_pause("+100", "operator hold").unwrap();

        let far_future = Utc::now() + chrono::Duration::days(365);
        assert!(r.resumable(far_future).unwrap().is_empty());
    }

    #[test]
    fn resume_clears_quarantine() {
        let r = repo();
        r.add("+100", &cred(), None, SessionStatus::Active).unwrap();
        r.set_quarantine("+100", "flood", Utc::now()).unwrap();
        r.resume("+100").unwrap();

        let s = r.get("+100").unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert!(!s.auto_paused);
        assert_eq!(s.pause_reason, None);
        assert_eq!(s.penalty_until, None);
    }

    #[test]
    fn error_state_records_message() {
        let r = repo();
        r.add("+100", &cred(), None, SessionStatus::Active).unwrap();
        r.set_error("+100", "auth key unregistered").unwrap();
        let s = r.get("+100").unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Error);
        assert_eq!(s.last_error.as_deref(), Some("auth key unregistered"));
    }

    #[test]
    fn remove_is_idempotent() {
        let r = repo();
        r.add("+100", &cred(), None, SessionStatus::Active).unwrap();
        assert!(r.remove("+100").unwrap());
        assert!(!r.remove("+100").unwrap());
        assert!(r.get("+100").unwrap().is_none());
    }
}
