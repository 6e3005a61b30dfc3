//! Channel, user, membership and operator storage.
//!
//! Membership replacement happens inside a single transaction so readers
//! never observe a half-rewritten member list.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};

use fc_domain::types::{ChannelRecord, ChannelThrottle, OperatorRecord, OperatorRole, UserRecord};
use fc_domain::{Error, Result};

use crate::db::{db_err, now_ts, parse_ts, Db};

#[derive(Clone)]
pub struct Directory {
    db: Arc<Db>,
}

impl Directory {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    // ── Channels ─────────────────────────────────────────────────────

    /// Insert or refresh a channel discovered during membership sync.
    /// Forwarding policy and throttle overrides survive re-discovery.
    pub fn upsert_channel(
        &self,
        channel_id: &str,
        title: &str,
        username: Option<&str>,
        member_count: u32,
        owning_session: &str,
    ) -> Result<()> {
        let now = now_ts();
        self.db
            .conn
            .lock()
            .execute(
                "INSERT INTO channels (channel_id, title, username, member_count,
                                       owning_session, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (channel_id) DO UPDATE SET
                   title = excluded.title,
                   username = excluded.username,
                   member_count = excluded.member_count,
                   owning_session = excluded.owning_session,
                   updated_at = excluded.updated_at",
                params![channel_id, title, username, member_count, owning_session, now],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Toggle fan-out for a channel. Returns `false` for unknown channels.
    pub fn set_forward_enabled(&self, channel_id: &str, enabled: bool) -> Result<bool> {
        let changed = self
            .db
            .conn
            .lock()
            .execute(
                "UPDATE channels SET forward_enabled = ?2, updated_at = ?3
                 WHERE channel_id = ?1",
                params![channel_id, enabled, now_ts()],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Set or clear the per-channel throttle override.
    pub fn set_throttle(
        &self,
        channel_id: &str,
        throttle: Option<ChannelThrottle>,
    ) -> Result<bool> {
        let changed = self
            .db
            .conn
            .lock()
            .execute(
                "UPDATE channels SET base_delay_ms = ?2, per_member_delay_ms = ?3,
                        min_delay_ms = ?4, max_delay_ms = ?5, updated_at = ?6
                 WHERE channel_id = ?1",
                params![
                    channel_id,
                    throttle.map(|t| t.base_delay_ms),
                    throttle.map(|t| t.per_member_delay_ms),
                    throttle.map(|t| t.min_delay_ms),
                    throttle.map(|t| t.max_delay_ms),
                    now_ts()
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelRecord>> {
        let conn = self.db.conn.lock();
        let raw = conn
            .query_row(
                &format!("{CHANNEL_SELECT} WHERE channel_id = ?1"),
                params![channel_id],
                map_channel,
            )
            .optional()
            .map_err(db_err)?;
        raw.map(finish_channel).transpose()
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelRecord>> {
        self.query_channels(&format!("{CHANNEL_SELECT} ORDER BY title ASC"))
    }

    /// Channels eligible for fan-out: forwarding on and an owning session
    /// assigned. This is the router's admission set.
    pub fn monitored_channels(&self) -> Result<Vec<ChannelRecord>> {
        self.query_channels(&format!(
            "{CHANNEL_SELECT} WHERE forward_enabled = 1 AND owning_session IS NOT NULL"
        ))
    }

    fn query_channels(&self, sql: &str) -> Result<Vec<ChannelRecord>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map([], map_channel).map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_channel(row.map_err(db_err)?)?);
        }
        Ok(out)
    }

    // ── Users ────────────────────────────────────────────────────────

    pub fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        self.db
            .conn
            .lock()
            .execute(
                "INSERT INTO users (user_id, first_name, last_name, username, phone, is_bot, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id) DO UPDATE SET
                   first_name = excluded.first_name,
                   last_name = excluded.last_name,
                   username = excluded.username,
                   phone = excluded.phone,
                   is_bot = excluded.is_bot,
                   updated_at = excluded.updated_at",
                params![
                    user.user_id,
                    user.first_name,
                    user.last_name,
                    user.username,
                    user.phone,
                    user.is_bot,
                    now_ts()
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Atomically replace a channel's member list.
    pub fn replace_members(&self, channel_id: &str, user_ids: &[String]) -> Result<()> {
        let mut conn = self.db.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM channel_members WHERE channel_id = ?1",
            params![channel_id],
        )
        .map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare("INSERT OR IGNORE INTO channel_members (channel_id, user_id) VALUES (?1, ?2)")
                .map_err(db_err)?;
            for user_id in user_ids {
                stmt.execute(params![channel_id, user_id]).map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)
    }

    pub fn member_count(&self, channel_id: &str) -> Result<u32> {
        self.db
            .conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM channel_members WHERE channel_id = ?1",
                params![channel_id],
                |r| r.get(0),
            )
            .map_err(db_err)
    }

    /// Fan-out recipient set for a channel: members that are not bots and
    /// not active operators, in stable order.
    pub fn channel_recipients(&self, channel_id: &str) -> Result<Vec<String>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT u.user_id
                 FROM channel_members m
                 JOIN users u ON u.user_id = m.user_id
                 WHERE m.channel_id = ?1
                   AND u.is_bot = 0
                   AND u.user_id NOT IN (SELECT user_id FROM operators WHERE is_active = 1)
                 ORDER BY u.user_id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![channel_id], |r| r.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    // ── Operators ────────────────────────────────────────────────────

    pub fn upsert_operator(&self, user_id: &str, role: OperatorRole, is_active: bool) -> Result<()> {
        self.db
            .conn
            .lock()
            .execute(
                "INSERT INTO operators (user_id, role, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id) DO UPDATE SET
                   role = excluded.role,
                   is_active = excluded.is_active",
                params![user_id, role.as_str(), is_active, now_ts()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn list_operators(&self) -> Result<Vec<OperatorRecord>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn
            .prepare("SELECT user_id, role, is_active FROM operators ORDER BY user_id ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, bool>(2)?,
                ))
            })
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (user_id, role_raw, is_active) = row.map_err(db_err)?;
            let role = OperatorRole::parse(&role_raw)
                .ok_or_else(|| Error::Storage(format!("unknown operator role {role_raw:?}")))?;
            out.push(OperatorRecord {
                user_id,
                role,
                is_active,
            });
        }
        Ok(out)
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

const CHANNEL_SELECT: &str = "SELECT channel_id, title, username, member_count, forward_enabled,
        owning_session, base_delay_ms, per_member_delay_ms, min_delay_ms, max_delay_ms,
        created_at, updated_at
 FROM channels";

struct RawChannel {
    record: ChannelRecord,
    created_at: String,
    updated_at: String,
}

fn map_channel(r: &Row<'_>) -> rusqlite::Result<RawChannel> {
    let base: Option<u64> = r.get(6)?;
    let per_member: Option<u64> = r.get(7)?;
    let min: Option<u64> = r.get(8)?;
    let max: Option<u64> = r.get(9)?;
    // The override is only meaningful when all four columns are present.
    let throttle = match (base, per_member, min, max) {
        (Some(base_delay_ms), Some(per_member_delay_ms), Some(min_delay_ms), Some(max_delay_ms)) => {
            Some(ChannelThrottle {
                base_delay_ms,
                per_member_delay_ms,
                min_delay_ms,
                max_delay_ms,
            })
        }
        _ => None,
    };
    Ok(RawChannel {
        record: ChannelRecord {
            channel_id: r.get(0)?,
            title: r.get(1)?,
            username: r.get(2)?,
            member_count: r.get(3)?,
            forward_enabled: r.get(4)?,
            owning_session: r.get(5)?,
            throttle,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        },
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

fn finish_channel(raw: RawChannel) -> Result<ChannelRecord> {
    let mut record = raw.record;
    record.created_at = parse_ts(&raw.created_at)?;
    record.updated_at = parse_ts(&raw.updated_at)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Directory {
        Directory::new(Db::open_in_memory().unwrap())
    }

    fn user(id: &str, is_bot: bool) -> UserRecord {
        UserRecord {
            user_id: id.into(),
            is_bot,
            ..Default::default()
        }
    }

    #[test]
    fn upsert_preserves_forwarding_policy() {
        let d = directory();
        d.upsert_channel("c1", "News", None, 10, "+100").unwrap();
        d.set_forward_enabled("c1", false).unwrap();

        // Re-discovery during sync must not flip the toggle back.
        d.upsert_channel("c1", "News (renamed)", Some("news"), 12, "+100")
            .unwrap();
        let ch = d.get_channel("c1").unwrap().unwrap();
        assert!(!ch.forward_enabled);
        assert_eq!(ch.title, "News (renamed)");
        assert_eq!(ch.member_count, 12);
    }

    #[test]
    fn monitored_requires_owner_and_toggle() {
        let d = directory();
        d.upsert_channel("c1", "A", None, 1, "+100").unwrap();
        d.upsert_channel("c2", "B", None, 1, "+200").unwrap();
        d.set_forward_enabled("c2", false).unwrap();

        let monitored = d.monitored_channels().unwrap();
        let ids: Vec<_> = monitored.iter().map(|c| c.channel_id.as_str()).collect();
        assert_eq!(ids, vec!["c1"]);
    }

    #[test]
    fn member_replacement_is_total() {
        let d = directory();
        d.upsert_channel("c1", "A", None, 3, "+100").unwrap();
        for id in ["u1", "u2", "u3"] {
            d.upsert_user(&user(id, false)).unwrap();
        }
        d.replace_members("c1", &["u1".into(), "u2".into(), "u3".into()])
            .unwrap();
        assert_eq!(d.member_count("c1").unwrap(), 3);

        // A later sync shrinks the set; no stale members survive.
        d.replace_members("c1", &["u2".into()]).unwrap();
        assert_eq!(d.member_count("c1").unwrap(), 1);
        assert_eq!(d.channel_recipients("c1").unwrap(), vec!["u2".to_string()]);
    }

    #[test]
    fn recipients_exclude_bots_and_active_operators() {
        let d = directory();
        d.upsert_channel("c1", "A", None, 4, "+100").unwrap();
        d.upsert_user(&user("u1", false)).unwrap();
        d.upsert_user(&user("u2", true)).unwrap(); // bot
        d.upsert_user(&user("u3", false)).unwrap();
        d.upsert_user(&user("u4", false)).unwrap();
        d.replace_members(
            "c1",
            &["u1".into(), "u2".into(), "u3".into(), "u4".into()],
        )
        .unwrap();

        d.upsert_operator("u3", OperatorRole::Admin, true).unwrap();
        d.upsert_operator("u4", OperatorRole::SuperAdmin, false)
            .unwrap(); // inactive: still a recipient

        let recipients = d.channel_recipients("c1").unwrap();
        assert_eq!(recipients, vec!["u1".to_string(), "u4".to_string()]);
    }

    #[test]
    fn throttle_override_round_trips() {
        let d = directory();
        d.upsert_channel("c1", "A", None, 0, "+100").unwrap();
        assert!(d.get_channel("c1").unwrap().unwrap().throttle.is_none());

        let t = ChannelThrottle {
            base_delay_ms: 2000,
            per_member_delay_ms: 5,
            min_delay_ms: 1000,
            max_delay_ms: 8000,
        };
        d.set_throttle("c1", Some(t)).unwrap();
        assert_eq!(d.get_channel("c1").unwrap().unwrap().throttle, Some(t));

        d.set_throttle("c1", None).unwrap();
        assert!(d.get_channel("c1").unwrap().unwrap().throttle.is_none());
    }
}
