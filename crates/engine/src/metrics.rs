//! Per-session, per-channel delivery counters.
//!
//! In-memory, lock-protected daily buckets that auto-reset when the UTC date
//! rolls over. Flood and spam events are session-scoped (no channel key);
//! send outcomes are keyed to the originating channel.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Session-scoped bucket key (no channel attribution).
const SESSION_SCOPE: &str = "";

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct MetricKey {
    session_phone: String,
    channel_id: String,
}

struct DailyCounters {
    date: NaiveDate,
    messages_sent: u64,
    messages_failed: u64,
    flood_events: u64,
    spam_events: u64,
}

impl DailyCounters {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            date,
            messages_sent: 0,
            messages_failed: 0,
            flood_events: 0,
            spam_events: 0,
        }
    }
}

/// One row of a metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsPoint {
    pub session_phone: String,
    /// `None` for session-scoped counters (flood/spam events).
    pub channel_id: Option<String>,
    pub date: String,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub flood_events: u64,
    pub spam_events: u64,
}

/// In-memory metrics registry shared by the dispatcher, the revocation
/// worker and the supervisor.
#[derive(Default)]
pub struct MetricsRegistry {
    buckets: RwLock<HashMap<MetricKey, DailyCounters>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, session_phone: &str, channel_id: &str) {
        self.bump(session_phone, channel_id, |c| c.messages_sent += 1);
    }

    pub fn record_failed(&self, session_phone: &str, channel_id: &str) {
        self.bump(session_phone, channel_id, |c| c.messages_failed += 1);
    }

    pub fn record_flood(&self, session_phone: &str) {
        self.bump(session_phone, SESSION_SCOPE, |c| c.flood_events += 1);
    }

    pub fn record_spam(&self, session_phone: &str) {
        self.bump(session_phone, SESSION_SCOPE, |c| c.spam_events += 1);
    }

    fn bump(&self, session_phone: &str, channel_id: &str, f: impl FnOnce(&mut DailyCounters)) {
        let today = Utc::now().date_naive();
        let key = MetricKey {
            session_phone: session_phone.to_owned(),
            channel_id: channel_id.to_owned(),
        };
        let mut buckets = self.buckets.write();
        let entry = buckets.entry(key).or_insert_with(|| DailyCounters::fresh(today));

        // Day rolled over — reset counters.
        if entry.date != today {
            *entry = DailyCounters::fresh(today);
        }
        f(entry);
    }

    /// Today's counters, sorted for stable output. Optionally narrowed to one
    /// session.
    pub fn snapshot(&self, session_phone: Option<&str>) -> Vec<MetricsPoint> {
        let today = Utc::now().date_naive();
        let buckets = self.buckets.read();
        let mut points: Vec<MetricsPoint> = buckets
            .iter()
            .filter(|(_, c)| c.date == today)
            .filter(|(k, _)| session_phone.map_or(true, |p| k.session_phone == p))
            .map(|(k, c)| MetricsPoint {
                session_phone: k.session_phone.clone(),
                channel_id: (!k.channel_id.is_empty()).then(|| k.channel_id.clone()),
                date: c.date.to_string(),
                messages_sent: c.messages_sent,
                messages_failed: c.messages_failed,
                flood_events: c.flood_events,
                spam_events: c.spam_events,
            })
            .collect();
        points.sort_by(|a, b| {
            (&a.session_phone, &a.channel_id).cmp(&(&b.session_phone, &b.channel_id))
        });
        points
    }
}
