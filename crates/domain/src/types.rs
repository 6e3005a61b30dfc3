//! Record types shared between the ledger, the transport layer and the
//! engine.
//!
//! Identifiers are opaque strings assigned by the chat platform; sessions are
//! keyed by phone number. Status enums carry their allowed transitions so
//! every crate enforces the same lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque session-restore credential.
///
/// Wrapped so it can never leak through `Debug` formatting or an API
/// serialization of the owning record.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw credential string, for handing to the transport connector.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Lifecycle state of an impersonating client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session tracked by the engine.
///
/// `penalty_until` is set while the session is quarantined after a
/// rate-limit or spam signal; the resume sweep re-activates it once the
/// timestamp has passed.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub phone: String,
    /// Platform user id, assigned after the first successful connect.
    pub user_id: Option<String>,
    #[serde(skip_serializing)]
    pub credential: Credential,
    pub status: SessionStatus,
    pub auto_paused: bool,
    pub pause_reason: Option<String>,
    pub penalty_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_active: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether the quarantine penalty has expired at `now`.
    pub fn resume_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Paused
            && self.auto_paused
            && self.penalty_until.map(|t| t <= now).unwrap_or(true)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-channel pacing parameters for the rate governor.
///
/// The effective gap between consecutive sends originated from one channel is
/// `clamp(base + member_count · per_member, min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelThrottle {
    pub base_delay_ms: u64,
    pub per_member_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ChannelThrottle {
    /// Minimum gap between sends for a channel with `member_count` members.
    pub fn gap_for(&self, member_count: u32) -> Duration {
        let raw = self.base_delay_ms + self.per_member_delay_ms * u64::from(member_count);
        Duration::from_millis(raw.clamp(self.min_delay_ms, self.max_delay_ms))
    }
}

/// A broadcast channel known to the engine.
///
/// Only messages observed through `owning_session` (the session holding
/// administrative rights) trigger fan-out, and only while `forward_enabled`.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub title: String,
    pub username: Option<String>,
    pub member_count: u32,
    pub forward_enabled: bool,
    pub owning_session: Option<String>,
    /// Per-channel override; `None` falls back to the configured default.
    pub throttle: Option<ChannelThrottle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Users and operators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A channel member, eligible to receive forwarded copies unless flagged as
/// a bot or listed as an operator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserRecord {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub is_bot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperatorRole {
    Admin,
    SuperAdmin,
}

impl OperatorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::SuperAdmin => "superAdmin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Self::Admin),
            "superAdmin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }
}

/// A control-plane administrator. Active operators are excluded from every
/// fan-out regardless of channel membership.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorRecord {
    pub user_id: String,
    pub role: OperatorRole,
    pub is_active: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Forward ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Status of one forwarded copy.
///
/// Transitions form a fixed DAG: `Pending → {Sent, Failed, Skipped}` and
/// `Sent → Deleted`. Everything else is refused by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
    Deleted,
}

impl ForwardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Whether a row in `self` may move to `next`.
    pub fn can_transition(self, next: ForwardStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sent)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Skipped)
                | (Self::Sent, Self::Deleted)
        )
    }
}

impl std::fmt::Display for ForwardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the forward ledger: a single copy of a single source message
/// addressed to a single recipient.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardRecord {
    pub source_channel_id: String,
    pub source_message_id: String,
    pub recipient_user_id: String,
    /// Phone of the session that performed (or will perform) the send.
    pub session_phone: String,
    /// Identifier of the private copy; `None` until sent and again after
    /// revocation.
    pub forwarded_message_id: Option<String>,
    pub status: ForwardStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    /// Album/media-group correlation id, when the source message was part of
    /// a grouped post.
    pub grouped_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fan-out reporting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregated outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}
