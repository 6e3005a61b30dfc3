//! Operator-facing control surface.
//!
//! The operator collaborator (control bot, admin API) drives the engine
//! exclusively through these operations; nothing here is called from the
//! hot forwarding path.

use serde::{Deserialize, Serialize};

use fc_domain::types::{
    ChannelRecord, ChannelThrottle, Credential, SessionRecord, SessionStatus,
};
use fc_domain::{Error, Result};
use fc_ledger::{LedgerStats, StatsFilter};

use crate::metrics::MetricsPoint;
use crate::state::EngineState;

/// Provisioning request for a new (or re-provisioned) session.
#[derive(Debug, Clone, Deserialize)]
pub struct AddSessionRequest {
    pub phone: String,
    /// Opaque restore credential produced by the provisioning collaborator.
    pub credential: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Defaults to `active` (the session connects immediately).
    #[serde(default)]
    pub initial_status: Option<SessionStatus>,
}

/// Aggregate statistics exposed to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub ledger: LedgerStats,
    pub metrics: Vec<MetricsPoint>,
}

/// Register a session and, unless provisioned paused, connect it.
pub async fn add_session(state: &EngineState, req: AddSessionRequest) -> Result<SessionRecord> {
    let status = req.initial_status.unwrap_or(SessionStatus::Active);
    let stored_status = if status == SessionStatus::Active {
        // The row goes in paused and flips to active on successful connect,
        // so a failed connect cannot leave a phantom active session.
        SessionStatus::Paused
    } else {
        status
    };

    state.sessions.add(
        &req.phone,
        &Credential::new(req.credential),
        req.user_id.as_deref(),
        stored_status,
    )?;

    if status == SessionStatus::Active {
        state.supervisor.start_session(&req.phone).await?;
    }

    state
        .sessions
        .get(&req.phone)?
        .ok_or_else(|| Error::session(&req.phone, "session vanished during provisioning"))
}

/// Operator pause: stops forwarding and drops the connection. Never
/// auto-resumed.
pub fn pause_session(state: &EngineState, phone: &str, reason: &str) -> Result<SessionRecord> {
    require_session(state, phone)?;
    state.supervisor.stop_session(phone, reason)?;
    require_session(state, phone)
}

/// Operator resume: clears any pause (manual or quarantine) and reconnects
/// if needed.
pub async fn resume_session(state: &EngineState, phone: &str) -> Result<SessionRecord> {
    require_session(state, phone)?;
    state.supervisor.resume_session(phone).await?;
    require_session(state, phone)
}

/// Remove a session and its runtime state. Returns `false` for unknown
/// phones.
pub fn remove_session(state: &EngineState, phone: &str) -> Result<bool> {
    state.supervisor.remove_session(phone)
}

pub fn list_sessions(state: &EngineState) -> Result<Vec<SessionRecord>> {
    state.sessions.list()
}

/// Toggle fan-out for a channel and refresh the router's admission set.
pub fn set_channel_forwarding(
    state: &EngineState,
    channel_id: &str,
    enabled: bool,
) -> Result<ChannelRecord> {
    if !state.directory.set_forward_enabled(channel_id, enabled)? {
        return Err(Error::Channel {
            channel_id: channel_id.to_owned(),
            message: "unknown channel".into(),
        });
    }
    state
        .router
        .rebuild_monitored(&state.directory.monitored_channels()?);
    require_channel(state, channel_id)
}

/// Set or clear a channel's pacing override.
pub fn set_channel_throttle(
    state: &EngineState,
    channel_id: &str,
    throttle: Option<ChannelThrottle>,
) -> Result<ChannelRecord> {
    if !state.directory.set_throttle(channel_id, throttle)? {
        return Err(Error::Channel {
            channel_id: channel_id.to_owned(),
            message: "unknown channel".into(),
        });
    }
    require_channel(state, channel_id)
}

pub fn list_channels(state: &EngineState) -> Result<Vec<ChannelRecord>> {
    state.directory.list_channels()
}

/// Ledger counts plus today's in-memory counters.
pub fn get_statistics(state: &EngineState, filter: &StatsFilter) -> Result<Statistics> {
    Ok(Statistics {
        ledger: state.ledger.statistics(filter)?,
        metrics: state.metrics.snapshot(filter.session_phone.as_deref()),
    })
}

fn require_session(state: &EngineState, phone: &str) -> Result<SessionRecord> {
    state
        .sessions
        .get(phone)?
        .ok_or_else(|| Error::session(phone, "unknown session"))
}

fn require_channel(state: &EngineState, channel_id: &str) -> Result<ChannelRecord> {
    state.directory.get_channel(channel_id)?.ok_or_else(|| Error::Channel {
        channel_id: channel_id.to_owned(),
        message: "unknown channel".into(),
    })
}
