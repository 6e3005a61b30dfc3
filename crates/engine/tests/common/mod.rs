//! Shared harness for the engine integration tests.
//!
//! Everything runs against the in-memory transport and an in-memory SQLite
//! database; tests drive the engine by injecting transport events and
//! calling component entry points directly.

use std::sync::Arc;
use std::time::Duration;

use fc_domain::config::Config;
use fc_domain::types::ChannelThrottle;
use fc_engine::control::{self, AddSessionRequest};
use fc_engine::{bootstrap, EngineState};
use fc_transport::memory::{InMemoryConnector, InMemoryTransport};
use fc_transport::{DialogInfo, ParticipantRole, TransportConnector, UserInfo};

pub struct Harness {
    pub state: EngineState,
    pub connector: Arc<InMemoryConnector>,
}

/// A configuration with every pacing knob dialed down so tests run in
/// milliseconds.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.storage.path = ":memory:".into();
    config.rate.global.capacity = 10_000;
    config.rate.global.refill_per_minute = 600_000;
    config.rate.session.tokens_per_minute = 600_000;
    config.rate.recipient.min_gap_ms = 0;
    config.rate.channel = ChannelThrottle {
        base_delay_ms: 0,
        per_member_delay_ms: 0,
        min_delay_ms: 0,
        max_delay_ms: 0,
    };
    config.dispatch.inter_chunk_delay_ms = 0;
    config.queue.min_inter_task_delay_ms = 0;
    config.queue.max_inter_task_delay_ms = 0;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config
}

/// Build the engine and spawn its background workers.
pub fn start(config: Config) -> Harness {
    let connector = InMemoryConnector::new();
    let dyn_connector: Arc<dyn TransportConnector> = connector.clone();
    let state = bootstrap::build(Arc::new(config), dyn_connector).expect("engine build");
    bootstrap::spawn_background(&state);
    Harness { state, connector }
}

impl Harness {
    /// Register and connect a session whose transport is pre-seeded by
    /// `seed` (dialogs, roles, participants) before the initial sync runs.
    pub async fn add_session(
        &self,
        phone: &str,
        user_id: &str,
        seed: impl FnOnce(&InMemoryTransport),
    ) -> Arc<InMemoryTransport> {
        let transport = InMemoryTransport::new();
        seed(&transport);
        self.connector.register(phone, user_id, transport.clone());
        control::add_session(
            &self.state,
            AddSessionRequest {
                phone: phone.into(),
                credential: "test-credential".into(),
                user_id: None,
                initial_status: None,
            },
        )
        .await
        .expect("session starts");
        transport
    }
}

/// Seed one broadcast channel the session administers, with the given
/// non-bot members.
pub fn seed_channel(
    transport: &InMemoryTransport,
    channel_id: &str,
    admin_user_id: &str,
    member_ids: &[&str],
) {
    transport.set_dialogs(vec![DialogInfo {
        channel_id: channel_id.into(),
        title: format!("channel {channel_id}"),
        username: None,
        member_count: member_ids.len() as u32,
        is_broadcast: true,
    }]);
    transport.set_role(channel_id, admin_user_id, ParticipantRole::Admin);
    transport.set_participants(
        channel_id,
        member_ids
            .iter()
            .map(|id| UserInfo {
                user_id: (*id).into(),
                ..Default::default()
            })
            .collect(),
    );
}

/// The marked (wire-format) form of a canonical channel id, as events carry
/// it.
pub fn marked(channel_id: &str) -> String {
    format!("-100{channel_id}")
}

/// Poll until `check` passes or the timeout elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
