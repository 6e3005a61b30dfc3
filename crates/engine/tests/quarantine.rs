//! Quarantine behavior: flood waits pause the session, the resume sweep
//! brings it back, failed rows stay failed.

mod common;

use std::time::Duration;

use chrono::Utc;
use fc_domain::types::{ForwardStatus, SessionStatus};
use fc_transport::{ChannelMessage, ChatEvent, MessageBody, TransportError};

use common::{fast_config, marked, seed_channel, start, wait_until};

fn new_message(channel_id: &str, message_id: &str) -> ChatEvent {
    ChatEvent::NewMessage(ChannelMessage {
        channel_id: marked(channel_id),
        message_id: message_id.into(),
        grouped_id: None,
        body: MessageBody::text("post"),
        observed_at: Utc::now(),
    })
}

#[tokio::test]
async fn flood_wait_quarantines_the_session_and_resume_restores_it() {
    let mut config = fast_config();
    // Give the penalty consumer room to land before the next queued send.
    config.queue.min_inter_task_delay_ms = 50;
    config.queue.max_inter_task_delay_ms = 60;
    let h = start(config);

    let ta = h
        .add_session("+100", "uA", |t| {
            seed_channel(t, "77", "uA", &["u1", "u2", "u3"]);
        })
        .await;

    // Second recipient hits a 1-second flood wait.
    ta.fail_send_at(2, TransportError::FloodWait(1));

    let before = Utc::now();
    ta.inject(new_message("77", "m1")).await;

    // The fan-out settles: one sent, the flood-hit recipient failed, the
    // remaining recipient failed on the paused session.
    wait_until(Duration::from_secs(5), || {
        h.state
            .ledger
            .find_copies("77", "m1")
            .unwrap()
            .iter()
            .filter(|c| c.status != ForwardStatus::Pending)
            .count()
            == 3
    })
    .await;

    let copies = h.state.ledger.find_copies("77", "m1").unwrap();
    let by_status = |status: ForwardStatus| {
        copies.iter().filter(|c| c.status == status).count()
    };
    assert_eq!(by_status(ForwardStatus::Sent), 1);
    assert_eq!(by_status(ForwardStatus::Failed), 2);

    let flood_row = copies
        .iter()
        .find(|c| {
            c.error_message
                .as_deref()
                .is_some_and(|m| m.contains("flood wait"))
        })
        .expect("flood-failed row");
    assert_eq!(flood_row.status, ForwardStatus::Failed);

    // The session is quarantined with the platform-provided penalty.
    let session = h.state.sessions.get("+100").unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert!(session.auto_paused);
    let penalty = session.penalty_until.expect("penalty recorded");
    let expected = before + chrono::Duration::seconds(1);
    let skew = (penalty - expected).num_seconds().abs();
    assert!(skew <= 3, "penalty_until off by {skew}s");

    // Flood events are counted against the session.
    let snap = h.state.metrics.snapshot(Some("+100"));
    let session_point = snap.iter().find(|p| p.channel_id.is_none()).unwrap();
    assert_eq!(session_point.flood_events, 1);

    // After the penalty expires, the resume check re-activates the session.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    h.state.supervisor.resume_tick().await;

    let session = h.state.sessions.get("+100").unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(!session.auto_paused);
    assert_eq!(session.penalty_until, None);

    // No auto-retry across the pause boundary: the failed rows stay failed.
    let copies = h.state.ledger.find_copies("77", "m1").unwrap();
    assert_eq!(
        copies
            .iter()
            .filter(|c| c.status == ForwardStatus::Failed)
            .count(),
        2
    );

    // The resumed session forwards new messages again.
    ta.inject(new_message("77", "m2")).await;
    wait_until(Duration::from_secs(5), || {
        h.state
            .ledger
            .find_copies("77", "m2")
            .unwrap()
            .iter()
            .filter(|c| c.status == ForwardStatus::Sent)
            .count()
            == 3
    })
    .await;
}

#[tokio::test]
async fn transient_errors_retry_up_to_the_cap() {
    let h = start(fast_config());

    let ta = h
        .add_session("+100", "uA", |t| {
            seed_channel(t, "77", "uA", &["u1"]);
        })
        .await;

    // Two transient failures, then success: within the 3-attempt cap.
    ta.fail_send_at(1, TransportError::Network("reset".into()));
    ta.fail_send_at(2, TransportError::Timeout(Duration::from_secs(30)));

    ta.inject(new_message("77", "m1")).await;
    wait_until(Duration::from_secs(5), || {
        h.state
            .ledger
            .get("77", "m1", "u1")
            .unwrap()
            .is_some_and(|r| r.status == ForwardStatus::Sent)
    })
    .await;

    let row = h.state.ledger.get("77", "m1", "u1").unwrap().unwrap();
    assert_eq!(row.retry_count, 2);
    assert!(row.retry_count <= 3, "retry bound respected");
}

#[tokio::test]
async fn recipient_gone_is_terminal_without_retry() {
    let h = start(fast_config());

    let ta = h
        .add_session("+100", "uA", |t| {
            seed_channel(t, "77", "uA", &["u1"]);
        })
        .await;

    ta.fail_send_at(1, TransportError::RecipientGone("blocked by user".into()));

    ta.inject(new_message("77", "m1")).await;
    wait_until(Duration::from_secs(5), || {
        h.state
            .ledger
            .get("77", "m1", "u1")
            .unwrap()
            .is_some_and(|r| r.status == ForwardStatus::Failed)
    })
    .await;

    let row = h.state.ledger.get("77", "m1", "u1").unwrap().unwrap();
    assert_eq!(row.retry_count, 0, "permanent errors are not retried");
    assert!(row
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("blocked by user")));
    // Only one transport call was made.
    assert_eq!(ta.send_count(), 1);
}

#[tokio::test]
async fn auth_loss_moves_the_session_to_error() {
    let h = start(fast_config());

    let ta = h
        .add_session("+100", "uA", |t| {
            seed_channel(t, "77", "uA", &["u1"]);
        })
        .await;

    ta.fail_send_at(1, TransportError::AuthLost("auth key unregistered".into()));

    ta.inject(new_message("77", "m1")).await;
    wait_until(Duration::from_secs(5), || {
        h.state
            .sessions
            .get("+100")
            .unwrap()
            .is_some_and(|s| s.status == SessionStatus::Error)
    })
    .await;

    let session = h.state.sessions.get("+100").unwrap().unwrap();
    assert!(session
        .last_error
        .as_deref()
        .is_some_and(|m| m.contains("auth key unregistered")));

    // Error sessions are never auto-resumed.
    h.state.supervisor.resume_tick().await;
    let session = h.state.sessions.get("+100").unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Error);
}
