//! Revocation: event-driven deletion and the scheduled retention sweep.

mod common;

use std::time::Duration;

use chrono::Utc;
use fc_domain::types::ForwardStatus;
use fc_transport::{ChannelMessage, ChatEvent, ChatTransport, MessageBody, TransportError};

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

/// Wait until every copy of a source message is `sent`.
async fn wait_all_sent(h: &common::Harness, message_id: &str, expected: usize) {
    let ledger = h.state.ledger.clone();
    let message_id = message_id.to_owned();
    wait_until(Duration::from_secs(5), move || {
        let copies = ledger.find_copies("77", &message_id).unwrap();
        copies.len() == expected && copies.iter().all(|c| c.status == ForwardStatus::Sent)
    })
    .await;
}

/// Backdate every row of one source message by the given number of hours.
fn backdate(h: &common::Harness, message_id: &str, hours: i64) {
    let ts = (Utc::now() - chrono::Duration::hours(hours))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    let conn = h.state.db.conn.lock();
    conn.execute(
        "UPDATE forwards SET created_at = ?1 WHERE source_message_id = ?2",
        rusqlite::params![ts, message_id],
    )
    .unwrap();
}

#[tokio::test]
async fn channel_delete_revokes_every_copy() {
    let h = start(fast_config());

    let ta = h
        .add_session("+100", "uA", |t| {
            seed_channel(t, "77", "uA", &["u1", "u2", "u3"]);
        })
        .await;

    ta.inject(new_message("77", "m1")).await;
    wait_all_sent(&h, "m1", 3).await;

    ta.inject(ChatEvent::MessagesDeleted {
        channel_id: marked("77"),
        message_ids: vec!["m1".into()],
    })
    .await;

    wait_until(Duration::from_secs(5), || ta.delete_calls().len() == 3).await;
    wait_until(Duration::from_secs(5), || {
        h.state
            .ledger
            .find_copies("77", "m1")
            .unwrap()
            .iter()
            .all(|c| c.status == ForwardStatus::Deleted)
    })
    .await;

    let copies = h.state.ledger.find_copies("77", "m1").unwrap();
    assert_eq!(copies.len(), 3);
    assert!(copies.iter().all(|c| c.forwarded_message_id.is_none()));
}

#[tokio::test]
async fn scheduled_sweep_revokes_only_expired_copies() {
    let h = start(fast_config());

    let ta = h
        .add_session("+100", "uA", |t| {
            seed_channel(t, "77", "uA", &["u1", "u2", "u3", "u4", "u5"]);
        })
        .await;

    // Two fan-outs of five copies each; one aged past retention.
    ta.inject(new_message("77", "old")).await;
    wait_all_sent(&h, "old", 5).await;
    ta.inject(new_message("77", "fresh")).await;
    wait_all_sent(&h, "fresh", 5).await;

    backdate(&h, "old", 25);
    backdate(&h, "fresh", 1);

    let report = h.state.revoker.run_sweep().await;
    assert_eq!(report.examined, 5);
    assert_eq!(report.revoked, 5);

    let old = h.state.ledger.find_copies("77", "old").unwrap();
    assert!(old.iter().all(|c| c.status == ForwardStatus::Deleted));
    let fresh = h.state.ledger.find_copies("77", "fresh").unwrap();
    assert!(fresh.iter().all(|c| c.status == ForwardStatus::Sent));
}

#[tokio::test]
async fn copies_already_gone_still_count_as_revoked() {
    let h = start(fast_config());

    let ta = h
        .add_session("+100", "uA", |t| {
            seed_channel(t, "77", "uA", &["u1"]);
        })
        .await;

    ta.inject(new_message("77", "m1")).await;
    wait_all_sent(&h, "m1", 1).await;

    // Recipient (or the platform) already removed the copy.
    let forwarded_id = h
        .state
        .ledger
        .get("77", "m1", "u1")
        .unwrap()
        .unwrap()
        .forwarded_message_id
        .unwrap();
    ta.delete("u1", &forwarded_id).await.unwrap();

    backdate(&h, "m1", 30);
    let report = h.state.revoker.run_sweep().await;
    assert_eq!(report.revoked, 1, "NotFound still marks the row deleted");

    let row = h.state.ledger.get("77", "m1", "u1").unwrap().unwrap();
    assert_eq!(row.status, ForwardStatus::Deleted);
}

#[tokio::test]
async fn delete_failures_leave_the_row_for_the_next_sweep() {
    let h = start(fast_config());

    let ta = h
        .add_session("+100", "uA", |t| {
            seed_channel(t, "77", "uA", &["u1"]);
        })
        .await;

    ta.inject(new_message("77", "m1")).await;
    wait_all_sent(&h, "m1", 1).await;
    backdate(&h, "m1", 30);

    ta.fail_next_delete(TransportError::Network("reset".into()));
    let report = h.state.revoker.run_sweep().await;
    assert_eq!(report.revoked, 0);
    assert_eq!(report.failed, 1);
    let row = h.state.ledger.get("77", "m1", "u1").unwrap().unwrap();
    assert_eq!(row.status, ForwardStatus::Sent, "row survives for retry");

    // The next sweep succeeds.
    let report = h.state.revoker.run_sweep().await;
    assert_eq!(report.revoked, 1);
    let row = h.state.ledger.get("77", "m1", "u1").unwrap().unwrap();
    assert_eq!(row.status, ForwardStatus::Deleted);
}
