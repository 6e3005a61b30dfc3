//! In-memory transport.
//!
//! Deterministic stand-in for the real platform client, used by the engine
//! test suite and by local runs without credentials. Sends and deletes are
//! recorded with ordering and timing information; failures are scripted per
//! call index; update events are injected by the caller.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::event::{ChatEvent, MessageBody};
use crate::traits::{
    ChatTransport, DeleteOutcome, DialogInfo, ParticipantRole, TransportConnector, UserInfo,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A recorded outbound send.
#[derive(Debug, Clone)]
pub struct SentCall {
    pub recipient_user_id: String,
    pub body: MessageBody,
    pub forwarded_message_id: String,
    /// 1-based global call index, for cross-recipient ordering assertions.
    pub seq: u64,
    pub at: Instant,
}

/// A recorded delete.
#[derive(Debug, Clone)]
pub struct DeleteCall {
    pub recipient_user_id: String,
    pub forwarded_message_id: String,
}

#[derive(Default)]
struct Inner {
    sent: Vec<SentCall>,
    deleted: Vec<DeleteCall>,
    /// Scripted failures keyed by the 1-based send call index they hit.
    send_failures: HashMap<u64, TransportError>,
    delete_failures: VecDeque<TransportError>,
    send_count: u64,
    participants: HashMap<String, Vec<UserInfo>>,
    roles: HashMap<(String, String), ParticipantRole>,
    dialogs: Vec<DialogInfo>,
    subscribers: Vec<mpsc::Sender<ChatEvent>>,
}

/// In-memory [`ChatTransport`] for one session.
#[derive(Default)]
pub struct InMemoryTransport {
    inner: Mutex<Inner>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ── Scripting ────────────────────────────────────────────────────

    pub fn set_dialogs(&self, dialogs: Vec<DialogInfo>) {
        self.inner.lock().dialogs = dialogs;
    }

    pub fn set_participants(&self, channel_id: &str, users: Vec<UserInfo>) {
        self.inner
            .lock()
            .participants
            .insert(channel_id.to_owned(), users);
    }

    pub fn set_role(&self, channel_id: &str, user_id: &str, role: ParticipantRole) {
        self.inner
            .lock()
            .roles
            .insert((channel_id.to_owned(), user_id.to_owned()), role);
    }

    /// Fail the `n`-th send call (1-based, counted across all recipients).
    pub fn fail_send_at(&self, n: u64, err: TransportError) {
        self.inner.lock().send_failures.insert(n, err);
    }

    /// Fail the next delete call.
    pub fn fail_next_delete(&self, err: TransportError) {
        self.inner.lock().delete_failures.push_back(err);
    }

    /// Push an update event to every active subscriber.
    pub async fn inject(&self, event: ChatEvent) {
        let subscribers: Vec<_> = self.inner.lock().subscribers.clone();
        for tx in subscribers {
            // A dropped receiver just means the session stopped.
            let _ = tx.send(event.clone()).await;
        }
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn sent_calls(&self) -> Vec<SentCall> {
        self.inner.lock().sent.clone()
    }

    /// Sends addressed to one recipient, in call order.
    pub fn sent_to(&self, recipient_user_id: &str) -> Vec<SentCall> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|c| c.recipient_user_id == recipient_user_id)
            .cloned()
            .collect()
    }

    pub fn delete_calls(&self) -> Vec<DeleteCall> {
        self.inner.lock().deleted.clone()
    }

    pub fn send_count(&self) -> u64 {
        self.inner.lock().send_count
    }
}

#[async_trait::async_trait]
impl ChatTransport for InMemoryTransport {
    async fn subscribe(
        &self,
        _channel_ids: &[String],
    ) -> TransportResult<mpsc::Receiver<ChatEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.inner.lock().subscribers.push(tx);
        Ok(rx)
    }

    async fn send(&self, recipient_user_id: &str, body: &MessageBody) -> TransportResult<String> {
        let mut inner = self.inner.lock();
        inner.send_count += 1;
        let seq = inner.send_count;

        if let Some(err) = inner.send_failures.remove(&seq) {
            return Err(err);
        }

        let forwarded_message_id = format!("m{seq}");
        inner.sent.push(SentCall {
            recipient_user_id: recipient_user_id.to_owned(),
            body: body.clone(),
            forwarded_message_id: forwarded_message_id.clone(),
            seq,
            at: Instant::now(),
        });
        Ok(forwarded_message_id)
    }

    async fn delete(
        &self,
        recipient_user_id: &str,
        forwarded_message_id: &str,
    ) -> TransportResult<DeleteOutcome> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.delete_failures.pop_front() {
            return Err(err);
        }

        let known = inner.sent.iter().any(|c| {
            c.recipient_user_id == recipient_user_id
                && c.forwarded_message_id == forwarded_message_id
        });
        let already_deleted = inner.deleted.iter().any(|c| {
            c.recipient_user_id == recipient_user_id
                && c.forwarded_message_id == forwarded_message_id
        });

        inner.deleted.push(DeleteCall {
            recipient_user_id: recipient_user_id.to_owned(),
            forwarded_message_id: forwarded_message_id.to_owned(),
        });

        if known && !already_deleted {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn get_participant(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> TransportResult<ParticipantRole> {
        let inner = self.inner.lock();
        Ok(inner
            .roles
            .get(&(channel_id.to_owned(), user_id.to_owned()))
            .copied()
            .unwrap_or(ParticipantRole::Left))
    }

    async fn get_participants(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> TransportResult<Vec<UserInfo>> {
        let inner = self.inner.lock();
        let mut users = inner
            .participants
            .get(channel_id)
            .cloned()
            .unwrap_or_default();
        users.truncate(limit);
        Ok(users)
    }

    async fn get_dialogs(&self, limit: usize) -> TransportResult<Vec<DialogInfo>> {
        let mut dialogs = self.inner.lock().dialogs.clone();
        dialogs.truncate(limit);
        Ok(dialogs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Registered {
    transport: Arc<InMemoryTransport>,
    user_id: String,
}

/// In-memory [`TransportConnector`]: sessions are registered up front with
/// their transport and user id; unknown phones fail to connect.
#[derive(Default)]
pub struct InMemoryConnector {
    sessions: Mutex<HashMap<String, Registered>>,
    connect_failures: Mutex<HashMap<String, TransportError>>,
}

impl InMemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a session the connector will hand out on `connect`.
    pub fn register(&self, phone: &str, user_id: &str, transport: Arc<InMemoryTransport>) {
        self.sessions.lock().insert(
            phone.to_owned(),
            Registered {
                transport,
                user_id: user_id.to_owned(),
            },
        );
    }

    /// Make the next `connect` for `phone` fail with `err`.
    pub fn fail_connect(&self, phone: &str, err: TransportError) {
        self.connect_failures.lock().insert(phone.to_owned(), err);
    }
}

#[async_trait::async_trait]
impl TransportConnector for InMemoryConnector {
    async fn connect(
        &self,
        phone: &str,
        _credential: &str,
    ) -> TransportResult<(Arc<dyn ChatTransport>, String)> {
        if let Some(err) = self.connect_failures.lock().remove(phone) {
            return Err(err);
        }
        let sessions = self.sessions.lock();
        let registered = sessions
            .get(phone)
            .ok_or(TransportError::Unauthorized)?;
        let transport: Arc<dyn ChatTransport> = registered.transport.clone();
        Ok((transport, registered.user_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_records_order_and_ids() {
        let t = InMemoryTransport::new();
        let id1 = t.send("u1", &MessageBody::text("a")).await.unwrap();
        let id2 = t.send("u2", &MessageBody::text("b")).await.unwrap();
        assert_eq!(id1, "m1");
        assert_eq!(id2, "m2");

        let calls = t.sent_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].seq < calls[1].seq);
    }

    #[tokio::test]
    async fn scripted_send_failure_hits_exact_call() {
        let t = InMemoryTransport::new();
        t.fail_send_at(2, TransportError::FloodWait(30));

        assert!(t.send("u1", &MessageBody::text("a")).await.is_ok());
        let err = t.send("u2", &MessageBody::text("b")).await.unwrap_err();
        assert_eq!(err, TransportError::FloodWait(30));
        // The failure is consumed.
        assert!(t.send("u3", &MessageBody::text("c")).await.is_ok());
    }

    #[tokio::test]
    async fn delete_distinguishes_known_copies() {
        let t = InMemoryTransport::new();
        let id = t.send("u1", &MessageBody::text("a")).await.unwrap();

        assert_eq!(t.delete("u1", &id).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(t.delete("u1", &id).await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(
            t.delete("u1", "missing").await.unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn injected_events_reach_subscribers() {
        let t = InMemoryTransport::new();
        let mut rx = t.subscribe(&[]).await.unwrap();
        t.inject(ChatEvent::ChannelUpdate {
            channel_id: "1".into(),
        })
        .await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind(), "channel_update");
    }

    #[tokio::test]
    async fn connector_hands_out_registered_sessions() {
        let connector = InMemoryConnector::new();
        let t = InMemoryTransport::new();
        connector.register("+100", "u100", t);

        let (_, user_id) = connector.connect("+100", "cred").await.unwrap();
        assert_eq!(user_id, "u100");

        let err = connector.connect("+999", "cred").await.unwrap_err();
        assert_eq!(err, TransportError::Unauthorized);
    }
}
