//! Core transport traits.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::TransportResult;
use crate::event::{ChatEvent, MessageBody};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supporting types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The copy was already gone; callers treat this as success.
    NotFound,
}

/// Role of a user within a channel, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    Creator,
    Admin,
    Member,
    Left,
    Banned,
}

impl ParticipantRole {
    /// Whether this role carries administrative rights.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Creator | Self::Admin)
    }
}

/// A participant record from channel enumeration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInfo {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub is_bot: bool,
}

/// A dialog visible to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogInfo {
    pub channel_id: String,
    pub title: String,
    pub username: Option<String>,
    pub member_count: u32,
    /// `true` for broadcast channels; other dialog kinds are ignored by the
    /// membership synchronizer.
    pub is_broadcast: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The per-session capability the engine consumes.
///
/// Implementations are platform adapters. One boxed instance exists per
/// connected session; every call may block on network I/O and is issued
/// through that session's serial queue.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Subscribe to update events for the given channels. The receiver end
    /// is owned by the session's event pump; dropping it ends the stream.
    async fn subscribe(&self, channel_ids: &[String]) -> TransportResult<mpsc::Receiver<ChatEvent>>;

    /// Deliver a private copy to a recipient's one-to-one chat. Returns the
    /// identifier of the placed copy.
    async fn send(&self, recipient_user_id: &str, body: &MessageBody) -> TransportResult<String>;

    /// Remove a previously delivered copy from a recipient's chat.
    async fn delete(
        &self,
        recipient_user_id: &str,
        forwarded_message_id: &str,
    ) -> TransportResult<DeleteOutcome>;

    /// Role of `user_id` within `channel_id` (admin-rights verification).
    async fn get_participant(
        &self,
        channel_id: &str,
        user_id: &str,
    ) -> TransportResult<ParticipantRole>;

    /// Enumerate up to `limit` members of a channel.
    async fn get_participants(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> TransportResult<Vec<UserInfo>>;

    /// Enumerate up to `limit` dialogs visible to the session.
    async fn get_dialogs(&self, limit: usize) -> TransportResult<Vec<DialogInfo>>;
}

impl std::fmt::Debug for dyn ChatTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<dyn ChatTransport>")
    }
}

/// Factory for per-session transports.
///
/// `connect` restores a session from its opaque credential and returns the
/// live transport plus the platform user id of the impersonated account.
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        phone: &str,
        credential: &str,
    ) -> TransportResult<(Arc<dyn ChatTransport>, String)>;
}
