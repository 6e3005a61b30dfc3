//! Update events and message payloads observed through a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix the platform uses to mark broadcast-channel identifiers when they
/// appear in update payloads.
const MARKED_CHANNEL_PREFIX: &str = "-100";

/// Body of a message as observed on a channel, carried verbatim to every
/// recipient (HTML parse mode, media reference and reply markup preserved).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    /// HTML-formatted text (possibly empty for pure-media posts).
    pub html: String,
    /// Opaque reference to an attached media object, when present.
    pub media: Option<String>,
    /// Inline reply markup attached to the source message.
    pub reply_markup: Option<serde_json::Value>,
}

impl MessageBody {
    pub fn text(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }
}

/// A new message observed on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Canonical channel id (already normalized).
    pub channel_id: String,
    pub message_id: String,
    /// Album/media-group correlation id when the post is one part of a
    /// grouped message.
    pub grouped_id: Option<String>,
    pub body: MessageBody,
    pub observed_at: DateTime<Utc>,
}

/// Tagged union of everything a session's update stream can yield.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    NewMessage(ChannelMessage),
    MessageEdited {
        channel_id: String,
        message_id: String,
    },
    MessagesDeleted {
        channel_id: String,
        message_ids: Vec<String>,
    },
    ChannelUpdate {
        channel_id: String,
    },
    MemberUpdate {
        channel_id: String,
        user_id: String,
    },
    PollUpdate {
        channel_id: String,
        message_id: String,
    },
}

impl ChatEvent {
    /// The raw channel identifier carried by the event.
    pub fn channel_id(&self) -> &str {
        match self {
            Self::NewMessage(m) => &m.channel_id,
            Self::MessageEdited { channel_id, .. }
            | Self::MessagesDeleted { channel_id, .. }
            | Self::ChannelUpdate { channel_id }
            | Self::MemberUpdate { channel_id, .. }
            | Self::PollUpdate { channel_id, .. } => channel_id,
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new",
            Self::MessageEdited { .. } => "edit",
            Self::MessagesDeleted { .. } => "delete",
            Self::ChannelUpdate { .. } => "channel_update",
            Self::MemberUpdate { .. } => "member_update",
            Self::PollUpdate { .. } => "poll",
        }
    }
}

/// Map a raw channel identifier from an update payload to canonical form.
///
/// Update payloads identify channels with the marked form `-100<id>`; other
/// dialog kinds use bare or plain-negative ids. Returns `None` when the
/// identifier cannot belong to a broadcast channel (those events are
/// dropped by the router).
pub fn normalize_channel_id(raw: &str) -> Option<String> {
    if let Some(rest) = raw.strip_prefix(MARKED_CHANNEL_PREFIX) {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return Some(rest.to_owned());
        }
        return None;
    }
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return Some(raw.to_owned());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_ids_are_unwrapped() {
        assert_eq!(
            normalize_channel_id("-1001234567890").as_deref(),
            Some("1234567890")
        );
    }

    #[test]
    fn canonical_ids_pass_through() {
        assert_eq!(normalize_channel_id("1234567890").as_deref(), Some("1234567890"));
    }

    #[test]
    fn non_channel_ids_are_rejected() {
        // Plain negative: a basic group, not a broadcast channel.
        assert_eq!(normalize_channel_id("-4567"), None);
        assert_eq!(normalize_channel_id(""), None);
        assert_eq!(normalize_channel_id("-100"), None);
        assert_eq!(normalize_channel_id("@somechannel"), None);
    }

    #[test]
    fn event_exposes_channel_and_kind() {
        let ev = ChatEvent::MessagesDeleted {
            channel_id: "42".into(),
            message_ids: vec!["7".into()],
        };
        assert_eq!(ev.channel_id(), "42");
        assert_eq!(ev.kind(), "delete");
    }
}
