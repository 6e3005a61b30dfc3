//! Transport abstraction for the chat platform.
//!
//! The engine never talks to the platform directly; it consumes the
//! [`ChatTransport`] capability (one instance per session) obtained through a
//! [`TransportConnector`]. A production build plugs in the real platform
//! client; tests and local runs use the [`memory`] transport.

pub mod error;
pub mod event;
pub mod memory;
pub mod traits;

pub use error::{ErrorClass, TransportError, TransportResult};
pub use event::{normalize_channel_id, ChannelMessage, ChatEvent, MessageBody};
pub use traits::{
    ChatTransport, DeleteOutcome, DialogInfo, ParticipantRole, TransportConnector, UserInfo,
};
