//! Event router: the single demultiplexing point for session update
//! streams.
//!
//! Every event is normalized, admitted against the monitored-channel set
//! (forwarding enabled, owned by the observing session), and checked for
//! administrative rights through a TTL cache before being classified:
//! new messages go to the dispatcher, deletions to the revocation worker,
//! everything else is logged and dropped. Edits are deliberately not
//! propagated.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use fc_domain::types::ChannelRecord;
use fc_transport::{normalize_channel_id, ChatEvent, ChatTransport};

use crate::dispatcher::Dispatcher;
use crate::registry::SessionRegistry;
use crate::revoker::RevocationWorker;

/// How long a verified admin-rights answer stays valid.
const ADMIN_CACHE_TTL: Duration = Duration::from_secs(300);

struct AdminCacheEntry {
    is_admin: bool,
    checked_at: Instant,
}

pub struct EventRouter {
    /// Canonical channel id → owning session phone.
    monitored: RwLock<HashMap<String, String>>,
    admin_cache: Mutex<HashMap<(String, String), AdminCacheEntry>>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    revoker: Arc<RevocationWorker>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<Dispatcher>,
        revoker: Arc<RevocationWorker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            monitored: RwLock::new(HashMap::new()),
            admin_cache: Mutex::new(HashMap::new()),
            registry,
            dispatcher,
            revoker,
        })
    }

    /// Replace the admission set. Called after every membership sync and
    /// after forwarding toggles.
    pub fn rebuild_monitored(&self, channels: &[ChannelRecord]) {
        let mut monitored = HashMap::new();
        for channel in channels {
            if let Some(owner) = &channel.owning_session {
                monitored.insert(channel.channel_id.clone(), owner.clone());
            }
        }
        let count = monitored.len();
        *self.monitored.write() = monitored;
        tracing::debug!(channels = count, "monitored-channel set rebuilt");
    }

    /// Channels owned by one session (its subscription list).
    pub fn monitored_for(&self, session_phone: &str) -> Vec<String> {
        self.monitored
            .read()
            .iter()
            .filter(|(_, owner)| owner.as_str() == session_phone)
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Route one raw event observed through `session_phone`.
    pub async fn route(&self, session_phone: &str, event: ChatEvent) {
        let Some(channel_id) = normalize_channel_id(event.channel_id()) else {
            tracing::trace!(kind = event.kind(), "event without a channel, dropped");
            return;
        };

        // Admission: the channel must be monitored and owned by the
        // observing session.
        match self.monitored.read().get(&channel_id) {
            Some(owner) if owner.as_str() == session_phone => {}
            Some(_) | None => {
                tracing::trace!(
                    channel = %channel_id,
                    kind = event.kind(),
                    "event outside the monitored set, dropped"
                );
                return;
            }
        }

        let kind = event.kind();
        match event {
            ChatEvent::NewMessage(mut message) => {
                if !self.verify_admin(session_phone, &channel_id).await {
                    tracing::debug!(
                        session = %session_phone,
                        channel = %channel_id,
                        "origin session lacks admin rights, dropped"
                    );
                    return;
                }
                message.channel_id = channel_id;
                match self.dispatcher.dispatch(&message, session_phone).await {
                    Ok(report) => {
                        tracing::debug!(
                            channel = %message.channel_id,
                            message = %message.message_id,
                            successful = report.successful,
                            "message dispatched"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            channel = %message.channel_id,
                            message = %message.message_id,
                            error = %e,
                            "dispatch failed"
                        );
                    }
                }
            }
            ChatEvent::MessagesDeleted { message_ids, .. } => {
                self.revoker
                    .on_channel_delete(&channel_id, &message_ids)
                    .await;
            }
            ChatEvent::MessageEdited { message_id, .. } => {
                // Edits are observed but never propagated to copies.
                tracing::debug!(channel = %channel_id, message = %message_id, "edit observed");
            }
            ChatEvent::ChannelUpdate { .. }
            | ChatEvent::MemberUpdate { .. }
            | ChatEvent::PollUpdate { .. } => {
                tracing::debug!(channel = %channel_id, kind, "update logged");
            }
        }
    }

    /// Cache-backed admin verification. Unknown or failed lookups count as
    /// non-admin: nothing is forwarded on uncertainty.
    async fn verify_admin(&self, session_phone: &str, channel_id: &str) -> bool {
        let key = (session_phone.to_owned(), channel_id.to_owned());
        if let Some(entry) = self.admin_cache.lock().get(&key) {
            if entry.checked_at.elapsed() < ADMIN_CACHE_TTL {
                return entry.is_admin;
            }
        }

        let Some(transport) = self.registry.transport(session_phone) else {
            return false;
        };
        let Some(user_id) = self.registry.user_id(session_phone) else {
            return false;
        };

        let is_admin = match transport.get_participant(channel_id, &user_id).await {
            Ok(role) => role.is_admin(),
            Err(e) => {
                tracing::warn!(
                    session = %session_phone,
                    channel = %channel_id,
                    error = %e,
                    "admin verification failed, treating as non-admin"
                );
                false
            }
        };

        self.admin_cache.lock().insert(
            key,
            AdminCacheEntry {
                is_admin,
                checked_at: Instant::now(),
            },
        );
        is_admin
    }
}
