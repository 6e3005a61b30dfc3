//! Membership synchronizer.
//!
//! Re-enumerates each session's channels and their member lists into the
//! directory: channels where the session holds admin rights get (or keep)
//! that session as owner, members are upserted with bots filtered out, and
//! the member list is replaced atomically. After every sync the router's
//! monitored-channel set is rebuilt.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fc_domain::config::Config;
use fc_domain::types::UserRecord;
use fc_domain::Result;
use fc_ledger::Directory;
use fc_transport::{ChatTransport, UserInfo};

use crate::registry::SessionRegistry;
use crate::router::EventRouter;

/// Dialog enumeration cap per sync pass.
const DIALOG_LIMIT: usize = 200;

/// Outcome of one session's sync, for logs and tests.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncReport {
    pub owned_channels: usize,
    pub members_synced: usize,
}

pub struct MembershipSync {
    config: Arc<Config>,
    directory: Directory,
    registry: Arc<SessionRegistry>,
    router: Arc<EventRouter>,
    shutdown: CancellationToken,
}

impl MembershipSync {
    pub fn new(
        config: Arc<Config>,
        directory: Directory,
        registry: Arc<SessionRegistry>,
        router: Arc<EventRouter>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            directory,
            registry,
            router,
            shutdown,
        })
    }

    /// Own the membership timer: re-sync every connected session on the
    /// configured interval.
    pub fn spawn_periodic(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let period = std::time::Duration::from_secs(
            this.config.membership.sync_interval_minutes.max(1) * 60,
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Sessions run their own initial sync at start; skip the
            // immediate tick.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = interval.tick() => this.sync_all().await,
                }
            }
        })
    }

    /// Sync every connected session.
    pub async fn sync_all(&self) {
        let sweep_id = Uuid::new_v4();
        for phone in self.registry.connected_phones() {
            let (Some(transport), Some(user_id)) = (
                self.registry.transport(&phone),
                self.registry.user_id(&phone),
            ) else {
                continue;
            };
            match self.sync_session(&phone, transport, &user_id).await {
                Ok(report) => {
                    tracing::debug!(
                        sweep = %sweep_id,
                        session = %phone,
                        owned = report.owned_channels,
                        members = report.members_synced,
                        "membership sync"
                    );
                }
                Err(e) => {
                    tracing::warn!(sweep = %sweep_id, session = %phone, error = %e, "membership sync failed");
                }
            }
        }
    }

    /// Sync one session: discover owned channels, rewrite member lists,
    /// rebuild the router's admission set.
    pub async fn sync_session(
        &self,
        phone: &str,
        transport: Arc<dyn ChatTransport>,
        self_user_id: &str,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let dialogs = transport.get_dialogs(DIALOG_LIMIT).await?;
        for dialog in dialogs.iter().filter(|d| d.is_broadcast) {
            let role = match transport
                .get_participant(&dialog.channel_id, self_user_id)
                .await
            {
                Ok(role) => role,
                Err(e) => {
                    tracing::warn!(
                        session = %phone,
                        channel = %dialog.channel_id,
                        error = %e,
                        "role lookup failed, channel skipped"
                    );
                    continue;
                }
            };
            if !role.is_admin() {
                continue;
            }

            self.directory.upsert_channel(
                &dialog.channel_id,
                &dialog.title,
                dialog.username.as_deref(),
                dialog.member_count,
                phone,
            )?;
            report.owned_channels += 1;
        }

        // Member lists only matter for channels that can fan out.
        for channel in self.directory.monitored_channels()? {
            if channel.owning_session.as_deref() != Some(phone) {
                continue;
            }
            let participants = transport
                .get_participants(&channel.channel_id, self.config.membership.max_participants)
                .await?;

            let mut member_ids = Vec::with_capacity(participants.len());
            for participant in participants {
                if participant.is_bot {
                    continue;
                }
                self.directory.upsert_user(&to_user_record(&participant))?;
                member_ids.push(participant.user_id);
            }
            self.directory
                .replace_members(&channel.channel_id, &member_ids)?;
            report.members_synced += member_ids.len();
        }

        self.router
            .rebuild_monitored(&self.directory.monitored_channels()?);
        Ok(report)
    }
}

fn to_user_record(info: &UserInfo) -> UserRecord {
    UserRecord {
        user_id: info.user_id.clone(),
        first_name: info.first_name.clone(),
        last_name: info.last_name.clone(),
        username: info.username.clone(),
        phone: info.phone.clone(),
        is_bot: info.is_bot,
    }
}
