//! Revocation worker: removes forwarded copies from recipients.
//!
//! Two entry points share one delete path. The scheduled sweep revokes
//! copies older than the retention window; the event-driven path revokes
//! the copies of messages deleted on their source channel. A copy the
//! platform no longer knows about still counts as revoked. Failures leave
//! the row `sent` for the next sweep.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fc_domain::config::Config;
use fc_domain::types::{ForwardRecord, ForwardStatus};
use fc_domain::{Error, Result};
use fc_ledger::Ledger;
use fc_transport::{ChatTransport, ErrorClass};

use crate::governor::RateGovernor;
use crate::metrics::MetricsRegistry;
use crate::queue::SessionQueues;
use crate::registry::SessionRegistry;
use crate::supervisor::{PenaltyEvent, PenaltyKind};

/// Outcome of one sweep, for logs and tests.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub revoked: usize,
    pub failed: usize,
}

pub struct RevocationWorker {
    config: Arc<Config>,
    ledger: Ledger,
    queues: Arc<SessionQueues>,
    governor: Arc<RateGovernor>,
    registry: Arc<SessionRegistry>,
    metrics: Arc<MetricsRegistry>,
    penalties: mpsc::UnboundedSender<PenaltyEvent>,
    shutdown: CancellationToken,
}

impl RevocationWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        ledger: Ledger,
        queues: Arc<SessionQueues>,
        governor: Arc<RateGovernor>,
        registry: Arc<SessionRegistry>,
        metrics: Arc<MetricsRegistry>,
        penalties: mpsc::UnboundedSender<PenaltyEvent>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            ledger,
            queues,
            governor,
            registry,
            metrics,
            penalties,
            shutdown,
        })
    }

    // ── Scheduled sweep ──────────────────────────────────────────────

    /// Own the cleanup timer: run a retention sweep every configured
    /// interval until shutdown.
    pub fn spawn_cleanup_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let period =
            std::time::Duration::from_secs(this.config.cleanup.interval_hours.max(1) * 3600);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh boot does
            // not race the session start-up.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        this.run_sweep().await;
                    }
                }
            }
        })
    }

    /// One retention pass over all `sent` rows older than the window.
    pub async fn run_sweep(&self) -> SweepReport {
        let sweep_id = Uuid::new_v4();
        let cutoff =
            Utc::now() - chrono::Duration::hours(self.config.retention.message_age_hours as i64);

        let rows = match self.ledger.find_old_sent(cutoff) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(sweep = %sweep_id, error = %e, "retention scan failed");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            examined: rows.len(),
            ..Default::default()
        };
        // Rows arrive grouped by recipient; the per-session queue serializes
        // the actual deletes.
        for row in rows {
            match self.revoke_copy(&row).await {
                Ok(true) => report.revoked += 1,
                Ok(false) => report.failed += 1,
                Err(Error::Shutdown) => break,
                Err(e) => {
                    tracing::warn!(sweep = %sweep_id, error = %e, "revocation errored");
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                sweep = %sweep_id,
                examined = report.examined,
                revoked = report.revoked,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        report
    }

    // ── Event-driven revocation ──────────────────────────────────────

    /// Revoke every copy of the given source messages (channel delete
    /// event).
    pub async fn on_channel_delete(&self, channel_id: &str, message_ids: &[String]) {
        for message_id in message_ids {
            let copies = match self.ledger.find_copies(channel_id, message_id) {
                Ok(copies) => copies,
                Err(e) => {
                    tracing::error!(
                        channel = %channel_id,
                        message = %message_id,
                        error = %e,
                        "copy lookup failed"
                    );
                    continue;
                }
            };
            for copy in copies {
                if copy.status != ForwardStatus::Sent {
                    continue;
                }
                if let Err(e) = self.revoke_copy(&copy).await {
                    if matches!(e, Error::Shutdown) {
                        return;
                    }
                    tracing::warn!(
                        channel = %channel_id,
                        message = %message_id,
                        recipient = %copy.recipient_user_id,
                        error = %e,
                        "event-driven revocation errored"
                    );
                }
            }
        }
    }

    // ── Shared delete path ───────────────────────────────────────────

    /// Delete one copy through its owning session's queue. `Ok(true)` when
    /// the ledger row reached `deleted`; `Ok(false)` leaves it `sent` for a
    /// later sweep.
    async fn revoke_copy(&self, row: &ForwardRecord) -> Result<bool> {
        let Some(forwarded_id) = row.forwarded_message_id.clone() else {
            // A sent row always carries its copy id; tolerate the
            // impossible rather than crash the sweep.
            return Ok(false);
        };

        let phone = row.session_phone.clone();
        if self.registry.transport(&phone).is_none() {
            tracing::debug!(
                session = %phone,
                recipient = %row.recipient_user_id,
                "owning session not connected, copy stays until next sweep"
            );
            return Ok(false);
        }

        let ledger = self.ledger.clone();
        let governor = self.governor.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let penalties = self.penalties.clone();
        let recipient = row.recipient_user_id.clone();
        let channel_id = row.source_channel_id.clone();
        let task_phone = phone.clone();

        self.queues
            .enqueue(&phone, move || async move {
                // Deletes skip the channel-gap scope; they are not sends
                // originated from the channel.
                governor
                    .acquire(&task_phone, None, Some(&recipient))
                    .await?;

                let Some(transport) = registry.transport(&task_phone) else {
                    return Ok(false);
                };

                match transport.delete(&recipient, &forwarded_id).await {
                    // NotFound means the copy is already gone; both
                    // outcomes end in the same ledger state.
                    Ok(_) => {
                        let marked = ledger.mark_deleted(&recipient, &forwarded_id)?;
                        Ok(marked)
                    }
                    Err(err) => {
                        match err.classify() {
                            ErrorClass::RateLimit { seconds } => {
                                let _ = penalties.send(PenaltyEvent {
                                    session_phone: task_phone.clone(),
                                    kind: PenaltyKind::FloodWait { seconds },
                                });
                            }
                            ErrorClass::SpamWarning => {
                                let _ = penalties.send(PenaltyEvent {
                                    session_phone: task_phone.clone(),
                                    kind: PenaltyKind::SpamWarning,
                                });
                            }
                            ErrorClass::AuthLost => {
                                let _ = penalties.send(PenaltyEvent {
                                    session_phone: task_phone.clone(),
                                    kind: PenaltyKind::AuthLost {
                                        message: err.recorded_message(),
                                    },
                                });
                            }
                            _ => {}
                        }
                        metrics.record_failed(&task_phone, &channel_id);
                        tracing::warn!(
                            session = %task_phone,
                            recipient = %recipient,
                            error = %err,
                            "delete failed, row stays sent"
                        );
                        Ok(false)
                    }
                }
            })
            .await
    }
}
