//! Forwarding dispatcher: turns one observed channel message into one
//! rate-governed private copy per eligible recipient.
//!
//! Recipients are the channel's members minus bots and active operators.
//! Every copy gets a pending ledger row before its send task is enqueued;
//! the task itself classifies transport errors and leaves the terminal
//! status behind. Flood and spam signals are emitted as [`PenaltyEvent`]s
//! for the supervisor — the dispatcher never touches session state itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use fc_domain::config::Config;
use fc_domain::types::{ChannelThrottle, FanoutReport, SessionStatus};
use fc_domain::{Error, Result};
use fc_ledger::{Directory, Ledger, SessionRepo};
use fc_transport::{ChannelMessage, ChatTransport, ErrorClass, MessageBody};

use crate::governor::{ChannelPacing, RateGovernor};
use crate::metrics::MetricsRegistry;
use crate::queue::SessionQueues;
use crate::registry::SessionRegistry;
use crate::retry::RetryPolicy;
use crate::supervisor::{PenaltyEvent, PenaltyKind};

/// Terminal outcome of one per-recipient send task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Sent,
    Failed,
    Skipped,
}

/// Everything one send task needs, owned so it can cross task boundaries.
struct SendContext {
    session_phone: String,
    channel_id: String,
    message_id: String,
    recipient: String,
    body: MessageBody,
    member_count: u32,
    throttle: Option<ChannelThrottle>,
}

pub struct Dispatcher {
    config: Arc<Config>,
    ledger: Ledger,
    directory: Directory,
    sessions: SessionRepo,
    queues: Arc<SessionQueues>,
    governor: Arc<RateGovernor>,
    registry: Arc<SessionRegistry>,
    metrics: Arc<MetricsRegistry>,
    retry: RetryPolicy,
    penalties: mpsc::UnboundedSender<PenaltyEvent>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        ledger: Ledger,
        directory: Directory,
        sessions: SessionRepo,
        queues: Arc<SessionQueues>,
        governor: Arc<RateGovernor>,
        registry: Arc<SessionRegistry>,
        metrics: Arc<MetricsRegistry>,
        penalties: mpsc::UnboundedSender<PenaltyEvent>,
    ) -> Arc<Self> {
        let retry = RetryPolicy::from(&config.retry);
        Arc::new(Self {
            config,
            ledger,
            directory,
            sessions,
            queues,
            governor,
            registry,
            metrics,
            retry,
            penalties,
        })
    }

    /// Fan a new channel message out to every eligible recipient.
    ///
    /// Per-recipient failures never escape; the returned report aggregates
    /// the terminal outcome of every copy.
    pub async fn dispatch(
        self: &Arc<Self>,
        message: &ChannelMessage,
        session_phone: &str,
    ) -> Result<FanoutReport> {
        let channel = match self.directory.get_channel(&message.channel_id)? {
            Some(ch) => ch,
            None => {
                // Admission raced a sync that dropped the channel.
                self.ledger.insert_skipped_marker(
                    &message.channel_id,
                    &message.message_id,
                    session_phone,
                    "channel not registered",
                )?;
                return Ok(FanoutReport {
                    skipped: 1,
                    ..Default::default()
                });
            }
        };

        if !channel.forward_enabled {
            self.ledger.insert_skipped_marker(
                &channel.channel_id,
                &message.message_id,
                session_phone,
                "forwarding disabled",
            )?;
            return Ok(FanoutReport {
                skipped: 1,
                ..Default::default()
            });
        }

        let mut recipients = self.directory.channel_recipients(&channel.channel_id)?;
        // Never forward to the impersonated account itself.
        if let Some(self_id) = self.registry.user_id(session_phone) {
            recipients.retain(|r| r != &self_id);
        }
        if recipients.is_empty() {
            return Ok(FanoutReport::default());
        }

        let mut report = FanoutReport {
            total: recipients.len(),
            ..Default::default()
        };
        let chunk_size = self.config.dispatch.chunk_size.max(1);
        let inter_chunk = Duration::from_millis(self.config.dispatch.inter_chunk_delay_ms);

        for (chunk_index, chunk) in recipients.chunks(chunk_size).enumerate() {
            if chunk_index > 0 && !inter_chunk.is_zero() {
                tokio::time::sleep(inter_chunk).await;
            }

            let mut tasks = Vec::with_capacity(chunk.len());
            for recipient in chunk {
                self.ledger.insert_pending(
                    &channel.channel_id,
                    &message.message_id,
                    recipient,
                    session_phone,
                    message.grouped_id.as_deref(),
                )?;

                let ctx = SendContext {
                    session_phone: session_phone.to_owned(),
                    channel_id: channel.channel_id.clone(),
                    message_id: message.message_id.clone(),
                    recipient: recipient.clone(),
                    body: message.body.clone(),
                    member_count: channel.member_count,
                    throttle: channel.throttle,
                };
                let this = self.clone();
                tasks.push(tokio::spawn(async move { this.send_one(ctx).await }));
                // Keep enqueue order deterministic within the chunk.
                tokio::task::yield_now().await;
            }

            for task in tasks {
                match task.await {
                    Ok(SendOutcome::Sent) => report.successful += 1,
                    Ok(SendOutcome::Failed) => report.failed += 1,
                    Ok(SendOutcome::Skipped) => report.skipped += 1,
                    Err(join_err) => {
                        tracing::error!(error = %join_err, "send task panicked");
                        report.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            channel = %channel.channel_id,
            message = %message.message_id,
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            "fan-out complete"
        );
        Ok(report)
    }

    /// Enqueue one recipient's send on the session queue and await its
    /// terminal outcome.
    async fn send_one(self: Arc<Self>, ctx: SendContext) -> SendOutcome {
        let phone = ctx.session_phone.clone();
        let this = self.clone();
        match self
            .queues
            .enqueue(&phone, move || async move { this.attempt_send(ctx).await })
            .await
        {
            Ok(outcome) => outcome,
            Err(Error::Shutdown) => SendOutcome::Skipped,
            Err(e) => {
                tracing::error!(session = %phone, error = %e, "send task failed internally");
                SendOutcome::Failed
            }
        }
    }

    /// The actual send, executed on the session's serial queue.
    async fn attempt_send(self: Arc<Self>, ctx: SendContext) -> Result<SendOutcome> {
        // A quarantine may have landed between dispatch and execution.
        match self.sessions.get(&ctx.session_phone)? {
            Some(row) if row.status == SessionStatus::Active => {}
            _ => {
                self.ledger.mark_failed(
                    &ctx.channel_id,
                    &ctx.message_id,
                    &ctx.recipient,
                    "session paused",
                )?;
                self.metrics
                    .record_failed(&ctx.session_phone, &ctx.channel_id);
                return Ok(SendOutcome::Failed);
            }
        }

        let Some(transport) = self.registry.transport(&ctx.session_phone) else {
            self.ledger.mark_skipped(
                &ctx.channel_id,
                &ctx.message_id,
                &ctx.recipient,
                "no connected session",
            )?;
            return Ok(SendOutcome::Skipped);
        };

        let pacing = ChannelPacing {
            channel_id: &ctx.channel_id,
            member_count: ctx.member_count,
            throttle: ctx.throttle,
        };

        let mut attempt: u32 = 1;
        loop {
            self.governor
                .acquire(&ctx.session_phone, Some(pacing), Some(&ctx.recipient))
                .await?;

            let err = match transport.send(&ctx.recipient, &ctx.body).await {
                Ok(forwarded_id) => {
                    self.ledger.mark_sent(
                        &ctx.channel_id,
                        &ctx.message_id,
                        &ctx.recipient,
                        &forwarded_id,
                    )?;
                    self.metrics
                        .record_sent(&ctx.session_phone, &ctx.channel_id);
                    self.sessions.touch_active(&ctx.session_phone)?;
                    return Ok(SendOutcome::Sent);
                }
                Err(err) => err,
            };

            match err.classify() {
                ErrorClass::RateLimit { seconds } => {
                    self.fail(&ctx, &err.recorded_message())?;
                    self.emit(&ctx.session_phone, PenaltyKind::FloodWait { seconds });
                    return Ok(SendOutcome::Failed);
                }
                ErrorClass::SpamWarning => {
                    self.fail(&ctx, &err.recorded_message())?;
                    self.emit(&ctx.session_phone, PenaltyKind::SpamWarning);
                    return Ok(SendOutcome::Failed);
                }
                ErrorClass::AuthLost => {
                    self.fail(&ctx, &err.recorded_message())?;
                    self.emit(
                        &ctx.session_phone,
                        PenaltyKind::AuthLost {
                            message: err.recorded_message(),
                        },
                    );
                    return Ok(SendOutcome::Failed);
                }
                ErrorClass::Permanent => {
                    self.fail(&ctx, &err.recorded_message())?;
                    return Ok(SendOutcome::Failed);
                }
                ErrorClass::Transient => {
                    if self.retry.exhausted(attempt) {
                        self.fail(&ctx, &err.recorded_message())?;
                        return Ok(SendOutcome::Failed);
                    }
                }
                ErrorClass::Unknown => {
                    // One blind retry, then terminal.
                    if attempt >= 2 || self.retry.exhausted(attempt) {
                        self.fail(&ctx, &err.recorded_message())?;
                        return Ok(SendOutcome::Failed);
                    }
                }
            }

            self.ledger
                .increment_retry(&ctx.channel_id, &ctx.message_id, &ctx.recipient)?;
            tracing::debug!(
                session = %ctx.session_phone,
                recipient = %ctx.recipient,
                attempt,
                error = %err,
                "send failed, retrying"
            );
            tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    fn fail(&self, ctx: &SendContext, message: &str) -> Result<()> {
        self.ledger
            .mark_failed(&ctx.channel_id, &ctx.message_id, &ctx.recipient, message)?;
        self.metrics
            .record_failed(&ctx.session_phone, &ctx.channel_id);
        Ok(())
    }

    fn emit(&self, session_phone: &str, kind: PenaltyKind) {
        // The consumer only disappears during shutdown.
        let _ = self.penalties.send(PenaltyEvent {
            session_phone: session_phone.to_owned(),
            kind,
        });
    }
}
