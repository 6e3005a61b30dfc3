//! Session supervisor: owns every session's lifecycle.
//!
//! Connects sessions, runs the initial membership sync before installing the
//! event pump, consumes [`PenaltyEvent`]s emitted by the dispatcher and the
//! revocation worker (quarantine on flood/spam, error on auth loss), and
//! runs the resume sweep that re-activates quarantined sessions once their
//! penalty expires. A session's failure never affects its siblings.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fc_domain::config::Config;
use fc_domain::types::SessionStatus;
use fc_domain::{Error, Result};
use fc_ledger::SessionRepo;
use fc_transport::{ChatTransport, ErrorClass, TransportConnector};

use crate::governor::RateGovernor;
use crate::membership::MembershipSync;
use crate::metrics::MetricsRegistry;
use crate::queue::SessionQueues;
use crate::registry::SessionRegistry;
use crate::router::EventRouter;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Penalty events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a session must be penalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PenaltyKind {
    /// Platform-imposed wait; quarantine until `now + seconds`.
    FloodWait { seconds: u64 },
    /// Spam flag; quarantine with the configured backoff.
    SpamWarning,
    /// Authorization is gone; the session moves to `error` and stays there
    /// until an operator intervenes.
    AuthLost { message: String },
}

/// Emitted by send/delete tasks, consumed by the supervisor. Breaking the
/// coupling this way keeps the dispatcher free of any back-reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PenaltyEvent {
    pub session_phone: String,
    pub kind: PenaltyKind,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Supervisor {
    config: Arc<Config>,
    sessions: SessionRepo,
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn TransportConnector>,
    membership: Arc<MembershipSync>,
    router: Arc<EventRouter>,
    queues: Arc<SessionQueues>,
    governor: Arc<RateGovernor>,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
    penalty_rx: Mutex<Option<mpsc::UnboundedReceiver<PenaltyEvent>>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        sessions: SessionRepo,
        registry: Arc<SessionRegistry>,
        connector: Arc<dyn TransportConnector>,
        membership: Arc<MembershipSync>,
        router: Arc<EventRouter>,
        queues: Arc<SessionQueues>,
        governor: Arc<RateGovernor>,
        metrics: Arc<MetricsRegistry>,
        shutdown: CancellationToken,
        penalty_rx: mpsc::UnboundedReceiver<PenaltyEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions,
            registry,
            connector,
            membership,
            router,
            queues,
            governor,
            metrics,
            shutdown,
            penalty_rx: Mutex::new(Some(penalty_rx)),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect a session and bring it to `active`.
    ///
    /// Order matters: the initial membership sync runs before the event pump
    /// is installed, so the first observed event can never beat the
    /// monitored-channel set.
    pub async fn start_session(&self, phone: &str) -> Result<()> {
        let record = self
            .sessions
            .get(phone)?
            .ok_or_else(|| Error::session(phone, "unknown session"))?;

        let (transport, user_id) = match self
            .connector
            .connect(phone, record.credential.reveal())
            .await
        {
            Ok(connected) => connected,
            Err(err) => {
                if err.classify() == ErrorClass::AuthLost {
                    // Never retried automatically; the operator must
                    // re-provision the credential.
                    self.sessions.set_error(phone, &err.recorded_message())?;
                }
                return Err(Error::session(phone, format!("connect failed: {err}")));
            }
        };

        self.sessions.set_connected(phone, &user_id)?;
        let handle = self.registry.ensure(phone);
        handle.set_connected(transport.clone(), user_id.clone());

        self.membership
            .sync_session(phone, transport.clone(), &user_id)
            .await?;

        let monitored = self.router.monitored_for(phone);
        let mut events = transport.subscribe(&monitored).await?;

        let router = self.router.clone();
        let pump_phone = phone.to_owned();
        let cancel = handle.cancel.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => router.route(&pump_phone, event).await,
                        None => {
                            tracing::info!(session = %pump_phone, "event stream ended");
                            break;
                        }
                    }
                }
            }
        });
        handle.set_pump(pump);

        tracing::info!(session = %phone, user_id = %user_id, "session active");
        Ok(())
    }

    /// Start every session stored as `active` (boot recovery).
    pub async fn start_all(&self) {
        let records = match self.sessions.list() {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "listing sessions at startup failed");
                return;
            }
        };
        for record in records {
            if record.status != SessionStatus::Active {
                continue;
            }
            if let Err(e) = self.start_session(&record.phone).await {
                tracing::warn!(session = %record.phone, error = %e, "session did not start");
            }
        }
    }

    /// Tear down a session's runtime state without touching its row.
    fn stop_runtime(&self, phone: &str) {
        self.registry.remove(phone);
        self.queues.remove(phone);
        self.governor.forget_session(phone);
    }

    /// Operator stop: pause the row and drop the connection.
    pub fn stop_session(&self, phone: &str, reason: &str) -> Result<()> {
        self.sessions.manual_pause(phone, reason)?;
        self.stop_runtime(phone);
        tracing::info!(session = %phone, reason = %reason, "session stopped");
        Ok(())
    }

    /// Remove a session entirely. Returns `false` for unknown phones.
    pub fn remove_session(&self, phone: &str) -> Result<bool> {
        self.stop_runtime(phone);
        let removed = self.sessions.remove(phone)?;
        if removed {
            tracing::info!(session = %phone, "session removed");
        }
        Ok(removed)
    }

    // ── Penalties ────────────────────────────────────────────────────

    /// Consume penalty events until shutdown. Call once.
    pub fn spawn_penalty_consumer(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let rx = self.penalty_rx.lock().take();
        tokio::spawn(async move {
            let Some(mut rx) = rx else {
                tracing::error!("penalty consumer started twice");
                return;
            };
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => this.apply_penalty(event).await,
                        None => break,
                    }
                }
            }
        })
    }

    async fn apply_penalty(&self, event: PenaltyEvent) {
        let phone = &event.session_phone;
        let record = match self.sessions.get(phone) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(session = %phone, error = %e, "penalty lookup failed");
                return;
            }
        };

        let applied = match event.kind {
            PenaltyKind::FloodWait { seconds } => {
                if record.status != SessionStatus::Active {
                    return; // already quarantined or dead
                }
                self.metrics.record_flood(phone);
                let until = Utc::now() + chrono::Duration::seconds(seconds as i64);
                tracing::warn!(
                    session = %phone,
                    seconds,
                    "flood wait — quarantining session"
                );
                self.sessions
                    .set_quarantine(phone, &format!("flood wait {seconds}s"), until)
            }
            PenaltyKind::SpamWarning => {
                if record.status != SessionStatus::Active {
                    return;
                }
                self.metrics.record_spam(phone);
                let backoff =
                    chrono::Duration::minutes(self.config.supervisor.spam_backoff_minutes as i64);
                tracing::warn!(session = %phone, "spam warning — quarantining session");
                self.sessions
                    .set_quarantine(phone, "spam warning", Utc::now() + backoff)
            }
            PenaltyKind::AuthLost { message } => {
                tracing::error!(session = %phone, error = %message, "authorization lost");
                self.stop_runtime(phone);
                self.sessions.set_error(phone, &message)
            }
        };

        if let Err(e) = applied {
            tracing::error!(session = %phone, error = %e, "recording penalty failed");
        }
    }

    // ── Resume sweep ─────────────────────────────────────────────────

    /// Periodically re-activate quarantined sessions whose penalty expired.
    pub fn spawn_resume_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        let period =
            std::time::Duration::from_secs(self.config.supervisor.resume_check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = interval.tick() => this.resume_tick().await,
                }
            }
        })
    }

    /// One pass of the resume check.
    pub async fn resume_tick(&self) {
        let due = match self.sessions.resumable(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "resume sweep query failed");
                return;
            }
        };
        for record in due {
            if let Err(e) = self.resume_session(&record.phone).await {
                tracing::warn!(session = %record.phone, error = %e, "resume failed");
            }
        }
    }

    /// Clear quarantine and make sure the session is connected again.
    pub async fn resume_session(&self, phone: &str) -> Result<()> {
        self.sessions.resume(phone)?;
        if self.registry.transport(phone).is_none() {
            // The quarantine outlived the process (or the connection died);
            // bring the session back up.
            self.start_session(phone).await?;
        }
        tracing::info!(session = %phone, "session resumed");
        Ok(())
    }
}
