//! Shared engine state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use fc_domain::config::Config;
use fc_ledger::{Db, Directory, Ledger, SessionRepo};

use crate::dispatcher::Dispatcher;
use crate::governor::RateGovernor;
use crate::membership::MembershipSync;
use crate::metrics::MetricsRegistry;
use crate::queue::SessionQueues;
use crate::registry::SessionRegistry;
use crate::revoker::RevocationWorker;
use crate::router::EventRouter;
use crate::supervisor::Supervisor;

/// Everything the engine's components, the control surface and the admin API
/// handlers share. Cheap to clone; all heavy state sits behind `Arc`s.
///
/// Fields are grouped by concern:
/// - **Storage** — database handle and the three stores
/// - **Runtime** — registry, queues, governor, metrics
/// - **Components** — dispatcher, revoker, router, membership, supervisor
/// - **Control** — shutdown token, admin API token hash
#[derive(Clone)]
pub struct EngineState {
    pub config: Arc<Config>,

    // ── Storage ──────────────────────────────────────────────────────
    pub db: Arc<Db>,
    pub ledger: Ledger,
    pub directory: Directory,
    pub sessions: SessionRepo,

    // ── Runtime ──────────────────────────────────────────────────────
    pub registry: Arc<SessionRegistry>,
    pub queues: Arc<SessionQueues>,
    pub governor: Arc<RateGovernor>,
    pub metrics: Arc<MetricsRegistry>,

    // ── Components ───────────────────────────────────────────────────
    pub dispatcher: Arc<Dispatcher>,
    pub revoker: Arc<RevocationWorker>,
    pub router: Arc<EventRouter>,
    pub membership: Arc<MembershipSync>,
    pub supervisor: Arc<Supervisor>,

    // ── Control ──────────────────────────────────────────────────────
    pub shutdown: CancellationToken,
    /// SHA-256 of the admin API bearer token (read once at startup).
    /// `None` = dev mode, no auth enforced.
    pub api_token_hash: Option<Vec<u8>>,
}

impl EngineState {
    /// Begin engine shutdown: queues reject new work, governor waiters
    /// unblock, sweeps stop at their next tick.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
