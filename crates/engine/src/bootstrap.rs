//! Engine construction and startup wiring.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fc_domain::config::Config;
use fc_domain::Result;
use fc_ledger::{Db, Directory, Ledger, SessionRepo};
use fc_transport::TransportConnector;

use crate::dispatcher::Dispatcher;
use crate::governor::RateGovernor;
use crate::membership::MembershipSync;
use crate::metrics::MetricsRegistry;
use crate::queue::SessionQueues;
use crate::registry::SessionRegistry;
use crate::revoker::RevocationWorker;
use crate::router::EventRouter;
use crate::state::EngineState;
use crate::supervisor::Supervisor;

/// Build the engine: open storage, wire every component, seed the router.
/// No background task is spawned and no session is connected yet.
pub fn build(config: Arc<Config>, connector: Arc<dyn TransportConnector>) -> Result<EngineState> {
    let db = Db::open(&config.storage.path)?;
    let ledger = Ledger::new(db.clone());
    let directory = Directory::new(db.clone());
    let sessions = SessionRepo::new(db.clone());
    tracing::info!(path = %config.storage.path, "storage ready");

    let shutdown = CancellationToken::new();
    let governor = Arc::new(RateGovernor::new(&config.rate, shutdown.clone()));
    let queues = Arc::new(SessionQueues::new(&config.queue, shutdown.clone()));
    let metrics = Arc::new(MetricsRegistry::new());
    let registry = Arc::new(SessionRegistry::new(shutdown.clone()));

    let (penalty_tx, penalty_rx) = mpsc::unbounded_channel();

    let dispatcher = Dispatcher::new(
        config.clone(),
        ledger.clone(),
        directory.clone(),
        sessions.clone(),
        queues.clone(),
        governor.clone(),
        registry.clone(),
        metrics.clone(),
        penalty_tx.clone(),
    );
    let revoker = RevocationWorker::new(
        config.clone(),
        ledger.clone(),
        queues.clone(),
        governor.clone(),
        registry.clone(),
        metrics.clone(),
        penalty_tx,
        shutdown.clone(),
    );
    let router = EventRouter::new(registry.clone(), dispatcher.clone(), revoker.clone());
    let membership = MembershipSync::new(
        config.clone(),
        directory.clone(),
        registry.clone(),
        router.clone(),
        shutdown.clone(),
    );
    let supervisor = Supervisor::new(
        config.clone(),
        sessions.clone(),
        registry.clone(),
        connector,
        membership.clone(),
        router.clone(),
        queues.clone(),
        governor.clone(),
        metrics.clone(),
        shutdown.clone(),
        penalty_rx,
    );

    // Seed the admission set from storage so a restart filters correctly
    // before the first sync completes.
    router.rebuild_monitored(&directory.monitored_channels()?);

    let api_token_hash = read_api_token(&config);

    Ok(EngineState {
        config,
        db,
        ledger,
        directory,
        sessions,
        registry,
        queues,
        governor,
        metrics,
        dispatcher,
        revoker,
        router,
        membership,
        supervisor,
        shutdown,
        api_token_hash,
    })
}

/// Spawn the periodic workers: penalty consumer, resume sweep, retention
/// sweep, membership sync. Each stops at the engine shutdown token.
pub fn spawn_background(state: &EngineState) -> Vec<JoinHandle<()>> {
    vec![
        state.supervisor.spawn_penalty_consumer(),
        state.supervisor.spawn_resume_sweep(),
        state.revoker.spawn_cleanup_sweep(),
        state.membership.spawn_periodic(),
    ]
}

/// Build, start background workers, and connect every stored-active
/// session.
pub async fn start(
    config: Arc<Config>,
    connector: Arc<dyn TransportConnector>,
) -> Result<EngineState> {
    let state = build(config, connector)?;
    spawn_background(&state);
    state.supervisor.start_all().await;
    Ok(state)
}

/// Read the admin API bearer token (hashed once, compared in constant
/// time). `None` = dev mode.
fn read_api_token(config: &Config) -> Option<Vec<u8>> {
    use sha2::{Digest, Sha256};

    let env_var = &config.server.api_token_env;
    match std::env::var(env_var) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %env_var, "admin API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %env_var,
                "admin API bearer-token auth DISABLED — set {env_var} to enable"
            );
            None
        }
    }
}
