//! Runtime registry of connected sessions.
//!
//! The ledger's session rows are the durable truth; the registry holds what
//! only exists while the process runs: the live transport handle, the
//! platform user id, and the event-pump task for each connected session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fc_transport::ChatTransport;

/// Live state for one connected session.
pub struct SessionHandle {
    pub phone: String,
    user_id: RwLock<Option<String>>,
    transport: RwLock<Option<Arc<dyn ChatTransport>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Child of the engine shutdown token; cancelling stops this session's
    /// event pump without touching its siblings.
    pub cancel: CancellationToken,
}

impl SessionHandle {
    fn new(phone: String, cancel: CancellationToken) -> Self {
        Self {
            phone,
            user_id: RwLock::new(None),
            transport: RwLock::new(None),
            pump: Mutex::new(None),
            cancel,
        }
    }

    pub fn set_connected(&self, transport: Arc<dyn ChatTransport>, user_id: String) {
        *self.transport.write() = Some(transport);
        *self.user_id.write() = Some(user_id);
    }

    pub fn transport(&self) -> Option<Arc<dyn ChatTransport>> {
        self.transport.read().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    /// Install the event-pump task, aborting a previous pump if present.
    pub fn set_pump(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.pump.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop the pump and drop the transport. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        *self.transport.write() = None;
    }
}

/// Phone-keyed map of live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Get or create the handle for a session.
    pub fn ensure(&self, phone: &str) -> Arc<SessionHandle> {
        if let Some(handle) = self.sessions.read().get(phone) {
            return handle.clone();
        }
        let mut sessions = self.sessions.write();
        sessions
            .entry(phone.to_owned())
            .or_insert_with(|| {
                Arc::new(SessionHandle::new(
                    phone.to_owned(),
                    self.shutdown.child_token(),
                ))
            })
            .clone()
    }

    pub fn get(&self, phone: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(phone).cloned()
    }

    pub fn transport(&self, phone: &str) -> Option<Arc<dyn ChatTransport>> {
        self.sessions.read().get(phone).and_then(|h| h.transport())
    }

    pub fn user_id(&self, phone: &str) -> Option<String> {
        self.sessions.read().get(phone).and_then(|h| h.user_id())
    }

    /// Remove and shut down a session's runtime state.
    pub fn remove(&self, phone: &str) -> Option<Arc<SessionHandle>> {
        let handle = self.sessions.write().remove(phone);
        if let Some(h) = &handle {
            h.shutdown();
        }
        handle
    }

    /// Phones with a live transport.
    pub fn connected_phones(&self) -> Vec<String> {
        self.sessions
            .read()
            .iter()
            .filter(|(_, h)| h.transport.read().is_some())
            .map(|(phone, _)| phone.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_transport::memory::InMemoryTransport;

    #[test]
    fn ensure_is_idempotent() {
        let r = SessionRegistry::new(CancellationToken::new());
        let a = r.ensure("+100");
        let b = r.ensure("+100");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn connected_phones_requires_transport() {
        let r = SessionRegistry::new(CancellationToken::new());
        r.ensure("+100");
        assert!(r.connected_phones().is_empty());

        let t = InMemoryTransport::new();
        r.ensure("+100").set_connected(t, "u100".into());
        assert_eq!(r.connected_phones(), vec!["+100".to_string()]);
        assert_eq!(r.user_id("+100").as_deref(), Some("u100"));
    }

    #[test]
    fn remove_shuts_the_handle_down() {
        let r = SessionRegistry::new(CancellationToken::new());
        let t = InMemoryTransport::new();
        r.ensure("+100").set_connected(t, "u100".into());

        let handle = r.remove("+100").unwrap();
        assert!(handle.cancel.is_cancelled());
        assert!(handle.transport().is_none());
        assert!(r.get("+100").is_none());
    }
}
