//! the slave registry: a single-writer-at-a-time name → session map,
//! mirroring the project's existing subscription-map pattern. registering
//! a slave under a name already present is treated as an implicit
//! disconnect of the previous session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, Mutex};

use crate::session::{self, Session};

/// an outbound frame queued for delivery to a connected slave; only the
/// long-lived binding has anywhere to deliver these, the HTTP binding's
/// slaves poll instead and never receive pushes
pub type Outbox = mpsc::Sender<String>;

struct Entry {
    session: Session,
    outbox: Option<Outbox>,
}

pub struct Registry {
    sessions: Mutex<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(Self { sessions: Mutex::new(HashMap::new()) });
        Registry::spawn_keepalive(registry.clone());
        registry
    }

    fn spawn_keepalive(this: Arc<Self>) {
        tokio::task::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(120));
            loop {
                interval.tick().await;
                this.ping_all().await;
            }
        });
    }

    /// sends a keepalive frame to every slave with an open long-lived
    /// connection; a slave that misses two consecutive pings is dropped by
    /// the transport loop noticing the send failure, not by the registry
    /// itself
    async fn ping_all(&self) {
        let sessions = self.sessions.lock().await;
        for (name, entry) in sessions.iter() {
            if let Some(outbox) = &entry.outbox {
                if outbox.send("<ping/>".to_string()).await.is_err() {
                    debug!("keepalive delivery to slave '{name}' failed, connection likely gone");
                }
            }
        }
    }

    /// inserts a freshly registered session, implicitly disconnecting any
    /// previous session under the same name
    pub async fn insert(&self, session: Session, outbox: Option<Outbox>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(mut previous) = sessions.remove(&session.name) {
            session::orphan(&mut previous.session);
            debug!("slave '{}' re-registered, previous session treated as disconnected", session.name);
        }
        let name = session.name.clone();
        sessions.insert(name, Entry { session, outbox });
    }

    pub async fn get(&self, name: &str) -> Option<Session> {
        self.sessions.lock().await.get(name).map(|e| e.session.clone())
    }

    pub async fn update(&self, session: Session) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(&session.name) {
            entry.session = session;
        }
    }

    pub async fn remove(&self, name: &str) -> Option<Session> {
        self.sessions.lock().await.remove(name).map(|e| e.session)
    }

    pub async fn outbox(&self, name: &str) -> Option<Outbox> {
        self.sessions.lock().await.get(name).and_then(|e| e.outbox.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// names of every slave with an open long-lived connection, regardless
    /// of their current session state; the caller filters by state
    pub async fn idle_sessions(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn session(name: &str) -> Session {
        Session {
            name: name.to_string(),
            properties: BTreeMap::new(),
            state: crate::session::SessionState::Registered,
            build_id: None,
            timestamp_delta: None,
        }
    }

    #[tokio::test]
    async fn reregistering_replaces_previous_session() {
        let registry = Registry::new();
        registry.insert(session("slave1"), None).await;
        registry.insert(session("slave1"), None).await;

        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn lookup_returns_current_session() {
        let registry = Registry::new();
        registry.insert(session("slave1"), None).await;

        let found = registry.get("slave1").await.unwrap();
        assert_eq!(found.name, "slave1");
    }
}
