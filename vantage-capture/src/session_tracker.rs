use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vantage_core::Session;
use vantage_store::FlowStore;

/// In-memory session tracking keyed by client address, with a per-address
/// lock to serialize the get-or-create race instead of a single
/// tracker-wide mutex (§4.3, §5).
pub struct SessionTracker {
    timeout_seconds: u64,
    sessions: DashMap<Uuid, Session>,
    addr_to_session: DashMap<String, Uuid>,
    addr_locks: DashMap<String, Arc<Mutex<()>>>,
    store: Option<Arc<FlowStore>>,
}

impl SessionTracker {
    pub fn new(timeout_seconds: u64, store: Option<Arc<FlowStore>>) -> Self {
        Self {
            timeout_seconds,
            sessions: DashMap::new(),
            addr_to_session: DashMap::new(),
            addr_locks: DashMap::new(),
            store,
        }
    }

    fn lock_for(&self, addr: &str) -> Arc<Mutex<()>> {
        self.addr_locks
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return the existing session for this client address, refreshing its
    /// activity, or create and persist a new one. The per-address lock
    /// ensures concurrent flows from the same client never create two
    /// sessions for one address. `link_addr` and `user_agent` are recorded
    /// only when a new session is created; an existing session's values
    /// are left untouched (§3, §4.2).
    pub async fn get_or_create_session(
        &self,
        client_addr: &str,
        link_addr: Option<&str>,
        user_agent: Option<&str>,
    ) -> Uuid {
        let lock = self.lock_for(client_addr);
        let _guard = lock.lock().await;

        if let Some(existing) = self.addr_to_session.get(client_addr) {
            let session_id = *existing;
            if let Some(mut session) = self.sessions.get_mut(&session_id) {
                session.touch();
                debug!(%session_id, client_addr, "session refreshed");
                return session_id;
            }
        }

        let session = Session::new(
            client_addr,
            link_addr.map(|s| s.to_string()),
            user_agent.map(|s| s.to_string()),
        );
        let session_id = session.id;
        self.sessions.insert(session_id, session.clone());
        self.addr_to_session.insert(client_addr.to_string(), session_id);
        info!(%session_id, client_addr, "session created");

        if let Some(store) = self.store.clone() {
            tokio::spawn(async move {
                if let Err(e) = store.store_session(&session).await {
                    warn!(%session_id, error = %e, "session persistence failed, continuing in-memory only");
                }
            });
        }

        session_id
    }

    pub fn get_session_id(&self, client_addr: &str) -> Option<Uuid> {
        self.addr_to_session.get(client_addr).map(|r| *r)
    }

    pub fn get_session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.get(&session_id).map(|r| r.clone())
    }

    /// Remove sessions inactive past the configured timeout. Returns the
    /// number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = chrono::Utc::now();
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(self.timeout_seconds, now))
            .map(|entry| *entry.key())
            .collect();

        for session_id in &expired {
            if let Some((_, session)) = self.sessions.remove(session_id) {
                self.addr_to_session.remove(&session.client_addr);
                self.addr_locks.remove(&session.client_addr);
                debug!(%session_id, "expired session removed");
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "expired sessions cleaned");
        }
        expired.len()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Run `cleanup_expired` on a fixed interval until cancelled.
    pub async fn run_cleanup_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.cleanup_expired();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_lookups_from_the_same_address_reuse_one_session() {
        let tracker = SessionTracker::new(3600, None);
        let first = tracker.get_or_create_session("10.0.0.1:1234", None, None).await;
        let second = tracker.get_or_create_session("10.0.0.1:1234", None, None).await;
        assert_eq!(first, second);
        assert_eq!(tracker.active_count(), 1);
    }

    #[tokio::test]
    async fn distinct_addresses_get_distinct_sessions() {
        let tracker = SessionTracker::new(3600, None);
        let a = tracker.get_or_create_session("10.0.0.1:1234", None, None).await;
        let b = tracker.get_or_create_session("10.0.0.2:1234", None, None).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_sessions() {
        let tracker = SessionTracker::new(0, None);
        tracker.get_or_create_session("10.0.0.1:1234", None, None).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let removed = tracker.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(tracker.active_count(), 0);
    }
}
