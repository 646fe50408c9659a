//! Session bookkeeping for the HTTP-based transports.
//!
//! A session is created when an SSE stream opens or when a streamable HTTP
//! client initialises without a session id. It ends on disconnect, on an
//! explicit `DELETE`, or when the background sweeper finds it idle for longer
//! than the configured timeout. SSE sessions also own the channel their
//! responses are pushed through; dropping the session closes the stream.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::mcp::protocol::Outgoing;

/// A single client session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session identifier (UUID v4).
    pub id: String,
    /// When the session was created.
    pub created_at: Instant,
    /// When the session was last active.
    pub last_active: Instant,
    /// Whether the client has sent `initialize`.
    pub initialized: bool,
    /// Client name reported during initialisation.
    pub client_name: Option<String>,
    outbox: Option<mpsc::Sender<Outgoing>>,
}

impl Session {
    /// Create a new session.
    #[must_use]
    pub fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_active: now,
            initialized: false,
            client_name: None,
            outbox: None,
        }
    }

    /// Check if the session has expired.
    #[must_use]
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_active.elapsed() >= timeout
    }

    /// Mark the session as active.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Mark the session as initialised.
    pub fn mark_initialized(&mut self, client_name: Option<String>) {
        self.initialized = true;
        self.client_name = client_name;
    }
}

/// Thread-safe session store with automatic cleanup.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    idle_timeout: Duration,
}

impl SessionStore {
    /// Create a new session store with the given idle timeout.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    /// Create a new session and return its ID.
    #[must_use]
    pub fn create(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), Session::new(id.clone()));
        tracing::info!(session_id = %id, "Session created");
        id
    }

    /// Create a session that owns a push channel holding at most `capacity`
    /// undelivered messages, returning the receiving end.
    #[must_use]
    pub fn create_streaming(&self, capacity: usize) -> (String, mpsc::Receiver<Outgoing>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut session = Session::new(id.clone());
        session.outbox = Some(tx);
        self.sessions.insert(id.clone(), session);
        tracing::info!(session_id = %id, "Streaming session created");
        (id, rx)
    }

    /// Get a snapshot of a session by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|r| r.clone())
    }

    /// Touch a session to update its last active time.
    ///
    /// Returns `false` if the session does not exist.
    pub fn touch(&self, id: &str) -> bool {
        self.sessions.get_mut(id).is_some_and(|mut session| {
            session.touch();
            true
        })
    }

    /// Update a session.
    pub fn update<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut Session),
    {
        if let Some(mut session) = self.sessions.get_mut(id) {
            f(&mut session);
        }
    }

    /// Push a message onto a session's stream, waiting while the stream's
    /// buffer is full.
    ///
    /// Returns `false` if the session is gone or has no open stream.
    pub async fn send(&self, id: &str, message: Outgoing) -> bool {
        let outbox = self.sessions.get(id).and_then(|s| s.outbox.clone());
        match outbox {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Remove a session.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = self.sessions.remove(id).map(|(_, s)| s);
        if removed.is_some() {
            tracing::info!(session_id = %id, "Session closed");
        }
        removed
    }

    /// Remove expired sessions, returning how many were evicted.
    pub fn cleanup_expired(&self) -> usize {
        let timeout = self.idle_timeout;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(timeout));
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::info!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    /// Get the number of active sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Start a background task to periodically clean up expired sessions.
    ///
    /// The task ends once the store is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.cleanup_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcResponse, RequestId};
    use serde_json::json;

    #[test]
    fn session_creation() {
        let session = Session::new("test-123".to_string());
        assert_eq!(session.id, "test-123");
        assert!(!session.initialized);
        assert!(session.client_name.is_none());
    }

    #[test]
    fn session_expiry() {
        let mut session = Session::new("test".to_string());
        assert!(!session.is_expired(Duration::from_secs(60)));

        session.last_active = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .unwrap();
        assert!(session.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn store_lifecycle() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create();

        assert!(store.get(&id).is_some());
        assert!(store.touch(&id));
        store.update(&id, |s| s.mark_initialized(Some("inspector".to_string())));
        assert_eq!(
            store.get(&id).unwrap().client_name.as_deref(),
            Some("inspector")
        );

        assert!(store.remove(&id).is_some());
        assert!(store.get(&id).is_none());
        assert!(!store.touch(&id));
    }

    #[test]
    fn idle_sessions_are_evicted() {
        let store = SessionStore::new(Duration::from_secs(60));
        let stale = store.create();
        let fresh = store.create();
        store.update(&stale, |s| {
            s.last_active = Instant::now()
                .checked_sub(Duration::from_secs(600))
                .unwrap();
        });

        assert_eq!(store.cleanup_expired(), 1);
        assert!(store.get(&stale).is_none());
        assert!(store.get(&fresh).is_some());
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn streaming_session_receives_messages() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, mut rx) = store.create_streaming(4);

        let msg = JsonRpcResponse::success(RequestId::Number(1), json!({}));
        assert!(store.send(&id, msg.into()).await);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id(), Some(&RequestId::Number(1)));

        let _ = store.remove(&id);
        assert!(rx.recv().await.is_none());
        let msg = JsonRpcResponse::success(RequestId::Number(2), json!({}));
        assert!(!store.send(&id, msg.into()).await);
    }

    #[tokio::test]
    async fn plain_session_has_no_stream() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create();
        let msg = JsonRpcResponse::success(RequestId::Number(1), json!({}));
        assert!(!store.send(&id, msg.into()).await);
    }

    #[tokio::test]
    async fn full_stream_holds_the_sender_back() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let (id, mut rx) = store.create_streaming(1);
        let msg = |n| Outgoing::from(JsonRpcResponse::success(RequestId::Number(n), json!({})));

        assert!(store.send(&id, msg(1)).await);
        let pending = {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move { store.send(&id, msg(2)).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        assert_eq!(rx.recv().await.unwrap().id(), Some(&RequestId::Number(1)));
        assert!(pending.await.unwrap());
        assert_eq!(rx.recv().await.unwrap().id(), Some(&RequestId::Number(2)));
    }
}
