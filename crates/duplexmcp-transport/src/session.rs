//! Session management.
//!
//! A session is created on a successful `initialize`, identified by the
//! `Mcp-Session-Id` header, touched on every request, and destroyed by an
//! explicit DELETE, idle expiry, or server shutdown. The session owns the
//! per-session notification replay buffer, the pending server-request
//! waiters, and arbitrary per-session user data.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use duplexmcp_protocol::types::{ClientCapabilities, LoggingLevel};

use crate::error::TransportResult;
use crate::pending::PendingRequests;
use crate::sse::{EventBuffer, SseEvent};

/// Unique session identifier.
///
/// 128 bits of CSPRNG entropy rendered as URL-safe lowercase hex with an
/// `mcp-` prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("mcp-{hex}"))
    }

    /// Wrap an id received on the wire.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Server-side session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; only `initialize` traffic is legal
    New,
    /// Handshake complete (`notifications/initialized` received)
    Initialized,
    /// Terminal state
    Terminated,
}

/// The session's notification stream: replay buffer plus the live sender,
/// guarded together so replay and live emission cannot interleave.
struct NotificationChannel {
    buffer: EventBuffer,
    sender: Option<mpsc::UnboundedSender<SseEvent>>,
}

/// A single MCP session.
pub struct Session {
    id: SessionId,
    created_at: Instant,
    last_seen: Mutex<Instant>,
    state: Mutex<SessionState>,
    protocol_version: Mutex<Option<String>>,
    client_capabilities: Mutex<Option<ClientCapabilities>>,
    min_log_level: Mutex<Option<LoggingLevel>>,
    user_data: RwLock<HashMap<String, Value>>,
    notifications: Mutex<NotificationChannel>,
    pending: PendingRequests,
    cancel: CancellationToken,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Session {
    fn new(id: SessionId, replay_capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_seen: Mutex::new(now),
            state: Mutex::new(SessionState::New),
            protocol_version: Mutex::new(None),
            client_capabilities: Mutex::new(None),
            min_log_level: Mutex::new(None),
            user_data: RwLock::new(HashMap::new()),
            notifications: Mutex::new(NotificationChannel {
                buffer: EventBuffer::new(replay_capacity),
                sender: None,
            }),
            pending: PendingRequests::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Creation instant.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Refresh the idle timer.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Whether the idle TTL has elapsed.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(*self.last_seen.lock()) > ttl
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Record the completed handshake. Returns `false` if the session was
    /// not in `New` state.
    pub fn mark_initialized(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::New {
            *state = SessionState::Initialized;
            true
        } else {
            false
        }
    }

    /// Negotiated protocol revision, once `initialize` has run.
    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.lock().clone()
    }

    /// Record the negotiated protocol revision.
    pub fn set_protocol_version(&self, version: impl Into<String>) {
        *self.protocol_version.lock() = Some(version.into());
    }

    /// Capabilities the client declared at `initialize`.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.client_capabilities.lock().clone()
    }

    /// Record the client's declared capabilities.
    pub fn set_client_capabilities(&self, capabilities: ClientCapabilities) {
        *self.client_capabilities.lock() = Some(capabilities);
    }

    /// Minimum log level the client asked for via `logging/setLevel`.
    pub fn min_log_level(&self) -> Option<LoggingLevel> {
        *self.min_log_level.lock()
    }

    /// Record the client's requested minimum log level.
    pub fn set_min_log_level(&self, level: LoggingLevel) {
        *self.min_log_level.lock() = Some(level);
    }

    /// Read a user-data value.
    pub fn user_data(&self, key: &str) -> Option<Value> {
        self.user_data.read().get(key).cloned()
    }

    /// Write a user-data value.
    pub fn set_user_data(&self, key: impl Into<String>, value: Value) {
        self.user_data.write().insert(key.into(), value);
    }

    /// Remove a user-data value.
    pub fn remove_user_data(&self, key: &str) -> Option<Value> {
        self.user_data.write().remove(key)
    }

    /// Pending server-initiated waiters scoped to this session.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Token cancelled when the session terminates.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Open (or replace) the session's notification stream.
    ///
    /// Missed events after `last_event_id` are replayed into the fresh
    /// channel before it goes live, so replay and new emission keep wire
    /// order. A previous stream's receiver ends when its sender is
    /// replaced here.
    pub fn open_notification_stream(
        &self,
        last_event_id: Option<u64>,
    ) -> TransportResult<mpsc::UnboundedReceiver<SseEvent>> {
        let mut channel = self.notifications.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(last_seen) = last_event_id {
            for (id, data) in channel.buffer.replay_from(last_seen)? {
                let _ = tx.send(SseEvent::with_id(id, data).with_event("message"));
            }
        }
        channel.sender = Some(tx);
        Ok(rx)
    }

    /// Whether a live notification stream is attached.
    pub fn has_notification_stream(&self) -> bool {
        self.notifications.lock().sender.is_some()
    }

    /// Buffer a notification payload and push it to the live stream.
    ///
    /// The payload is buffered for replay even when no stream is attached.
    /// Returns the assigned event id.
    pub fn push_notification(&self, data: String) -> u64 {
        let mut channel = self.notifications.lock();
        let id = channel.buffer.append(data.clone());
        if let Some(sender) = &channel.sender {
            if sender
                .send(SseEvent::with_id(id, data).with_event("message"))
                .is_err()
            {
                channel.sender = None;
            }
        }
        id
    }

    /// Terminate the session: mark it terminal, cancel in-flight work,
    /// free waiters, and close the notification stream.
    pub fn terminate(&self) {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Terminated;
        }
        self.cancel.cancel();
        self.pending.cancel_all();
        self.notifications.lock().sender = None;
        debug!(session_id = %self.id, "session terminated");
    }
}

/// Thread-safe session store.
///
/// Lookup is O(1) behind a read-write lock. Expired sessions are removed
/// by a background sweeper and opportunistically during lookups; teardown
/// callbacks never run while the map lock is held.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    ttl: Duration,
    sweep_interval: Duration,
    replay_capacity: usize,
    last_sweep: Mutex<Instant>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.read().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl SessionStore {
    /// Create a store with the given idle TTL, sweep cadence, and replay
    /// buffer capacity for new sessions.
    pub fn new(ttl: Duration, sweep_interval: Duration, replay_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            sweep_interval,
            replay_capacity,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Create a session with a fresh id.
    pub fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(SessionId::generate(), self.replay_capacity));
        self.sessions
            .write()
            .insert(session.id().as_str().to_string(), Arc::clone(&session));
        debug!(session_id = %session.id(), "session created");
        session
    }

    /// Look up a session for protocol traffic: touches the idle timer and
    /// opportunistically sweeps expired entries.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.maybe_sweep();
        let session = self.sessions.read().get(id).cloned()?;
        if session.is_expired(Instant::now(), self.ttl) {
            self.terminate(id);
            return None;
        }
        session.touch();
        Some(session)
    }

    /// Look up a session without touching it (admin introspection).
    pub fn peek(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and tear down a session. Returns `true` if it existed.
    pub fn terminate(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => {
                // Teardown outside the map lock
                session.terminate();
                true
            }
            None => false,
        }
    }

    /// Remove every session whose idle TTL elapsed before `now`.
    ///
    /// Expired ids are collected under the read lock, removed under the
    /// write lock, and torn down with no lock held.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, session)| session.is_expired(now, self.ttl))
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let mut removed = Vec::with_capacity(expired.len());
        {
            let mut sessions = self.sessions.write();
            for id in &expired {
                if let Some(session) = sessions.remove(id) {
                    removed.push(session);
                }
            }
        }
        for session in &removed {
            session.terminate();
        }
        info!(count = removed.len(), "swept expired sessions");
        removed.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Terminate every session (server shutdown).
    pub fn shutdown(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &drained {
            session.terminate();
        }
        info!(count = drained.len(), "session store shut down");
    }

    /// Spawn the background sweeper. The task exits when the store is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::downgrade(self);
        let interval = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.sweep_expired(Instant::now());
            }
        })
    }

    fn maybe_sweep(&self) {
        let due = {
            let mut last = self.last_sweep.lock();
            if last.elapsed() >= self.sweep_interval {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            self.sweep_expired(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(300), Duration::from_secs(60), 16)
    }

    #[test]
    fn test_session_id_entropy_and_shape() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("mcp-"));
        // 128 bits as hex
        assert_eq!(a.as_str().len(), 4 + 32);
    }

    #[test]
    fn test_create_and_get_touches() {
        let store = store();
        let session = store.create();
        let found = store.get(session.id().as_str()).unwrap();
        assert_eq!(found.id(), session.id());
        assert!(store.peek(session.id().as_str()).is_some());
        assert!(store.get("mcp-unknown").is_none());
    }

    #[test]
    fn test_state_machine() {
        let store = store();
        let session = store.create();
        assert_eq!(session.state(), SessionState::New);
        assert!(session.mark_initialized());
        assert_eq!(session.state(), SessionState::Initialized);
        // Second transition is rejected
        assert!(!session.mark_initialized());
        session.terminate();
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_terminate_removes_and_cancels() {
        let store = store();
        let session = store.create();
        let token = session.cancel_token().clone();
        assert!(store.terminate(session.id().as_str()));
        assert!(token.is_cancelled());
        assert!(store.get(session.id().as_str()).is_none());
        assert!(!store.terminate(session.id().as_str()));
    }

    #[test]
    fn test_sweep_expired() {
        let store = SessionStore::new(Duration::from_millis(0), Duration::from_secs(60), 16);
        let session = store.create();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.sweep_expired(Instant::now()), 1);
        assert!(store.peek(session.id().as_str()).is_none());
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_expired_session_not_returned_by_get() {
        let store = SessionStore::new(Duration::from_millis(0), Duration::from_secs(60), 16);
        let session = store.create();
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get(session.id().as_str()).is_none());
    }

    #[test]
    fn test_user_data() {
        let store = store();
        let session = store.create();
        session.set_user_data("tenant", json!("acme"));
        assert_eq!(session.user_data("tenant"), Some(json!("acme")));
        assert_eq!(session.remove_user_data("tenant"), Some(json!("acme")));
        assert_eq!(session.user_data("tenant"), None);
    }

    #[tokio::test]
    async fn test_notification_stream_replay_and_live() {
        let store = store();
        let session = store.create();

        // Buffered before any stream exists
        assert_eq!(session.push_notification("one".into()), 1);
        assert_eq!(session.push_notification("two".into()), 2);

        let mut rx = session.open_notification_stream(Some(1)).unwrap();
        let replayed = rx.recv().await.unwrap();
        assert_eq!(replayed.id, Some(2));
        assert_eq!(replayed.data, "two");

        session.push_notification("three".into());
        let live = rx.recv().await.unwrap();
        assert_eq!(live.id, Some(3));
    }

    #[tokio::test]
    async fn test_notification_stream_replacement_closes_predecessor() {
        let store = store();
        let session = store.create();
        let mut first = session.open_notification_stream(None).unwrap();
        let _second = session.open_notification_stream(None).unwrap();
        // First stream's sender was replaced, so it ends
        assert!(first.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_replay_gap_is_an_error() {
        let store = SessionStore::new(Duration::from_secs(300), Duration::from_secs(60), 2);
        let session = store.create();
        for i in 0..5 {
            session.push_notification(format!("n{i}"));
        }
        assert!(session.open_notification_stream(Some(1)).is_err());
    }
}
