use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use metrics::gauge;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{generate_session_id, ServerMessage};

/// Connection-level role, distinct from the role held inside a space. Every
/// connection starts unauthenticated and is upgraded on join/identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Unauthenticated,
    Human,
    Robot,
}

struct ConnectionEntry {
    role: ClientRole,
    space: Option<String>,
    last_seen_ms: AtomicU64,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// Snapshot of a connection's bookkeeping, detached from the live entry.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub session_id: String,
    pub role: ClientRole,
    pub space: Option<String>,
    pub last_seen_ms: u64,
}

/// Owned table of every live connection. Pure bookkeeping: registration,
/// liveness timestamps, and fire-and-forget outbound delivery. Message
/// validation and membership rules live elsewhere.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: DashMap<String, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> String {
        let session_id = generate_session_id();
        self.conns.insert(
            session_id.clone(),
            ConnectionEntry {
                role: ClientRole::Unauthenticated,
                space: None,
                last_seen_ms: AtomicU64::new(now_millis()),
                tx,
            },
        );
        gauge!("portal_hub_connections_active", self.conns.len() as f64);
        session_id
    }

    pub fn unregister(&self, session_id: &str) {
        self.conns.remove(session_id);
        gauge!("portal_hub_connections_active", self.conns.len() as f64);
    }

    /// Refresh the liveness timestamp for a session.
    pub fn touch(&self, session_id: &str) {
        if let Some(entry) = self.conns.get(session_id) {
            entry.last_seen_ms.store(now_millis(), Ordering::Relaxed);
        }
    }

    pub fn lookup(&self, session_id: &str) -> Option<ConnectionInfo> {
        self.conns.get(session_id).map(|entry| ConnectionInfo {
            session_id: session_id.to_string(),
            role: entry.role,
            space: entry.space.clone(),
            last_seen_ms: entry.last_seen_ms.load(Ordering::Relaxed),
        })
    }

    /// Deliver a message to a session. Unknown sessions and closed channels
    /// are logged and dropped; a dead outbound path never stalls the caller.
    pub fn send(&self, session_id: &str, message: ServerMessage) {
        match self.conns.get(session_id) {
            Some(entry) => {
                if entry.tx.send(message).is_err() {
                    debug!("outbound channel closed for session {}", session_id);
                }
            }
            None => warn!("dropping message for unknown session {}", session_id),
        }
    }

    pub fn set_role(&self, session_id: &str, role: ClientRole) {
        if let Some(mut entry) = self.conns.get_mut(session_id) {
            entry.role = role;
        }
    }

    pub fn set_space(&self, session_id: &str, space: Option<String>) {
        if let Some(mut entry) = self.conns.get_mut(session_id) {
            entry.space = space;
        }
    }

    pub fn space_of(&self, session_id: &str) -> Option<String> {
        self.conns.get(session_id).and_then(|entry| entry.space.clone())
    }

    pub fn role_of(&self, session_id: &str) -> Option<ClientRole> {
        self.conns.get(session_id).map(|entry| entry.role)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Sessions silent for longer than `timeout`, for the liveness sweep.
    pub fn stale_sessions(&self, timeout: Duration) -> Vec<String> {
        let cutoff = now_millis().saturating_sub(timeout.as_millis() as u64);
        self.conns
            .iter()
            .filter(|entry| entry.last_seen_ms.load(Ordering::Relaxed) < cutoff)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
