//! Live-connection bookkeeping.
//!
//! The registry is the only structure mutated by multiple workers: every
//! session registers, touches, and deregisters itself, while the shutdown
//! drain and the inactivity monitor read it to make lifecycle decisions. It
//! performs no I/O of its own.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

static CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_connection_id() -> u64 {
    CONNECTION_ID.fetch_add(1, Ordering::SeqCst)
}

/// Registry entry for one live connection. The session owns the socket; the
/// registry holds only this non-owning handle for enumeration and shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: u64,
    pub addr: SocketAddr,

    /// Fired to force the session out of its read during shutdown.
    pub shutdown: Arc<Notify>,
}

#[derive(Debug)]
struct Inner {
    connections: HashMap<u64, ConnectionHandle>,
    last_activity: Instant,
}

/// Process-wide set of live connections plus the timestamp of the most
/// recent activity across any of them.
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                connections: HashMap::new(),
                last_activity: Instant::now(),
            }),
        }
    }

    /// Add a freshly accepted connection and refresh the activity marker.
    pub async fn register(&self, addr: SocketAddr) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: next_connection_id(),
            addr,
            shutdown: Arc::new(Notify::new()),
        };
        let mut inner = self.inner.lock().await;
        inner.connections.insert(handle.id, handle.clone());
        inner.last_activity = Instant::now();
        handle
    }

    /// Remove a connection. A no-op when the entry is already gone, which
    /// happens when the shutdown drain got there first.
    pub async fn deregister(&self, id: u64) {
        self.inner.lock().await.connections.remove(&id);
    }

    /// Refresh the most-recent-activity marker. Called once per command.
    pub async fn touch(&self) {
        self.inner.lock().await.last_activity = Instant::now();
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Current members without removing them.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner.lock().await.connections.values().cloned().collect()
    }

    /// Remove and return every member, for the shutdown drain.
    pub async fn drain(&self) -> Vec<ConnectionHandle> {
        let mut inner = self.inner.lock().await;
        inner.connections.drain().map(|(_, handle)| handle).collect()
    }

    /// True when no connections are registered and the last activity is older
    /// than `threshold`.
    pub async fn is_idle_for(&self, threshold: Duration) -> bool {
        let inner = self.inner.lock().await;
        inner.connections.is_empty() && inner.last_activity.elapsed() > threshold
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
