//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for log correlation
//! - Count connections being served, split by presentation (secure / plain)
//! - Let shutdown wait for in-flight connections to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counts {
    active: AtomicU64,
    secure: AtomicU64,
    total: AtomicU64,
}

/// Tracks connections being served.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counts: Arc<Counts>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The guard decrements the counts on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.counts.active.fetch_add(1, Ordering::SeqCst);
        self.counts.total.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            counts: Arc::clone(&self.counts),
            id: ConnectionId::new(),
            secure: false,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counts.active.load(Ordering::SeqCst)
    }

    /// Active connections classified as secure by the presentation chain.
    pub fn secure_count(&self) -> u64 {
        self.counts.secure.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u64 {
        self.counts.total.load(Ordering::Relaxed)
    }

    /// Wait until every tracked connection has closed. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.active_count() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    counts: Arc<Counts>,
    id: ConnectionId,
    secure: bool,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Record the presentation result for this connection.
    pub fn mark_secure(&mut self, secure: bool) {
        if secure && !self.secure {
            self.counts.secure.fetch_add(1, Ordering::SeqCst);
        } else if !secure && self.secure {
            self.counts.secure.fetch_sub(1, Ordering::SeqCst);
        }
        self.secure = secure;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counts.active.fetch_sub(1, Ordering::SeqCst);
        if self.secure {
            self.counts.secure.fetch_sub(1, Ordering::SeqCst);
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
