//! Tunnel identity and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live WebSocket tunnels
//! - Publish the live count as a gauge

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough since only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a promoted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// Counts tunnels that are currently open.
#[derive(Debug, Clone, Default)]
pub struct TunnelTracker {
    active_count: Arc<AtomicU64>,
}

impl TunnelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new tunnel. The returned guard closes it on drop.
    pub fn track(&self) -> TunnelGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_tunnel_opened(active);
        TunnelGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Holds a tunnel open in the tracker.
#[derive(Debug)]
pub struct TunnelGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl TunnelGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_tunnel_closed(active);
        tracing::trace!(connection_id = %self.id, "Tunnel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.to_string().starts_with("ws-"));
    }

    #[test]
    fn tracker_counts_guards() {
        let tracker = TunnelTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.clone().track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }
}
