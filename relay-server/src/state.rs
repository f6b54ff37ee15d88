//! # Relay State
//!
//! Holds the process-wide tunnel registry. Per DESIGN.md, the slug is the
//! registry's primary key directly (spec invariant 1: "each live slug maps
//! to exactly one live tunnel; each live tunnel holds exactly one slug"),
//! so there is no separate slug-index map to keep in sync.
//!
//! Mirrors the teacher's `Arc<DashMap<...>>` registry shape (`state.rs`),
//! generalized from raw agent/session bookkeeping to the HTTP tunnel +
//! pending-request model spec §3 describes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tunnel_protocol::TunnelMessage;

use crate::config::Config;
use crate::error::DispatchError;

/// Channel used to push outbound frames to a tunnel's WebSocket writer task.
pub type TunnelTx = mpsc::UnboundedSender<TunnelMessage>;

/// A decoded `response` frame, handed back to the dispatcher awaiting it.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub status_code: u16,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Vec<u8>,
}

/// The completion sink for one in-flight visitor request (spec §3 "Pending
/// request record"). Single-use: fulfilled by the matching `response`
/// frame, or dropped on teardown, in which case the awaiting
/// `oneshot::Receiver` resolves to `Err`.
pub struct PendingRequest {
    pub sender: oneshot::Sender<ResponseFrame>,
    pub start_time: Instant,
}

/// A live tunnel: one control channel, one slug, a map of in-flight
/// requests.
pub struct Tunnel {
    pub tunnel_id: String,
    pub slug: String,
    pub local_port: u16,
    pub connected_at: Instant,
    pub request_count: AtomicU64,
    pub pending: DashMap<String, PendingRequest>,
    tx: TunnelTx,
}

impl Tunnel {
    pub fn new(tunnel_id: String, slug: String, local_port: u16, tx: TunnelTx) -> Self {
        Self {
            tunnel_id,
            slug,
            local_port,
            connected_at: Instant::now(),
            request_count: AtomicU64::new(0),
            pending: DashMap::new(),
            tx,
        }
    }

    /// Sends a frame to the client. Returns an error if the control
    /// channel's writer task has already shut down.
    pub fn send(&self, msg: TunnelMessage) -> Result<(), DispatchError> {
        self.tx.send(msg).map_err(|_| DispatchError::ChannelClosed)
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn bump_request_count(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers a pending request and returns the receiver half the
    /// dispatcher awaits.
    pub fn register_pending(&self, request_id: String) -> oneshot::Receiver<ResponseFrame> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingRequest {
                sender: tx,
                start_time: Instant::now(),
            },
        );
        rx
    }

    /// Resolves a pending request with its matching response frame.
    /// Unknown `request_id`s (already timed out, or never existed) are
    /// silently dropped per spec §4.A.
    pub fn resolve_pending(&self, request_id: &str, response: ResponseFrame) {
        if let Some((_, pending)) = self.pending.remove(request_id) {
            let _ = pending.sender.send(response);
        }
    }

    /// Removes a pending request without resolving it (used on timeout, so
    /// a subsequent late response is dropped per spec §4.B "Failure
    /// handling").
    pub fn drop_pending(&self, request_id: &str) {
        self.pending.remove(request_id);
    }

    /// Fails and removes every pending request, for teardown (spec
    /// invariant 3: teardown releases all pending entries).
    pub fn fail_all_pending(&self) {
        self.pending.clear();
    }
}

/// Process-wide, guarded registry of live tunnels, keyed by slug.
#[derive(Clone)]
pub struct AppState {
    pub tunnels: Arc<DashMap<String, Arc<Tunnel>>>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            tunnels: Arc::new(DashMap::new()),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_at_capacity(&self) -> bool {
        self.tunnel_count() >= self.config.max_tunnels
    }

    pub fn get(&self, slug: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.get(slug).map(|entry| entry.value().clone())
    }

    /// Atomically checks capacity and slug availability, then inserts.
    /// Returns `false` (without inserting) if capacity is exceeded or the
    /// slug was already taken — spec invariant 6: "slug allocation is
    /// atomic with registration".
    pub fn try_register(&self, slug: String, tunnel: Arc<Tunnel>) -> bool {
        if self.is_at_capacity() {
            return false;
        }
        match self.tunnels.entry(slug) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(tunnel);
                true
            }
        }
    }

    pub fn unregister(&self, slug: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.remove(slug).map(|(_, tunnel)| tunnel)
    }

    pub fn is_slug_free(&self, slug: &str) -> bool {
        !self.tunnels.contains_key(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_tunnel(slug: &str) -> Arc<Tunnel> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Tunnel::new("tid".to_string(), slug.to_string(), 3000, tx))
    }

    #[test]
    fn try_register_rejects_duplicate_slug() {
        let state = AppState::new(Config::for_tests());
        assert!(state.try_register("dup".to_string(), make_tunnel("dup")));
        assert!(!state.try_register("dup".to_string(), make_tunnel("dup")));
        assert_eq!(state.tunnel_count(), 1);
    }

    #[test]
    fn try_register_rejects_at_capacity() {
        let mut config = Config::for_tests();
        config.max_tunnels = 1;
        let state = AppState::new(config);
        assert!(state.try_register("a".to_string(), make_tunnel("a")));
        assert!(!state.try_register("b".to_string(), make_tunnel("b")));
    }

    #[test]
    fn unregister_makes_slug_immediately_free() {
        let state = AppState::new(Config::for_tests());
        state.try_register("s".to_string(), make_tunnel("s"));
        assert!(state.unregister("s").is_some());
        assert!(state.is_slug_free("s"));
        assert!(state.get("s").is_none());
    }

    #[tokio::test]
    async fn fail_all_pending_drops_senders_so_receivers_error() {
        let tunnel = make_tunnel("s");
        let rx = tunnel.register_pending("req-1".to_string());
        tunnel.fail_all_pending();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn resolve_pending_delivers_response_once() {
        let tunnel = make_tunnel("s");
        let rx = tunnel.register_pending("req-1".to_string());
        tunnel.resolve_pending(
            "req-1",
            ResponseFrame {
                status_code: 200,
                headers: Default::default(),
                body: b"hi".to_vec(),
            },
        );
        let response = rx.await.unwrap();
        assert_eq!(response.status_code, 200);
        assert!(tunnel.pending.is_empty());
    }

    #[test]
    fn resolve_pending_on_unknown_request_id_is_a_no_op() {
        let tunnel = make_tunnel("s");
        tunnel.resolve_pending(
            "never-registered",
            ResponseFrame {
                status_code: 200,
                headers: Default::default(),
                body: vec![],
            },
        );
        assert!(tunnel.pending.is_empty());
    }
}
