//! # CLI-Facing Status
//!
//! The teacher's `AgentState` held UI-facing snapshots behind `RwLock`s for
//! Tauri commands to read. There's no IPC bridge here, just a CLI printing
//! [`crate::events::ControllerEvent`]s as they arrive, so the only state
//! worth keeping is the latest snapshot for a one-shot status query.

use tokio::sync::RwLock;

use crate::events::ControllerEvent;

/// Latest known connection snapshot, updated as `ControllerEvent`s arrive.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub tunnel_id: Option<String>,
    pub subdomain: Option<String>,
    pub public_url: Option<String>,
    pub requests_served: u64,
    pub requests_failed: u64,
}

/// Holds the latest `StatusSnapshot` behind a lock so a CLI status command
/// could read it concurrently with the event-printing loop.
pub struct ClientState {
    pub snapshot: RwLock<StatusSnapshot>,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(StatusSnapshot::default()),
        }
    }

    /// Folds one event into the snapshot.
    pub async fn apply(&self, event: &ControllerEvent) {
        let mut snapshot = self.snapshot.write().await;
        match event {
            ControllerEvent::Connecting { .. } => {
                snapshot.connected = false;
            }
            ControllerEvent::Connected {
                tunnel_id,
                subdomain,
                public_url,
            } => {
                snapshot.connected = true;
                snapshot.tunnel_id = Some(tunnel_id.clone());
                snapshot.subdomain = Some(subdomain.clone());
                snapshot.public_url = Some(public_url.clone());
            }
            ControllerEvent::RequestServed { .. } => {
                snapshot.requests_served += 1;
            }
            ControllerEvent::RequestFailed { .. } => {
                snapshot.requests_failed += 1;
            }
            ControllerEvent::Disconnected { .. } | ControllerEvent::GivingUp { .. } => {
                snapshot.connected = false;
            }
            ControllerEvent::Reconnecting { .. } => {}
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_connected_then_disconnect_updates_snapshot() {
        let state = ClientState::new();
        state
            .apply(&ControllerEvent::Connected {
                tunnel_id: "t1".into(),
                subdomain: "brave-otter-42".into(),
                public_url: "http://example.com/t/brave-otter-42".into(),
            })
            .await;
        assert!(state.snapshot.read().await.connected);

        state
            .apply(&ControllerEvent::Disconnected {
                reason: "closed".into(),
            })
            .await;
        assert!(!state.snapshot.read().await.connected);
    }

    #[tokio::test]
    async fn apply_counts_served_and_failed_requests() {
        let state = ClientState::new();
        state
            .apply(&ControllerEvent::RequestServed {
                method: "GET".into(),
                path: "/".into(),
                status: 200,
            })
            .await;
        state
            .apply(&ControllerEvent::RequestFailed {
                method: "GET".into(),
                path: "/x".into(),
                error: "connection refused".into(),
            })
            .await;
        let snapshot = state.snapshot.read().await;
        assert_eq!(snapshot.requests_served, 1);
        assert_eq!(snapshot.requests_failed, 1);
    }
}
