//! # Controller Events
//!
//! Replaces the teacher's `app_handle.emit("tunnels-updated", ...)` Tauri
//! bridge with a plain `tokio::sync::broadcast` feed: the CLI binary
//! subscribes and prints, but anything else embedding [`crate::controller::Controller`]
//! can subscribe instead.

/// One lifecycle event, broadcast to every subscriber.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// About to attempt a connection; `attempt` is 1 on the first try.
    Connecting { attempt: u32 },

    /// The relay accepted the tunnel and assigned a public URL.
    Connected {
        tunnel_id: String,
        subdomain: String,
        public_url: String,
    },

    /// A visitor request was forwarded to the local port and answered.
    RequestServed {
        method: String,
        path: String,
        status: u16,
    },

    /// A visitor request could not be served locally (connection refused,
    /// timeout, etc.); a synthesized 502 was sent back to the relay.
    RequestFailed {
        method: String,
        path: String,
        error: String,
    },

    /// The control channel dropped, with the reason it ended.
    Disconnected { reason: String },

    /// Backing off before the next reconnect attempt.
    Reconnecting { attempt: u32, delay_secs: u64 },

    /// Exceeded the configured reconnect attempt cap; the controller has
    /// stopped and `Controller::run` has returned.
    GivingUp { attempts: u32 },
}
