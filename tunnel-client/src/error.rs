//! # Controller Errors
//!
//! Mirrors the relay server's `thiserror`-based taxonomy
//! (`relay-server/src/error.rs`), scoped to what can go wrong on the
//! client side of the control channel.

use thiserror::Error;

/// Failures surfaced while a single control-channel connection is live.
/// A `ControllerError` always ends that connection; `Controller::run`
/// decides whether to reconnect.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to reach relay server: {0}")]
    ConnectFailed(String),

    #[error("relay rejected the tunnel: {0}")]
    Rejected(String),

    #[error("control channel transport error: {0}")]
    Transport(String),
}
