//! # Relay Error Taxonomy
//!
//! One variant per failure mode in spec §7, each carrying the rendering it
//! needs: a visitor-facing status + body, or a handshake-time `error` frame.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

use crate::api::NOT_FOUND_BODY;

/// Errors surfaced while dispatching a visitor request to a tunnel.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no tunnel for this slug")]
    UnknownSlug,

    #[error("tunnel connection lost")]
    ChannelClosed,

    #[error("request timed out")]
    Timeout,

    #[error("tunnel disconnected mid-request")]
    TunnelDisconnected,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        match self {
            // Same landing page as an unmatched route (spec §4.B step 2):
            // an unknown slug isn't a distinct kind of "not found".
            DispatchError::UnknownSlug => {
                (StatusCode::NOT_FOUND, Html(NOT_FOUND_BODY)).into_response()
            }
            DispatchError::ChannelClosed => (
                StatusCode::BAD_GATEWAY,
                "Tunnel connection lost. Please try again.",
            )
                .into_response(),
            DispatchError::Timeout | DispatchError::TunnelDisconnected => (
                StatusCode::BAD_GATEWAY,
                "Failed to reach local server. Make sure your dev server is running.",
            )
                .into_response(),
        }
    }
}

/// Errors raised while handling a handshake, before a tunnel exists.
///
/// Malformed query parameters (e.g. a non-numeric `port`) never reach
/// this enum at all: axum's `Query` extractor rejects them with a plain
/// 400 before the handshake handler runs, which is the "malformed
/// handshake... rejected cleanly" treatment spec §7 asks for.
#[derive(Debug, Error, Clone)]
pub enum HandshakeError {
    #[error("relay is at capacity ({max_tunnels} tunnels)")]
    CapacityExceeded { max_tunnels: usize },

    #[error("could not allocate a unique subdomain after {attempts} attempts")]
    SlugExhausted { attempts: u32 },
}

impl HandshakeError {
    /// Message sent in the terminal `error` frame before closing the
    /// control channel.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }
}
