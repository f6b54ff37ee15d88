//! # Tunnel Relay Server
//!
//! Accepts outbound-originated control-channel connections from tunnel
//! clients and exposes each one's local port at a public, path-prefixed
//! URL (`/t/<slug>/...`), rewriting HTML/JS/CSS responses so root-mounted
//! apps keep working under the prefix.
//!
//! Split into a library (this crate) and a thin `main.rs` binary so
//! integration tests can drive the real router over a real `TcpListener`
//! without shelling out to a compiled binary.
//!
//! ## Modules
//!
//! - [`config`]   — environment-sourced server configuration
//! - [`state`]    — the tunnel registry and per-tunnel pending-request map
//! - [`slug`]     — subdomain allocation
//! - [`baseurl`]  — public URL derivation
//! - [`handlers`] — the control-channel WebSocket handshake and frame loop
//! - [`proxy`]    — visitor HTTP dispatch to a tunnel's local port
//! - [`rewriter`] — HTML/JS/CSS content rewriting for the path-prefixed mount
//! - [`api`]      — health/stats/status endpoints
//! - [`tls`]      — the optional HTTPS listener
//! - [`error`]    — the error taxonomy surfaced to visitors and clients

pub mod api;
pub mod baseurl;
pub mod config;
pub mod error;
pub mod handlers;
pub mod proxy;
pub mod rewriter;
pub mod slug;
pub mod state;
pub mod tls;

use axum::routing::{any, get};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Builds the full HTTP router: health/stats/status endpoints, the
/// control-channel upgrade endpoint, and visitor dispatch — ready to serve
/// over plain HTTP or behind a TLS acceptor.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/stats", get(api::stats))
        .route("/", get(api::status_page))
        .route("/tunnel", get(handlers::tunnel_handler))
        .route("/t/:slug", any(proxy::dispatch_root))
        .route("/t/:slug/*rest", any(proxy::dispatch))
        .fallback(api::not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
