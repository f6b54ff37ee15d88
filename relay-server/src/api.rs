//! # Status Endpoints
//!
//! `GET /health`, `GET /stats`, and the `GET /` landing page that lists
//! live tunnels — read-only views over [`AppState`] for operators and
//! uptime monitors. Mirrors the shape of the teacher's `list_agents`
//! (`api.rs`), generalized from the agent registry to the tunnel
//! registry spec §6 asks for.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::Json;
use serde::Serialize;

use crate::baseurl;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    active_tunnels: usize,
    uptime_seconds: u64,
}

/// `GET /health` — liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_tunnels: state.tunnel_count(),
        uptime_seconds: state.uptime().as_secs(),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    active_tunnels: usize,
    max_tunnels: usize,
    uptime_seconds: u64,
}

/// `GET /stats` — capacity and uptime, for dashboards.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        active_tunnels: state.tunnel_count(),
        max_tunnels: state.config.max_tunnels,
        uptime_seconds: state.uptime().as_secs(),
    })
}

/// `GET /` — a minimal human-readable status page listing live tunnels and
/// the base URL visitors mount them under (spec §6).
pub async fn status_page(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let host_header = headers
        .get("host")
        .and_then(|value| value.to_str().ok());
    let base_url = baseurl::derive_base_url(
        state.config.public_url().as_deref(),
        host_header,
        state.config.own_scheme(),
        state.config.own_port(),
    );

    let mut rows = String::new();
    for entry in state.tunnels.iter() {
        let tunnel = entry.value();
        rows.push_str(&format!(
            "<tr><td><a href=\"{base_url}/t/{slug}/\">{base_url}/t/{slug}/</a></td><td>{port}</td><td>{uptime}s</td><td>{requests}</td></tr>",
            slug = html_escape(&tunnel.slug),
            port = tunnel.local_port,
            uptime = tunnel.uptime().as_secs(),
            requests = tunnel.request_count.load(std::sync::atomic::Ordering::Relaxed),
        ));
    }
    if rows.is_empty() {
        rows.push_str("<tr><td colspan=\"4\">No tunnels are currently connected.</td></tr>");
    }

    let body = format!(
        "<!doctype html><html><head><title>Tunnel Relay</title></head><body>\
<h1>Tunnel Relay</h1>\
<p>Base URL: {base_url}</p>\
<p>{active} / {max} tunnels active, up {uptime}s.</p>\
<table border=\"1\" cellpadding=\"4\"><thead>\
<tr><th>Public URL</th><th>Local Port</th><th>Uptime</th><th>Requests</th></tr>\
</thead><tbody>{rows}</tbody></table>\
</body></html>",
        active = state.tunnel_count(),
        max = state.config.max_tunnels,
        uptime = state.uptime().as_secs(),
    );
    Html(body)
}

/// The 404 landing page body, shared by this catch-all route and
/// [`crate::error::DispatchError::UnknownSlug`] — spec §4.B treats an
/// unmatched route and an unknown tunnel slug as the same "landing page"
/// case, not two different 404 bodies.
pub const NOT_FOUND_BODY: &str = "<h1>404 Not Found</h1>";

/// Fallback for any path that doesn't match a route, a known slug, or a
/// static asset.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_BODY))
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escape_neutralizes_angle_brackets() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
    }
}
