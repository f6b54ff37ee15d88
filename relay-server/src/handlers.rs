//! # Control Channel Handler
//!
//! The WebSocket endpoint a tunnel client connects out to. Handles the
//! handshake (slug allocation, capacity check), the keepalive ping/pong
//! loop, and `response` frame correlation against pending visitor
//! requests. Keeps the teacher's split-socket-plus-outbound-task shape
//! (`handlers.rs`'s `handle_connection`), generalized from raw agent/
//! controller relaying to the single-tunnel control-channel model spec
//! §3/§4.A describe.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tunnel_protocol::{decode_body, TunnelMessage, KEEPALIVE_PERIOD_SECS};
use uuid::Uuid;

use crate::baseurl;
use crate::error::HandshakeError;
use crate::slug;
use crate::state::{AppState, ResponseFrame, Tunnel};

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "tunnelId", default)]
    tunnel_id: Option<String>,
    port: u16,
    #[serde(default)]
    subdomain: Option<String>,
}

/// `GET /tunnel` — upgrades to the control-channel WebSocket.
pub async fn tunnel_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host_header = headers
        .get("host")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_tunnel_connection(socket, state, query, host_header))
}

/// Picks the tunnel's slug, per spec §4.B: a requested subdomain is used
/// iff it matches the allowed shape, is within the length cap, and is not
/// currently taken; otherwise (no subdomain requested, or the requested
/// one fails any of those checks — scenario 2 in spec §8 is exactly this
/// case) a free `<adj>-<noun>-<n>` slug is generated instead.
fn allocate_slug(state: &AppState, requested: Option<&str>) -> Result<String, HandshakeError> {
    if let Some(requested) = requested {
        if slug::is_valid_requested_slug(requested) && state.is_slug_free(requested) {
            return Ok(requested.to_string());
        }
    }
    slug::generate_free_slug(|candidate| state.is_slug_free(candidate)).ok_or(
        HandshakeError::SlugExhausted {
            attempts: slug::MAX_GENERATE_ATTEMPTS,
        },
    )
}

/// Registers the allocated slug, retrying with a freshly generated one if
/// another handshake wins the race between [`allocate_slug`]'s freedom
/// check and insertion (spec invariant 6: allocation is atomic with
/// registration, so a losing racer never observes a half-claimed slug —
/// it just gets a different one, same as a losing "requested but taken"
/// call would).
fn register_with_retry(
    state: &AppState,
    mut slug: String,
    tunnel_id: &str,
    local_port: u16,
    tx: &mpsc::UnboundedSender<TunnelMessage>,
) -> Result<(String, Arc<Tunnel>), HandshakeError> {
    for _ in 0..slug::MAX_GENERATE_ATTEMPTS {
        let tunnel = Arc::new(Tunnel::new(
            tunnel_id.to_string(),
            slug.clone(),
            local_port,
            tx.clone(),
        ));
        if state.try_register(slug.clone(), tunnel.clone()) {
            return Ok((slug, tunnel));
        }
        slug = slug::generate_free_slug(|candidate| state.is_slug_free(candidate)).ok_or(
            HandshakeError::SlugExhausted {
                attempts: slug::MAX_GENERATE_ATTEMPTS,
            },
        )?;
    }
    Err(HandshakeError::SlugExhausted {
        attempts: slug::MAX_GENERATE_ATTEMPTS,
    })
}

async fn send_error_and_close(
    sink: &mut SplitSink<WebSocket, Message>,
    err: HandshakeError,
) {
    warn!(%err, "rejecting tunnel handshake");
    let frame = TunnelMessage::Error {
        message: err.wire_message(),
    };
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = sink.send(Message::Text(text.into())).await;
    }
    let _ = sink.close().await;
}

async fn handle_tunnel_connection(
    socket: WebSocket,
    state: AppState,
    query: HandshakeQuery,
    host_header: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();

    if state.is_at_capacity() {
        send_error_and_close(
            &mut sink,
            HandshakeError::CapacityExceeded {
                max_tunnels: state.config.max_tunnels,
            },
        )
        .await;
        return;
    }

    let slug = match allocate_slug(&state, query.subdomain.as_deref()) {
        Ok(slug) => slug,
        Err(err) => {
            send_error_and_close(&mut sink, err).await;
            return;
        }
    };

    let tunnel_id = query
        .tunnel_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (tx, mut rx) = mpsc::unbounded_channel::<TunnelMessage>();
    let (slug, tunnel) = match register_with_retry(&state, slug, &tunnel_id, query.port, &tx) {
        Ok(pair) => pair,
        Err(err) => {
            send_error_and_close(&mut sink, err).await;
            return;
        }
    };

    let base_url = baseurl::derive_base_url(
        state.config.public_url().as_deref(),
        host_header.as_deref(),
        state.config.own_scheme(),
        state.config.own_port(),
    );
    let public_url = format!("{base_url}/t/{slug}/");

    info!(%slug, %tunnel_id, port = query.port, "tunnel connected");
    let _ = tx.send(TunnelMessage::Connected {
        tunnel_id: tunnel_id.clone(),
        subdomain: slug.clone(),
        public_url,
    });

    let outbound_task = tokio::spawn(async move {
        let mut keepalive = tokio::time::interval(Duration::from_secs(KEEPALIVE_PERIOD_SECS));
        keepalive.tick().await; // first tick fires immediately; discard it
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(msg) = outbound else { break };
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(err) => {
                            error!(%err, "failed to serialize outbound frame");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = keepalive.tick() => {
                    let text = serde_json::to_string(&TunnelMessage::Ping).unwrap();
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_frame(&tunnel, &tx, &text),
            Message::Close(_) => break,
            _ => {}
        }
    }

    outbound_task.abort();
    tunnel.fail_all_pending();
    state.unregister(&slug);
    info!(%slug, "tunnel disconnected");
}

/// Decodes one inbound text frame and applies it: correlates `response`
/// frames against pending visitor requests, answers `ping` with `pong`,
/// and logs anything else as unexpected (a client only ever sends
/// `response`/`ping`/`pong` frames on this channel).
fn handle_frame(tunnel: &Arc<Tunnel>, tx: &mpsc::UnboundedSender<TunnelMessage>, text: &str) {
    match serde_json::from_str::<TunnelMessage>(text) {
        Ok(TunnelMessage::Response {
            request_id,
            status_code,
            headers,
            body,
        }) => {
            let body = decode_body(&body).unwrap_or_default();
            tunnel.resolve_pending(
                &request_id,
                ResponseFrame {
                    status_code,
                    headers,
                    body,
                },
            );
        }
        Ok(TunnelMessage::Ping) => {
            let _ = tx.send(TunnelMessage::Pong);
        }
        Ok(TunnelMessage::Pong) => {}
        Ok(other) => {
            warn!(?other, "unexpected frame on control channel");
        }
        Err(err) => {
            warn!(%err, "malformed frame on control channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn allocate_slug_falls_back_to_generated_when_preferred_is_taken() {
        let state = AppState::new(Config::for_tests());
        let (tx, _rx) = mpsc::unbounded_channel();
        let tunnel = Arc::new(Tunnel::new("t1".to_string(), "my-app".to_string(), 3000, tx));
        assert!(state.try_register("my-app".to_string(), tunnel));

        let slug = allocate_slug(&state, Some("my-app")).unwrap();
        assert_ne!(slug, "my-app");
    }

    #[test]
    fn allocate_slug_falls_back_when_preferred_is_malformed() {
        let state = AppState::new(Config::for_tests());
        let slug = allocate_slug(&state, Some("Not Valid!")).unwrap();
        assert_ne!(slug, "Not Valid!");
    }

    #[test]
    fn register_with_retry_gets_a_different_slug_after_a_lost_race() {
        let state = AppState::new(Config::for_tests());
        let (tx, _rx) = mpsc::unbounded_channel();
        // Simulate another handshake claiming "my-app" after allocate_slug
        // checked freedom but before this call registers it.
        let other = Arc::new(Tunnel::new("other".to_string(), "my-app".to_string(), 3000, tx.clone()));
        assert!(state.try_register("my-app".to_string(), other));

        let (slug, tunnel) =
            register_with_retry(&state, "my-app".to_string(), "t1", 3000, &tx).unwrap();
        assert_ne!(slug, "my-app");
        assert_eq!(tunnel.slug, slug);
        assert!(state.get(&slug).is_some());
    }
}
