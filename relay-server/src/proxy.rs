//! # Visitor HTTP Dispatch
//!
//! Turns an inbound `/t/<slug>/<rest>` request into a `request` frame on
//! the matching tunnel's control channel, awaits the paired `response`
//! frame (or times it out), and runs the result through the content
//! rewriter before handing it back to the visitor. Mirrors the shape of
//! the teacher's WebSocket-to-HTTP bridging in `handlers.rs`, generalized
//! from its raw-stream relay to the request/response model spec §3/§4.A
//! describe.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tokio::time::timeout;
use tracing::warn;
use tunnel_protocol::{encode_body, strip_hop_by_hop, TunnelMessage};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::rewriter;
use crate::state::{AppState, ResponseFrame};

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(headers.len());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_string(), value.to_string());
        }
    }
    map
}

fn map_to_headers(map: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in map {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Handles `/t/:slug` (no trailing path segment), which `/t/:slug/*rest`
/// doesn't match on its own.
pub async fn dispatch_root(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    uri: Uri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(
        State(state),
        Path((slug, String::new())),
        uri,
        method,
        headers,
        body,
    )
    .await
}

/// Handles `/t/:slug/*rest`. Returns a synthesized error response (404 if
/// the slug isn't live, 502 on timeout or mid-flight disconnect) rather
/// than propagating an `axum` rejection, so visitors always see a plain
/// HTTP response.
pub async fn dispatch(
    State(state): State<AppState>,
    Path((slug, rest)): Path<(String, String)>,
    uri: Uri,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let tunnel = match state.get(&slug) {
        Some(tunnel) => tunnel,
        None => return DispatchError::UnknownSlug.into_response(),
    };

    let request_id = Uuid::new_v4().to_string();
    let path = match uri.query() {
        Some(query) => format!("/{rest}?{query}"),
        None => format!("/{rest}"),
    };

    let mut request_headers = headers_to_map(&headers);
    strip_hop_by_hop(&mut request_headers);

    let rx = tunnel.register_pending(request_id.clone());
    let message = TunnelMessage::Request {
        request_id: request_id.clone(),
        method: method.as_str().to_string(),
        path,
        headers: request_headers,
        body: encode_body(&body),
    };

    if tunnel.send(message).is_err() {
        tunnel.drop_pending(&request_id);
        // Channel died mid-send, not caught by an upfront writability check
        // (never implemented): spec treats this the same as an unreachable
        // local server, not the "connection lost" wording reserved for that
        // check.
        return DispatchError::TunnelDisconnected.into_response();
    }

    let deadline = Duration::from_millis(state.config.request_timeout_ms);
    let frame = match timeout(deadline, rx).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(_)) => return DispatchError::TunnelDisconnected.into_response(),
        Err(_) => {
            tunnel.drop_pending(&request_id);
            warn!(slug = %slug, request_id = %request_id, "tunnel request timed out");
            return DispatchError::Timeout.into_response();
        }
    };

    tunnel.bump_request_count();
    build_response(&slug, frame)
}

/// Decodes the response frame's body, strips hop-by-hop headers, runs the
/// content rewriter when the response's content type is rewritable, and
/// recomputes `content-length` to match the (possibly rewritten) body.
fn build_response(slug: &str, frame: ResponseFrame) -> Response {
    let status = StatusCode::from_u16(frame.status_code).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response_headers = frame.headers;
    strip_hop_by_hop(&mut response_headers);

    if response_headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("content-security-policy"))
    {
        warn!(slug = %slug, "rewritten response carries a content-security-policy header, shim may be blocked");
    }

    let content_type = response_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    let body = match rewriter::classify(&content_type) {
        Some(kind) => {
            let prefix = format!("/t/{slug}/");
            rewriter::rewrite(kind, &frame.body, &prefix).unwrap_or(frame.body)
        }
        None => frame.body,
    };

    response_headers.retain(|name, _| !name.eq_ignore_ascii_case("content-length"));
    response_headers.insert("content-length".to_string(), body.len().to_string());

    let headers = map_to_headers(&response_headers);
    (status, headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_round_trip_through_maps() {
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("value"));
        let map = headers_to_map(&headers);
        assert_eq!(map.get("x-custom").map(String::as_str), Some("value"));
        let back = map_to_headers(&map);
        assert_eq!(back.get("x-custom").unwrap(), "value");
    }

    #[test]
    fn build_response_rewrites_html_and_fixes_content_length() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        headers.insert("content-length".to_string(), "999".to_string());
        let frame = ResponseFrame {
            status_code: 200,
            headers,
            body: br#"<img src="/a.png">"#.to_vec(),
        };
        let response = build_response("my-app", frame);
        assert_eq!(response.status(), StatusCode::OK);
        let content_length = response
            .headers()
            .get("content-length")
            .unwrap()
            .to_str()
            .unwrap()
            .parse::<usize>()
            .unwrap();
        assert_ne!(content_length, 999);
    }

    #[test]
    fn build_response_passes_through_unrecognized_content_type() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let frame = ResponseFrame {
            status_code: 200,
            headers,
            body: br#"{"src":"/a.png"}"#.to_vec(),
        };
        let response = build_response("my-app", frame);
        assert_eq!(
            response
                .headers()
                .get("content-length")
                .unwrap()
                .to_str()
                .unwrap(),
            br#"{"src":"/a.png"}"#.len().to_string()
        );
    }

    #[test]
    fn build_response_falls_back_to_bad_gateway_on_invalid_status() {
        let frame = ResponseFrame {
            status_code: 0,
            headers: HashMap::new(),
            body: vec![],
        };
        let response = build_response("my-app", frame);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
