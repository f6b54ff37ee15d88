//! Wire message types for the tunnel control channel.
//!
//! The control channel carries discrete, order-preserving, text-framed
//! messages: one JSON object per frame, `"type"` tagged. This crate is the
//! single source of truth for that shape so the relay server and the
//! tunnel client cannot drift out of sync.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How often the relay sends a `ping` frame to a connected client.
pub const KEEPALIVE_PERIOD_SECS: u64 = 30;

/// Default per-request deadline, in milliseconds, unless overridden by
/// `REQUEST_TIMEOUT`.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default cap on simultaneous tunnels, unless overridden by `MAX_TUNNELS`.
pub const DEFAULT_MAX_TUNNELS: usize = 1000;

/// Default reconnect attempt cap for the client controller.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Messages exchanged over the control channel.
///
/// Internally tagged on `"type"`, `snake_case` variant names, matching the
/// wire shape spelled out in spec.md §4.A.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelMessage {
    /// server → client. Handshake acknowledgement, sent exactly once, first
    /// frame after accept.
    Connected {
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
        subdomain: String,
        #[serde(rename = "publicUrl")]
        public_url: String,
    },

    /// server → client. Terminal; the server may close the channel
    /// immediately after sending this.
    Error { message: String },

    /// server → client. Liveness probe sent every `KEEPALIVE_PERIOD_SECS`.
    Ping,

    /// client → server. Reply to `Ping` (transport-level keepalive is also
    /// acceptable; this is optional).
    Pong,

    /// server → client. A visitor request to be proxied to the local port.
    /// `body` is base64-encoded and may be empty.
    Request {
        #[serde(rename = "requestId")]
        request_id: String,
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
    },

    /// client → server. Matches a prior `Request` by `request_id`.
    Response {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "statusCode")]
        status_code: u16,
        headers: HashMap<String, String>,
        body: String,
    },
}

/// Base64-encode a request/response body for wire transport.
pub fn encode_body(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(bytes)
}

/// Decode a base64 body back into bytes. Empty input decodes to an empty
/// buffer.
pub fn decode_body(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    STANDARD.decode(encoded)
}

/// Compute the next reconnect backoff delay for attempt `n` (1-indexed):
/// `1s * 2^(n-1)`, capped at 30s.
pub fn reconnect_backoff_secs(attempt: u32) -> u64 {
    let shift = attempt.saturating_sub(1).min(5); // 2^5 = 32 already exceeds cap
    (1u64 << shift).min(30)
}

/// Hop-by-hop headers that must never cross a tunnel boundary in either
/// direction (spec.md §8 invariant 6).
pub const HOP_BY_HOP_HEADERS: &[&str] = &["transfer-encoding", "connection", "keep-alive"];

/// Strip hop-by-hop headers from a header map, case-insensitively.
pub fn strip_hop_by_hop(headers: &mut HashMap<String, String>) {
    headers.retain(|k, _| {
        let lower = k.to_ascii_lowercase();
        !HOP_BY_HOP_HEADERS.contains(&lower.as_str())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip_including_empty() {
        for sample in ["", "hi", "a bit of html <b>bold</b>"] {
            let encoded = encode_body(sample.as_bytes());
            let decoded = decode_body(&encoded).unwrap();
            assert_eq!(decoded, sample.as_bytes());
        }
    }

    #[test]
    fn reconnect_backoff_doubles_then_caps() {
        assert_eq!(reconnect_backoff_secs(1), 1);
        assert_eq!(reconnect_backoff_secs(2), 2);
        assert_eq!(reconnect_backoff_secs(3), 4);
        assert_eq!(reconnect_backoff_secs(4), 8);
        assert_eq!(reconnect_backoff_secs(5), 16);
        assert_eq!(reconnect_backoff_secs(6), 30);
        assert_eq!(reconnect_backoff_secs(100), 30);
    }

    #[test]
    fn strip_hop_by_hop_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("Transfer-Encoding".to_string(), "chunked".to_string());
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("Content-Type"));
    }

    #[test]
    fn message_tag_round_trips_through_json() {
        let msg = TunnelMessage::Connected {
            tunnel_id: "t1".into(),
            subdomain: "brave-otter-42".into(),
            public_url: "http://example.com/t/brave-otter-42".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        let parsed: TunnelMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            TunnelMessage::Connected { subdomain, .. } => assert_eq!(subdomain, "brave-otter-42"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
