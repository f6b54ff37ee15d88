//! # Client Configuration
//!
//! CLI/env-sourced configuration for the tunnel controller, in the same
//! `clap::Parser` + `env` attribute style as the relay server's
//! `Config` (`relay-server/src/config.rs`).

use clap::Parser;
use tunnel_protocol::DEFAULT_MAX_RECONNECT_ATTEMPTS;

/// Tunnel client configuration.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Local port the visitor's request should be forwarded to.
    #[arg(long, env = "LOCAL_PORT")]
    pub local_port: u16,

    /// Relay server control-channel URL (`ws://` or `wss://`).
    #[arg(long, env = "SERVER_URL", default_value = "ws://localhost:8080/tunnel")]
    pub server_url: String,

    /// Requests a specific subdomain; omit to get a generated one.
    #[arg(long, env = "SUBDOMAIN")]
    pub subdomain: Option<String>,

    /// Gives up reconnecting after this many consecutive failed attempts.
    #[arg(
        long,
        env = "MAX_RECONNECT_ATTEMPTS",
        default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS
    )]
    pub max_reconnect_attempts: u32,

    /// `debug` / `info` / `warn` / `error`.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Builds the full control-channel URL, appending the handshake query
    /// parameters (`port`, and `subdomain` if requested).
    pub fn connect_url(&self, tunnel_id: &str) -> String {
        let mut url = format!(
            "{}{sep}tunnelId={tunnel_id}&port={port}",
            self.server_url,
            sep = if self.server_url.contains('?') { '&' } else { '?' },
            port = self.local_port,
        );
        if let Some(subdomain) = &self.subdomain {
            url.push_str("&subdomain=");
            url.push_str(subdomain);
        }
        url
    }

    #[cfg(test)]
    pub fn for_tests(local_port: u16) -> Self {
        let mut config = Config::parse_from(["tunnelc", "--local-port", &local_port.to_string()]);
        config.local_port = local_port;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_url_includes_port_and_tunnel_id() {
        let config = Config::for_tests(3000);
        let url = config.connect_url("abc-123");
        assert!(url.contains("tunnelId=abc-123"));
        assert!(url.contains("port=3000"));
        assert!(!url.contains("subdomain="));
    }

    #[test]
    fn connect_url_includes_requested_subdomain() {
        let mut config = Config::for_tests(3000);
        config.subdomain = Some("my-app".to_string());
        let url = config.connect_url("abc-123");
        assert!(url.contains("subdomain=my-app"));
    }
}
