//! # Server Configuration
//!
//! All tunables are environment variables (spec §6); `clap`'s `env`
//! attribute lets us parse them once at startup with typed defaults
//! instead of scattering `std::env::var` calls through the handlers.

use clap::Parser;
use tunnel_protocol::{DEFAULT_MAX_TUNNELS, DEFAULT_REQUEST_TIMEOUT_MS};

/// Relay server configuration, sourced entirely from the environment.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// HTTPS listen port, used when `USE_HTTPS=true`.
    #[arg(long, env = "HTTPS_PORT", default_value_t = 8443)]
    pub https_port: u16,

    /// Enable the built-in TLS listener on `HTTPS_PORT`.
    #[arg(long, env = "USE_HTTPS", default_value_t = false)]
    pub use_https: bool,

    /// PEM certificate path, required when `USE_HTTPS=true`.
    #[arg(long, env = "SSL_CERT")]
    pub ssl_cert: Option<String>,

    /// PEM private key path, required when `USE_HTTPS=true`.
    #[arg(long, env = "SSL_KEY")]
    pub ssl_key: Option<String>,

    /// Hard cap on simultaneous tunnels.
    #[arg(long, env = "MAX_TUNNELS", default_value_t = DEFAULT_MAX_TUNNELS)]
    pub max_tunnels: usize,

    /// Per-request deadline in milliseconds.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,

    /// Overrides base-URL auto-detection (trailing slash is stripped).
    #[arg(long, env = "PUBLIC_URL")]
    pub public_url: Option<String>,

    /// `debug` / `info` / `warn` / `error`.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parses configuration from the environment, validating the
    /// TLS-related invariant that `SSL_CERT`/`SSL_KEY` are both present
    /// whenever `USE_HTTPS=true`.
    pub fn from_env() -> Result<Self, String> {
        let config = Config::parse();
        if config.use_https && (config.ssl_cert.is_none() || config.ssl_key.is_none()) {
            return Err(
                "USE_HTTPS=true requires both SSL_CERT and SSL_KEY to be set".to_string(),
            );
        }
        Ok(config)
    }

    pub fn public_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
    }

    /// The scheme the relay's own listener actually serves, for base-URL
    /// derivation when no `Host` header settles it (spec §4.B priority 3).
    pub fn own_scheme(&self) -> &'static str {
        if self.use_https {
            "https"
        } else {
            "http"
        }
    }

    /// The port matching [`Self::own_scheme`].
    pub fn own_port(&self) -> u16 {
        if self.use_https {
            self.https_port
        } else {
            self.port
        }
    }

    /// Builds a default config for unit tests, bypassing environment
    /// parsing entirely.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config::parse_from(["relay-server"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_strips_trailing_slash() {
        let mut config = Config::parse_from(["relay-server"]);
        config.public_url = Some("https://example.com/".to_string());
        assert_eq!(config.public_url().as_deref(), Some("https://example.com"));
    }

    #[test]
    fn defaults_match_spec() {
        let config = Config::parse_from(["relay-server"]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.https_port, 8443);
        assert!(!config.use_https);
        assert_eq!(config.max_tunnels, DEFAULT_MAX_TUNNELS);
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn own_scheme_and_port_follow_use_https() {
        let mut config = Config::parse_from(["relay-server"]);
        assert_eq!(config.own_scheme(), "http");
        assert_eq!(config.own_port(), config.port);

        config.use_https = true;
        assert_eq!(config.own_scheme(), "https");
        assert_eq!(config.own_port(), config.https_port);
    }
}
