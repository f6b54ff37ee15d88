//! # Base URL Derivation
//!
//! Implements spec §4.B's priority order: configured `PUBLIC_URL`, then the
//! inbound `Host` header (scheme-upgraded for known cloud platforms), then
//! the relay's own LAN address.

const CLOUD_HTTPS_SUFFIXES: &[&str] = &[
    ".onrender.com",
    ".railway.app",
    ".fly.dev",
    ".herokuapp.com",
    ".vercel.app",
    ".up.railway.app",
    ".azurewebsites.net",
];

/// Returns `true` if `host` matches one of the fixed cloud-platform
/// suffixes that imply an HTTPS-terminating front door.
pub fn host_implies_https(host: &str) -> bool {
    CLOUD_HTTPS_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// Derives the base URL for a single request, given the configured
/// override, the inbound `Host` header (if any), the relay's own active
/// port, and whether the relay's own listener is plain HTTP or TLS.
pub fn derive_base_url(
    configured: Option<&str>,
    host_header: Option<&str>,
    own_scheme: &str,
    own_port: u16,
) -> String {
    if let Some(configured) = configured {
        return configured.trim_end_matches('/').to_string();
    }

    if let Some(host) = host_header {
        let scheme = if host_implies_https(host) { "https" } else { own_scheme };
        return format!("{scheme}://{host}");
    }

    let lan_ip = local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string());
    format!("{own_scheme}://{lan_ip}:{own_port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_override_wins_and_strips_slash() {
        let url = derive_base_url(Some("https://tunnels.example/"), Some("ignored"), "http", 8080);
        assert_eq!(url, "https://tunnels.example");
    }

    #[test]
    fn cloud_host_upgrades_scheme() {
        let url = derive_base_url(None, Some("my-app.fly.dev"), "http", 8080);
        assert_eq!(url, "https://my-app.fly.dev");
    }

    #[test]
    fn plain_host_keeps_own_scheme() {
        let url = derive_base_url(None, Some("relay.internal:8080"), "http", 8080);
        assert_eq!(url, "http://relay.internal:8080");
    }

    #[test]
    fn falls_back_to_lan_address_with_own_port() {
        let url = derive_base_url(None, None, "http", 9090);
        assert!(url.starts_with("http://"));
        assert!(url.ends_with(":9090"));
    }
}
