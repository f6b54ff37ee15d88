//! # TLS Listener
//!
//! Builds a `rustls` server config from a PEM certificate/key pair for the
//! optional HTTPS listener (spec §6, `USE_HTTPS`). Grounded on
//! `aether-proxy`'s `proxy/tls.rs` `build_tls_acceptor`, trimmed to what
//! this relay needs: no self-signed cert generation (operators bring
//! their own PEM pair) and no session-cache/ticketer tuning.

use std::fs::File;
use std::io::{self, BufReader, Error, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

/// Loads a PEM certificate chain and private key and builds a
/// `TlsAcceptor` for plain HTTP/1.1 (no ALPN negotiation needed; the relay
/// never speaks HTTP/2 to visitors).
pub fn build_tls_acceptor(cert_path: &str, key_path: &str) -> io::Result<TlsAcceptor> {
    let cert_file = File::open(Path::new(cert_path))?;
    let key_file = File::open(Path::new(key_path))?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file)).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("no certificates found in {cert_path}"),
        ));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("no private key found in {key_path}"),
            )
        })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| Error::new(ErrorKind::InvalidData, err))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
