//! Thin binary entry point: parses configuration, builds the router from
//! the `relay_server` library crate, and drives the plain-HTTP and
//! (optional) HTTPS listeners to completion.

use std::net::SocketAddr;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use relay_server::config::Config;
use relay_server::state::AppState;
use relay_server::{build_router, tls};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("configuration error: {message}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| format!("relay_server={},tower_http=info", config.log_level).into(),
        ))
        .init();

    if config.use_https {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            error!("failed to install rustls crypto provider");
            std::process::exit(1);
        }
    }

    let use_https = config.use_https;
    let https_port = config.https_port;
    let ssl_cert = config.ssl_cert.clone();
    let ssl_key = config.ssl_key.clone();
    let plain_addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let state = AppState::new(config);
    let app = build_router(state);

    let plain_listener = match TcpListener::bind(plain_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %plain_addr, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    info!(addr = %plain_addr, "relay listening (http)");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let plain_app = app.clone();
    let mut plain_shutdown_rx = shutdown_rx.clone();
    let plain_task = tokio::spawn(async move {
        axum::serve(plain_listener, plain_app)
            .with_graceful_shutdown(async move {
                let _ = plain_shutdown_rx.changed().await;
            })
            .await
    });

    let tls_task = if use_https {
        match try_start_tls(app, https_port, ssl_cert, ssl_key, shutdown_rx).await {
            Some(task) => Some(task),
            None => {
                warn!("continuing with plain HTTP only on PORT");
                None
            }
        }
    } else {
        None
    };

    shutdown_signal().await;
    info!("shutdown signal received, draining connections");
    let _ = shutdown_tx.send(true);

    let grace_period = Duration::from_secs(5);
    match tokio::time::timeout(grace_period, plain_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => error!(%err, "HTTP listener exited with an error"),
        Ok(Err(err)) => error!(%err, "HTTP listener task panicked"),
        Err(_) => {
            warn!("HTTP listener did not drain within the grace period");
            std::process::exit(1);
        }
    }

    if let Some(tls_task) = tls_task {
        if tokio::time::timeout(grace_period, tls_task).await.is_err() {
            warn!("HTTPS listener did not drain within the grace period");
            std::process::exit(1);
        }
    }
}

/// Attempts to bring up the HTTPS listener. Returns `None` on any setup
/// failure (bad cert/key, port already in use) after logging at `error`,
/// so the caller can fall back to serving plain HTTP only rather than
/// taking down the whole relay over a TLS misconfiguration (spec §7 "TLS
/// startup failure").
async fn try_start_tls(
    app: axum::Router,
    https_port: u16,
    ssl_cert: Option<String>,
    ssl_key: Option<String>,
    shutdown_rx: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let (cert, key) = match (ssl_cert, ssl_key) {
        (Some(cert), Some(key)) => (cert, key),
        _ => {
            error!("USE_HTTPS=true but SSL_CERT/SSL_KEY are missing");
            return None;
        }
    };
    let acceptor = match tls::build_tls_acceptor(&cert, &key) {
        Ok(acceptor) => acceptor,
        Err(err) => {
            error!(%err, "failed to build TLS acceptor");
            return None;
        }
    };
    let tls_addr = SocketAddr::from(([0, 0, 0, 0], https_port));
    let tls_listener = match TcpListener::bind(tls_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %tls_addr, "failed to bind HTTPS listener");
            return None;
        }
    };
    info!(addr = %tls_addr, "relay listening (https)");
    Some(tokio::spawn(serve_tls(app, tls_listener, acceptor, shutdown_rx)))
}

/// Accepts TLS connections and serves the same router as the plain
/// listener, manually bridging `tower`'s `Router` onto hyper's connection
/// I/O since `axum::serve` only drives plain `TcpListener`s. Grounded on
/// `aether-proxy`'s `proxy/server.rs` dual-stack accept loop.
async fn serve_tls(
    app: axum::Router,
    listener: TcpListener,
    acceptor: tokio_rustls::TlsAcceptor,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "failed to accept TLS connection");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let app = app.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(err) => {
                            debug!(%err, peer = %peer_addr, "TLS handshake failed");
                            return;
                        }
                    };
                    let io = TokioIo::new(tls_stream);
                    let service = TowerToHyperService::new(app);
                    if let Err(err) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!(%err, peer = %peer_addr, "connection closed with an error");
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                info!("https listener shutting down");
                break;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
