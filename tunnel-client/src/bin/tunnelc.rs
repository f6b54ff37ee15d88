//! # `tunnelc` — Tunnel Client CLI
//!
//! Replaces the teacher's Tauri desktop shell: parses configuration from
//! CLI flags/environment, runs the controller's reconnect loop, and prints
//! each lifecycle event to the terminal until interrupted.

use clap::Parser;
use tracing::info;
use tunnel_client::{Config, Controller, ControllerEvent};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tunnelc={}", config.log_level).into()),
        )
        .init();

    let controller = Controller::new(config);
    let mut events = controller.subscribe();

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    tokio::select! {
        _ = controller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    printer.abort();
}

fn print_event(event: &ControllerEvent) {
    match event {
        ControllerEvent::Connecting { attempt } => {
            println!("connecting... (attempt {attempt})");
        }
        ControllerEvent::Connected {
            subdomain,
            public_url,
            ..
        } => {
            println!("tunnel established: {public_url} (subdomain {subdomain})");
        }
        ControllerEvent::RequestServed {
            method,
            path,
            status,
        } => {
            println!("{method} {path} -> {status}");
        }
        ControllerEvent::RequestFailed { method, path, error } => {
            println!("{method} {path} -> failed: {error}");
        }
        ControllerEvent::Disconnected { reason } => {
            println!("disconnected: {reason}");
        }
        ControllerEvent::Reconnecting { attempt, delay_secs } => {
            println!("reconnecting in {delay_secs}s (attempt {attempt})");
        }
        ControllerEvent::GivingUp { attempts } => {
            println!("giving up after {attempts} attempts");
        }
    }
}
