// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - Daemon
// Exposes a local port to the internet through a public tunnel provider

mod api;
mod config;
mod pidfile;
mod provider;
mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::{create_router, TunnelRequestHandler};
use config::{DaemonConfig, DeploymentMode};
use provider::ProcessClientFactory;
use session::{SessionEvent, SessionOptions, TunnelSession};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "public_tunnel_daemon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Public Tunnel Manager Daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let pid_guard = pidfile::PidFileGuard::create()
        .context("Failed to create PID file - another daemon may already be running")?;

    let daemon_config = DaemonConfig::load()?;

    let deployment = DeploymentMode::detect();
    info!(
        "Deployment mode: {:?} (default target port {})",
        deployment,
        deployment.target_port()
    );

    let session = TunnelSession::new(
        Arc::new(ProcessClientFactory::from_config(&daemon_config)),
        deployment,
        SessionOptions {
            startup_timeout: daemon_config.startup_timeout(),
            cancel_on_timeout: daemon_config.cancel_on_timeout,
        },
    );

    let event_rx = session.subscribe();
    tokio::spawn(log_session_events(event_rx));

    let handler = Arc::new(TunnelRequestHandler::new(
        session,
        daemon_config.create_grace(),
    ));
    let shutdown_session = handler.session().clone();
    let app = create_router(handler);

    let bind_address = daemon_config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .context(format!("Failed to bind to {}", bind_address))?;

    info!("Daemon listening on {}", bind_address);
    info!("PID file: {}", pid_guard.path().display());
    info!("Daemon started successfully");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_session))
        .await
        .context("HTTP server error")?;

    info!("Daemon shut down");
    Ok(())
}

async fn log_session_events(mut event_rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match event_rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!("Session event: {}", json),
                Err(_) => info!("Session event: {:?}", event),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Session event log lagged, skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, then tear the tunnel down
async fn wait_for_shutdown(session: TunnelSession) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }

    session.shutdown().await;
}
