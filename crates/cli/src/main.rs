// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - CLI Client
// Command-line interface for the tunnel daemon

mod config;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use public_tunnel_common::{
    check_health, create_daemon_client, send_action, ActionRequest, ActionResponse,
    DaemonClientConfig, Provider, TunnelAction,
};

use config::CliConfig;

#[derive(Parser)]
#[command(name = "public-tunnel")]
#[command(about = "Public Tunnel Manager CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon base URL, overriding cli.toml (e.g. http://127.0.0.1:50080)
    #[arg(long, global = true)]
    daemon_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a public tunnel, or show the running one
    Create {
        /// Tunnel provider (serveo or cloudflared)
        #[arg(short, long, default_value = "serveo")]
        provider: Provider,

        /// Local port to expose (default depends on the daemon's deployment mode)
        #[arg(short = 'P', long)]
        port: Option<u16>,
    },

    /// Stop the public tunnel
    Stop,

    /// Show the tunnel URL and state
    Status {
        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Check that the daemon is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load()?.with_daemon_url(cli.daemon_url);
    let timeout = config.request_timeout();
    let daemon = config.daemon_config;
    debug!(
        "Using daemon at {} (timeout {}s)",
        daemon.daemon_base_url(),
        timeout.as_secs()
    );
    let client = create_daemon_client(timeout)?;

    match cli.command {
        Commands::Create { provider, port } => create_tunnel(&client, &daemon, provider, port).await,
        Commands::Stop => stop_tunnel(&client, &daemon).await,
        Commands::Status { json } => show_status(&client, &daemon, json).await,
        Commands::Health => daemon_health(&client, &daemon).await,
    }
}

async fn create_tunnel(
    client: &Client,
    daemon: &DaemonClientConfig,
    provider: Provider,
    port: Option<u16>,
) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Starting {} tunnel...", provider));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = send_action(client, daemon, &ActionRequest::create(provider, port)).await;
    spinner.finish_and_clear();

    let response = result.with_context(|| daemon_unreachable(daemon))?;
    match &response {
        ActionResponse::Create(created) => match &created.tunnel_url {
            Some(url) => {
                println!("{}", format!("✓ {}", created.message).green().bold());
                println!("  Public URL: {}", url.cyan());
            }
            None => {
                println!("{}", created.message.yellow());
                println!(
                    "{}",
                    "  Run `public-tunnel status` to check whether it came up.".dimmed()
                );
            }
        },
        other => anyhow::bail!("Unexpected response from daemon: {:?}", other),
    }
    Ok(())
}

async fn stop_tunnel(client: &Client, daemon: &DaemonClientConfig) -> Result<()> {
    let response = send_action(client, daemon, &ActionRequest::new(TunnelAction::Stop))
        .await
        .with_context(|| daemon_unreachable(daemon))?;

    if !response.success() {
        anyhow::bail!("Daemon refused to stop the tunnel: {:?}", response);
    }
    println!("{}", "✓ Tunnel stopped".green().bold());
    Ok(())
}

async fn show_status(client: &Client, daemon: &DaemonClientConfig, json: bool) -> Result<()> {
    let response = send_action(client, daemon, &ActionRequest::new(TunnelAction::Get))
        .await
        .with_context(|| daemon_unreachable(daemon))?;

    let ActionResponse::Status(status) = response else {
        anyhow::bail!("Unexpected response from daemon: {:?}", response);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match (&status.tunnel_url, status.is_running) {
        (Some(url), true) => {
            println!("{} {}", "●".green(), "Tunnel running".bold());
            println!("  Public URL: {}", url.cyan());
        }
        _ => println!("{} {}", "○".dimmed(), "No tunnel running".bold()),
    }
    Ok(())
}

async fn daemon_health(client: &Client, daemon: &DaemonClientConfig) -> Result<()> {
    let healthy = check_health(client, daemon)
        .await
        .with_context(|| daemon_unreachable(daemon))?;

    if healthy {
        println!(
            "{} Daemon is healthy at {}",
            "✓".green().bold(),
            daemon.daemon_base_url()
        );
        Ok(())
    } else {
        anyhow::bail!("Daemon at {} reported unhealthy", daemon.daemon_base_url())
    }
}

fn daemon_unreachable(daemon: &DaemonClientConfig) -> String {
    format!(
        "Failed to reach daemon at {}. Is public-tunnel-daemon running?",
        daemon.daemon_base_url()
    )
}
