// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - Daemon Client Module
// Shared daemon connection logic for the CLI

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::network::format_host_port;
use crate::types::{ActionRequest, ActionResponse};

/// Covers the default startup wait plus the create grace delay;
/// the CLI lets `cli.toml` raise it
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Client configuration for connecting to the daemon
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DaemonClientConfig {
    /// Daemon host (e.g., "127.0.0.1")
    #[serde(default = "default_daemon_host")]
    pub daemon_host: String,

    /// Daemon port
    #[serde(default = "default_daemon_port")]
    pub daemon_port: u16,

    /// Full base URL override (e.g., "http://10.0.0.5:50080"); wins over host/port
    #[serde(default)]
    pub daemon_url: String,
}

fn default_daemon_host() -> String {
    "127.0.0.1".to_string()
}

fn default_daemon_port() -> u16 {
    50080
}

impl Default for DaemonClientConfig {
    fn default() -> Self {
        Self {
            daemon_host: default_daemon_host(),
            daemon_port: default_daemon_port(),
            daemon_url: String::new(),
        }
    }
}

impl DaemonClientConfig {
    /// Base URL of the daemon, without trailing slash
    pub fn daemon_base_url(&self) -> String {
        let url = self.daemon_url.trim().trim_end_matches('/');
        if url.is_empty() {
            return format!(
                "http://{}",
                format_host_port(&self.daemon_host, self.daemon_port)
            );
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("http://{}", url)
        }
    }

    pub fn tunnel_endpoint(&self) -> String {
        format!("{}/api/tunnel", self.daemon_base_url())
    }

    pub fn health_endpoint(&self) -> String {
        format!("{}/api/health", self.daemon_base_url())
    }
}

/// Create an HTTP client for talking to the daemon
pub fn create_daemon_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Post an action to the daemon's tunnel endpoint
pub async fn send_action(
    client: &Client,
    config: &DaemonClientConfig,
    request: &ActionRequest,
) -> Result<ActionResponse> {
    let url = config.tunnel_endpoint();
    debug!("POST {} action={}", url, request.action_name());

    let response = client.post(&url).json(request).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(Error::Daemon(format!(
            "{} returned {}: {}",
            url,
            status,
            body.trim()
        )));
    }

    Ok(serde_json::from_str(&body)?)
}

/// Check that the daemon answers its health endpoint
pub async fn check_health(client: &Client, config: &DaemonClientConfig) -> Result<bool> {
    let response = client.get(config.health_endpoint()).send().await?;
    if !response.status().is_success() {
        return Ok(false);
    }

    let body: ActionResponse = response.json().await?;
    Ok(body.success())
}
