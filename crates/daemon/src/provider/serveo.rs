// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Serveo tunnel provider
// SSH remote forwarding through serveo.net; no account or key required

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::info;

use public_tunnel_common::{Error, Provider, Result};

use super::{extract_https_url, launch, terminate, TunnelClient, UrlStream};

/// Hosts serveo hands out public URLs on
const SERVEO_DOMAINS: &[&str] = &[".serveo.net", ".serveousercontent.com"];

/// Serveo tunnel backed by the system `ssh` client
pub struct ServeoTunnel {
    port: u16,
    ssh_binary: String,
    serveo_host: String,
    child: Option<Child>,
}

impl ServeoTunnel {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ssh_binary: "ssh".to_string(),
            serveo_host: "serveo.net".to_string(),
            child: None,
        }
    }

    pub fn with_ssh(mut self, ssh_binary: &str, serveo_host: &str) -> Self {
        self.ssh_binary = ssh_binary.to_string();
        self.serveo_host = serveo_host.to_string();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.arg("-T")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("ServerAliveInterval=60")
            .arg("-o")
            .arg("ExitOnForwardFailure=yes")
            .arg("-R")
            .arg(format!("80:localhost:{}", self.port))
            .arg(&self.serveo_host);
        cmd
    }
}

/// Extract the public URL from a line of serveo output,
/// e.g. "Forwarding HTTP traffic from https://abc.serveo.net"
pub fn extract_serveo_url(line: &str) -> Option<String> {
    extract_https_url(line, SERVEO_DOMAINS)
}

#[async_trait]
impl TunnelClient for ServeoTunnel {
    fn provider(&self) -> Provider {
        Provider::Serveo
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn connect(&mut self) -> Result<String> {
        if self.child.is_some() {
            return Err(Error::Provider("Serveo tunnel already running".into()));
        }

        info!(
            "Starting serveo tunnel to {} for local port {}",
            self.serveo_host, self.port
        );
        let (child, url) = launch(
            self.command(),
            Provider::Serveo,
            UrlStream::Stdout,
            extract_serveo_url,
            false,
        )
        .await?;

        info!("Serveo tunnel active: {}", url);
        self.child = Some(child);
        Ok(url)
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self.child.take() {
            Some(mut child) => terminate(&mut child, Provider::Serveo).await,
            None => Ok(()),
        }
    }
}
