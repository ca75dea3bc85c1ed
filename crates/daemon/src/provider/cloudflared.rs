// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Cloudflare quick tunnel provider
// Uses `cloudflared tunnel --url`, which hands out a random trycloudflare.com URL

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::info;

use public_tunnel_common::{Error, Provider, Result};

use super::{extract_https_url, launch, terminate, TunnelClient, UrlStream};

/// Cloudflare quick tunnel backed by the `cloudflared` binary
pub struct CloudflaredTunnel {
    port: u16,
    verbose: bool,
    binary: String,
    child: Option<Child>,
}

impl CloudflaredTunnel {
    pub fn new(port: u16, verbose: bool) -> Self {
        Self {
            port,
            verbose,
            binary: "cloudflared".to_string(),
            child: None,
        }
    }

    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("tunnel")
            .arg("--no-autoupdate")
            .arg("--url")
            .arg(format!("http://localhost:{}", self.port));
        cmd
    }
}

/// Extract the quick tunnel URL from a line of `cloudflared` output.
///
/// cloudflared prints it inside an ASCII box on stderr:
/// `INF |  https://random-slug.trycloudflare.com  |`
pub fn extract_cloudflared_url(line: &str) -> Option<String> {
    extract_https_url(line, &[".trycloudflare.com"])
        .filter(|url| !url.starts_with("https://api.trycloudflare.com"))
}

#[async_trait]
impl TunnelClient for CloudflaredTunnel {
    fn provider(&self) -> Provider {
        Provider::Cloudflared
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn connect(&mut self) -> Result<String> {
        if self.child.is_some() {
            return Err(Error::Provider("Cloudflare tunnel already running".into()));
        }

        info!("Starting cloudflared quick tunnel on port {}", self.port);
        let (child, url) = launch(
            self.command(),
            Provider::Cloudflared,
            UrlStream::Stderr,
            extract_cloudflared_url,
            self.verbose,
        )
        .await?;

        info!("Cloudflare tunnel active: {}", url);
        self.child = Some(child);
        Ok(url)
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self.child.take() {
            Some(mut child) => terminate(&mut child, Provider::Cloudflared).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_cloudflared_url_positive() {
        let line = r#"2024-01-15T10:00:00Z INF +--------------------------------------------+"#;
        assert!(extract_cloudflared_url(line).is_none());

        let line = r#"2024-01-15T10:00:00Z INF |  https://random-slug.trycloudflare.com   |"#;
        assert_eq!(
            extract_cloudflared_url(line).as_deref(),
            Some("https://random-slug.trycloudflare.com")
        );
    }

    #[test]
    fn test_extract_cloudflared_url_negative() {
        assert!(extract_cloudflared_url("Requesting new quick Tunnel on trycloudflare.com...").is_none());
        assert!(extract_cloudflared_url("POST https://api.trycloudflare.com/tunnel").is_none());
        assert!(extract_cloudflared_url("https://example.com").is_none());
        assert!(extract_cloudflared_url("http://abc.trycloudflare.com").is_none());
    }

    #[test]
    fn test_command_targets_local_port() {
        let tunnel = CloudflaredTunnel::new(80, true).with_binary("/opt/cloudflared");
        let cmd = tunnel.command();
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "/opt/cloudflared");

        let args: Vec<String> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args.last().map(String::as_str), Some("http://localhost:80"));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let mut tunnel = CloudflaredTunnel::new(5173, false);
        assert!(tunnel.disconnect().await.is_ok());
        assert!(tunnel.child.is_none());
    }
}
