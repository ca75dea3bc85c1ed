// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - Provider Module
// Clients for the external tunnel providers (serveo, cloudflared)
//
// Each client drives the provider's own CLI as a child process and scrapes
// the public URL from its output. The session only sees the TunnelClient
// trait, so tests can substitute scripted clients.

pub mod cloudflared;
pub mod serveo;

#[cfg(test)]
pub mod scripted;

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use public_tunnel_common::{Error, Provider, Result};

use crate::config::DaemonConfig;

pub use cloudflared::CloudflaredTunnel;
pub use serveo::ServeoTunnel;

/// A single tunnel to one provider.
///
/// Lifecycle: `connect()` until a public URL is known, then `disconnect()`.
#[async_trait]
pub trait TunnelClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Local port exposed by this client
    fn port(&self) -> u16;

    /// Establish the tunnel and return its public URL.
    ///
    /// Blocks until the provider reports the URL or gives up.
    async fn connect(&mut self) -> Result<String>;

    /// Tear the tunnel down
    async fn disconnect(&mut self) -> Result<()>;
}

/// Builds provider clients for the session
pub trait ClientFactory: Send + Sync {
    fn build(&self, provider: Provider, port: u16) -> Box<dyn TunnelClient>;
}

/// Factory producing process-backed clients from the daemon configuration
#[derive(Debug, Clone)]
pub struct ProcessClientFactory {
    ssh_binary: String,
    serveo_host: String,
    cloudflared_binary: String,
}

impl ProcessClientFactory {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            ssh_binary: config.ssh_binary.clone(),
            serveo_host: config.serveo_host.clone(),
            cloudflared_binary: config.cloudflared_binary.clone(),
        }
    }
}

impl ClientFactory for ProcessClientFactory {
    fn build(&self, provider: Provider, port: u16) -> Box<dyn TunnelClient> {
        match provider {
            Provider::Serveo => Box::new(
                ServeoTunnel::new(port).with_ssh(&self.ssh_binary, &self.serveo_host),
            ),
            Provider::Cloudflared => Box::new(
                CloudflaredTunnel::new(port, true).with_binary(&self.cloudflared_binary),
            ),
        }
    }
}

/// Which child pipe announces the public URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UrlStream {
    Stdout,
    Stderr,
}

type OutputPipe = Box<dyn AsyncRead + Unpin + Send>;

/// Spawn a provider process and wait for it to print a public URL.
///
/// The other pipe, and the URL pipe once the URL is found, keep being
/// drained in the background so the child never blocks on a full pipe.
/// Stdin stays open for the lifetime of the child; ssh treats EOF on
/// stdin as the end of the session.
pub(crate) async fn launch(
    mut command: Command,
    provider: Provider,
    url_stream: UrlStream,
    extract: fn(&str) -> Option<String>,
    verbose: bool,
) -> Result<(Child, String)> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let binary = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = command.spawn().map_err(|source| Error::Spawn {
        binary: binary.clone(),
        source,
    })?;

    let stdout: OutputPipe = Box::new(
        child
            .stdout
            .take()
            .ok_or_else(|| Error::Provider(format!("Failed to capture {} stdout", binary)))?,
    );
    let stderr: OutputPipe = Box::new(
        child
            .stderr
            .take()
            .ok_or_else(|| Error::Provider(format!("Failed to capture {} stderr", binary)))?,
    );

    let (announcing, other) = match url_stream {
        UrlStream::Stdout => (stdout, stderr),
        UrlStream::Stderr => (stderr, stdout),
    };
    drain_output(BufReader::new(other).lines(), provider, verbose);

    let mut lines = BufReader::new(announcing).lines();
    while let Some(line) = lines.next_line().await? {
        log_output(provider, verbose, &line);
        if let Some(url) = extract(&line) {
            drain_output(lines, provider, verbose);
            return Ok((child, url));
        }
    }

    let status = child.wait().await?;
    Err(Error::Provider(format!(
        "{} exited ({}) without providing a tunnel URL",
        binary, status
    )))
}

/// Kill and reap a provider process
pub(crate) async fn terminate(child: &mut Child, provider: Provider) -> Result<()> {
    info!("Stopping {} tunnel process", provider);
    match child.kill().await {
        Ok(()) => Ok(()),
        // Already exited on its own
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
            debug!("{} process had already exited", provider);
            Ok(())
        }
        Err(e) => Err(Error::Provider(format!(
            "Failed to stop {} process: {}",
            provider, e
        ))),
    }
}

fn drain_output<R>(mut lines: Lines<BufReader<R>>, provider: Provider, verbose: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            log_output(provider, verbose, &line);
        }
    });
}

fn log_output(provider: Provider, verbose: bool, line: &str) {
    if verbose {
        info!(target: "provider_output", %provider, "{}", line);
    } else {
        debug!(target: "provider_output", %provider, "{}", line);
    }
}

/// Find the first `https://` URL in a line whose host ends with one of
/// `domains` (each given with its leading dot).
pub(crate) fn extract_https_url(line: &str, domains: &[&str]) -> Option<String> {
    let mut rest = line;
    while let Some(start) = rest.find("https://") {
        let candidate = &rest[start..];
        let end = candidate
            .find(|c: char| {
                c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '|' | '<' | '>')
            })
            .unwrap_or(candidate.len());
        let url = candidate[..end].trim_end_matches(|c: char| matches!(c, ',' | '.' | ')' | ']'));

        let host = url["https://".len()..]
            .split(|c| c == '/' || c == ':')
            .next()
            .unwrap_or_default();
        if domains.iter().any(|domain| host.ends_with(domain)) {
            return Some(url.to_string());
        }

        rest = &candidate["https://".len()..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_https_url_picks_matching_host() {
        let line = "see https://docs.example.com then https://abc.serveo.net/path ok";
        assert_eq!(
            extract_https_url(line, &[".serveo.net"]),
            Some("https://abc.serveo.net/path".to_string())
        );
    }

    #[test]
    fn test_extract_https_url_stops_at_ansi_codes() {
        let line = "Forwarding HTTP traffic from \u{1b}[32mhttps://abc.serveo.net\u{1b}[0m";
        assert_eq!(
            extract_https_url(line, &[".serveo.net"]),
            Some("https://abc.serveo.net".to_string())
        );
    }

    #[test]
    fn test_extract_https_url_trims_punctuation() {
        let line = "Visit it at (https://quiet-lake.trycloudflare.com).";
        assert_eq!(
            extract_https_url(line, &[".trycloudflare.com"]),
            Some("https://quiet-lake.trycloudflare.com".to_string())
        );
    }

    #[test]
    fn test_extract_https_url_rejects_lookalike_hosts() {
        assert_eq!(
            extract_https_url("https://serveo.net.evil.com", &[".serveo.net"]),
            None
        );
        assert_eq!(extract_https_url("http://abc.serveo.net", &[".serveo.net"]), None);
        assert_eq!(extract_https_url("", &[".serveo.net"]), None);
    }

    #[test]
    fn test_factory_builds_requested_provider() {
        let factory = ProcessClientFactory::from_config(&DaemonConfig::default());

        let serveo = factory.build(Provider::Serveo, 5173);
        assert_eq!(serveo.provider(), Provider::Serveo);
        assert_eq!(serveo.port(), 5173);

        let cloudflared = factory.build(Provider::Cloudflared, 80);
        assert_eq!(cloudflared.provider(), Provider::Cloudflared);
        assert_eq!(cloudflared.port(), 80);
    }

    #[tokio::test]
    async fn test_launch_missing_binary_is_spawn_error() {
        let command = Command::new("public_tunnel_nonexistent_binary_12345");
        let result = launch(
            command,
            Provider::Serveo,
            UrlStream::Stdout,
            |line| extract_https_url(line, &[".serveo.net"]),
            false,
        )
        .await;
        assert!(matches!(result, Err(Error::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_reads_url_from_output() {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("echo starting; echo 'Forwarding HTTP traffic from https://demo.serveo.net'; sleep 5");
        let (mut child, url) = launch(
            command,
            Provider::Serveo,
            UrlStream::Stdout,
            |line| extract_https_url(line, &[".serveo.net"]),
            false,
        )
        .await
        .unwrap();

        assert_eq!(url, "https://demo.serveo.net");
        terminate(&mut child, Provider::Serveo).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_exit_without_url_is_provider_error() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo 'connection refused' >&2; exit 3");
        let result = launch(
            command,
            Provider::Cloudflared,
            UrlStream::Stderr,
            |line| extract_https_url(line, &[".trycloudflare.com"]),
            true,
        )
        .await;

        match result {
            Err(Error::Provider(msg)) => assert!(msg.contains("without providing a tunnel URL")),
            other => panic!("expected provider error, got {:?}", other.map(|(_, url)| url)),
        }
    }
}
