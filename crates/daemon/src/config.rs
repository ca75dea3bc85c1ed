// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - Daemon Config Module
// Handles daemon configuration (listener, startup timing, provider binaries)
// and deployment-mode detection

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use public_tunnel_common::{format_host_port, is_loopback_address};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment flag set by the container image
pub const DOCKERIZED_ENV: &str = "DOCKERIZED";

/// Port served inside the container image
pub const CONTAINER_TARGET_PORT: u16 = 80;

/// Port of the local frontend dev server
pub const LOCAL_DEV_TARGET_PORT: u16 = 5173;

/// Where the daemon runs, which decides the local port to expose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    Containerized,
    LocalDev,
}

impl DeploymentMode {
    /// Detect the mode from the `DOCKERIZED` environment variable
    pub fn detect() -> Self {
        Self::from_flag(std::env::var(DOCKERIZED_ENV).ok().as_deref())
    }

    /// Only a case-insensitive "true" selects the containerized mode
    pub fn from_flag(value: Option<&str>) -> Self {
        match value {
            Some(flag) if flag.trim().eq_ignore_ascii_case("true") => {
                DeploymentMode::Containerized
            }
            _ => DeploymentMode::LocalDev,
        }
    }

    pub fn target_port(&self) -> u16 {
        match self {
            DeploymentMode::Containerized => CONTAINER_TARGET_PORT,
            DeploymentMode::LocalDev => LOCAL_DEV_TARGET_PORT,
        }
    }

    /// An explicit port always wins over the mode's default
    pub fn resolve_port(&self, explicit: Option<u16>) -> u16 {
        explicit.unwrap_or_else(|| self.target_port())
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Host the HTTP API binds to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Port the HTTP API binds to
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Permit binding the API to a non-loopback address.
    /// Needed inside containers, where the API is reached through port mapping.
    #[serde(default)]
    pub allow_remote_bind: bool,

    /// How long a create request waits for the provider to report a public URL
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Extra delay before a create request re-checks an unfinished tunnel
    #[serde(default = "default_create_grace_ms")]
    pub create_grace_ms: u64,

    /// Abort the connection attempt when the startup wait times out.
    /// When false, a late connection still becomes the active tunnel.
    #[serde(default)]
    pub cancel_on_timeout: bool,

    /// SSH client used for serveo tunnels
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    /// Serveo server to forward through
    #[serde(default = "default_serveo_host")]
    pub serveo_host: String,

    /// cloudflared executable
    #[serde(default = "default_cloudflared_binary")]
    pub cloudflared_binary: String,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    50080
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_create_grace_ms() -> u64 {
    2000
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_serveo_host() -> String {
    "serveo.net".to_string()
}

fn default_cloudflared_binary() -> String {
    "cloudflared".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
            allow_remote_bind: false,
            startup_timeout_secs: default_startup_timeout_secs(),
            create_grace_ms: default_create_grace_ms(),
            cancel_on_timeout: false,
            ssh_binary: default_ssh_binary(),
            serveo_host: default_serveo_host(),
            cloudflared_binary: default_cloudflared_binary(),
        }
    }
}

impl DaemonConfig {
    /// Validate the daemon configuration
    pub fn validate(&self) -> Result<()> {
        if !self.allow_remote_bind && !is_loopback_address(&self.bind_host) {
            anyhow::bail!(
                "Refusing to bind the tunnel API to non-loopback address {}.\n\
                 The API can expose local services to the internet and has no authentication.\n\
                 Set allow_remote_bind = true in daemon.toml if this is intended (e.g. in a container).",
                self.bind_host
            );
        }

        if self.startup_timeout_secs == 0 {
            anyhow::bail!("startup_timeout_secs must be greater than zero");
        }

        if self.serveo_host.trim().is_empty() {
            anyhow::bail!("serveo_host must not be empty");
        }

        Ok(())
    }

    /// Load daemon configuration from the default location,
    /// writing defaults on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("No daemon configuration found, using defaults");
            info!("Configuration will be saved to: {}", config_path.display());
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load and validate daemon configuration from a file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).context("Failed to read daemon configuration")?;

        let config: Self =
            toml::from_str(&contents).context("Failed to parse daemon configuration")?;

        config
            .validate()
            .context("Configuration validation failed")?;

        info!("Loaded daemon configuration from: {}", path.display());
        Ok(config)
    }

    /// Save daemon configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }

        let contents =
            toml::to_string_pretty(self).context("Failed to serialize daemon configuration")?;

        fs::write(path, contents).context("Failed to write daemon configuration")?;

        info!("Saved daemon configuration to: {}", path.display());
        Ok(())
    }

    /// Get the path to the daemon configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("public-tunnel").join("daemon.toml"))
    }

    pub fn bind_address(&self) -> String {
        format_host_port(&self.bind_host, self.bind_port)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn create_grace(&self) -> Duration {
        Duration::from_millis(self.create_grace_ms)
    }
}
