// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - CLI Config Module
// Where the CLI finds the daemon; request logic lives in public-tunnel-common

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub use public_tunnel_common::DaemonClientConfig;
use public_tunnel_common::DEFAULT_REQUEST_TIMEOUT;

/// CLI configuration (wrapper around DaemonClientConfig with file I/O)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub daemon_config: DaemonClientConfig,

    /// HTTP timeout for daemon requests. Must exceed the daemon's
    /// `startup_timeout_secs` plus `create_grace_ms`, or slow creates
    /// fail here while the daemon keeps going.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            daemon_config: DaemonClientConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl CliConfig {
    /// Load CLI configuration, falling back to defaults when no file exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).context("Failed to read CLI configuration")?;
        let config: Self =
            toml::from_str(&contents).context("Failed to parse CLI configuration")?;

        if config.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `--daemon-url` beats whatever the file says
    pub fn with_daemon_url(mut self, daemon_url: Option<String>) -> Self {
        if let Some(url) = daemon_url {
            self.daemon_config.daemon_url = url;
        }
        self
    }

    /// Get the path to the CLI configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("public-tunnel").join("cli.toml"))
    }
}
