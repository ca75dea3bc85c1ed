// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Common types for Public Tunnel Manager
// Wire format of the tunnel action endpoint

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

pub const INVALID_ACTION_MESSAGE: &str = "Invalid action. Use 'create', 'stop', or 'get'.";
pub const TUNNEL_CREATED_MESSAGE: &str = "Tunnel created successfully";
pub const TUNNEL_IN_PROGRESS_MESSAGE: &str = "Tunnel creation in progress";

/// External tunnel backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// SSH reverse forwarding through serveo.net
    #[default]
    Serveo,
    /// Cloudflare quick tunnel via the `cloudflared` binary
    Cloudflared,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Serveo => "serveo",
            Provider::Cloudflared => "cloudflared",
        }
    }

    /// Resolve the provider named in an action request.
    ///
    /// Only the exact string `cloudflared` selects Cloudflare; anything
    /// else, including a missing value, falls back to serveo. Unlike
    /// `FromStr` this is case-sensitive.
    pub fn from_request(value: Option<&str>) -> Self {
        match value {
            Some("cloudflared") => Provider::Cloudflared,
            None | Some("") | Some("serveo") => Provider::Serveo,
            Some(name) => {
                warn!("Unknown tunnel provider '{}', falling back to serveo", name);
                Provider::Serveo
            }
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("serveo") {
            Ok(Provider::Serveo)
        } else if s.eq_ignore_ascii_case("cloudflared") {
            Ok(Provider::Cloudflared)
        } else {
            Err(Error::Config(format!(
                "Unknown tunnel provider '{}'. Supported: serveo, cloudflared",
                s
            )))
        }
    }
}

/// Actions understood by the tunnel endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelAction {
    Health,
    Create,
    Stop,
    Get,
}

impl TunnelAction {
    /// Returns `None` for unrecognized action strings
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "health" => Some(TunnelAction::Health),
            "create" => Some(TunnelAction::Create),
            "stop" => Some(TunnelAction::Stop),
            "get" => Some(TunnelAction::Get),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelAction::Health => "health",
            TunnelAction::Create => "create",
            TunnelAction::Stop => "stop",
            TunnelAction::Get => "get",
        }
    }
}

/// Body of a request to the tunnel endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Local port override for `create`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ActionRequest {
    pub fn new(action: TunnelAction) -> Self {
        Self {
            action: Some(action.as_str().to_string()),
            ..Default::default()
        }
    }

    pub fn create(provider: Provider, port: Option<u16>) -> Self {
        Self {
            action: Some(TunnelAction::Create.as_str().to_string()),
            provider: Some(provider.as_str().to_string()),
            port,
        }
    }

    /// Requested action name; a missing action means `get`
    pub fn action_name(&self) -> &str {
        self.action.as_deref().unwrap_or("get")
    }
}

/// Plain acknowledgement, used by `health` and `stop`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckResponse {
    pub success: bool,
}

/// Result of a `create` action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateResponse {
    pub success: bool,
    pub tunnel_url: Option<String>,
    pub message: String,
}

/// Result of a `get` action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub success: bool,
    pub tunnel_url: Option<String>,
    pub is_running: bool,
}

/// Rejected request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Any response of the tunnel endpoint.
///
/// Variant order matters for deserialization: the most specific shapes are
/// tried first and `Ack` matches any body carrying `success`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ActionResponse {
    Create(CreateResponse),
    Status(StatusResponse),
    Error(ErrorResponse),
    Ack(AckResponse),
}

impl ActionResponse {
    pub fn ack() -> Self {
        ActionResponse::Ack(AckResponse { success: true })
    }

    pub fn invalid_action() -> Self {
        ActionResponse::Error(ErrorResponse {
            success: false,
            error: INVALID_ACTION_MESSAGE.to_string(),
        })
    }

    pub fn created(tunnel_url: Option<String>) -> Self {
        let message = if tunnel_url.is_some() {
            TUNNEL_CREATED_MESSAGE
        } else {
            TUNNEL_IN_PROGRESS_MESSAGE
        };
        ActionResponse::Create(CreateResponse {
            success: tunnel_url.is_some(),
            tunnel_url,
            message: message.to_string(),
        })
    }

    pub fn status(tunnel_url: Option<String>, is_running: bool) -> Self {
        ActionResponse::Status(StatusResponse {
            success: tunnel_url.is_some(),
            tunnel_url,
            is_running,
        })
    }

    pub fn success(&self) -> bool {
        match self {
            ActionResponse::Create(r) => r.success,
            ActionResponse::Status(r) => r.success,
            ActionResponse::Error(r) => r.success,
            ActionResponse::Ack(r) => r.success,
        }
    }

    pub fn tunnel_url(&self) -> Option<&str> {
        match self {
            ActionResponse::Create(r) => r.tunnel_url.as_deref(),
            ActionResponse::Status(r) => r.tunnel_url.as_deref(),
            _ => None,
        }
    }
}
