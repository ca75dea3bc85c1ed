// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - Common Library
// Wire types, errors, and the daemon client shared by daemon and CLI

pub mod daemon_client;
pub mod error;
pub mod network;
pub mod types;

pub use daemon_client::{
    check_health, create_daemon_client, send_action, DaemonClientConfig,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{Error, Result};
pub use network::{format_host_port, is_loopback_address};
pub use types::{
    AckResponse, ActionRequest, ActionResponse, CreateResponse, ErrorResponse, Provider,
    StatusResponse, TunnelAction, INVALID_ACTION_MESSAGE, TUNNEL_CREATED_MESSAGE,
    TUNNEL_IN_PROGRESS_MESSAGE,
};
