// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Network utility functions

use std::net::{IpAddr, Ipv6Addr};

/// Check if a bind host only accepts local connections
pub fn is_loopback_address(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    // Accept bracketed IPv6 as written in URLs ("[::1]")
    let host = host.trim_start_matches('[').trim_end_matches(']');
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        // Unparseable hostnames are treated as remote
        Err(_) => false,
    }
}

/// Join host and port, bracketing IPv6 literals
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
