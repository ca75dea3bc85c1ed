// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// In-memory provider clients for session and API tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use public_tunnel_common::{Error, Provider, Result};

use super::{ClientFactory, TunnelClient};

/// How every client built by a `ScriptedFactory` behaves on connect
#[derive(Clone)]
pub enum Script {
    /// Report `url` after `delay`
    Succeed { url: String, delay: Duration },
    /// Fail with `message` after `delay`
    Fail { message: String, delay: Duration },
    /// Report `url` once the gate is notified
    Gated { url: String, gate: Arc<Notify> },
    /// Never finish
    Hang,
}

impl Script {
    pub fn succeed(url: &str) -> Self {
        Script::Succeed {
            url: url.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn fail(message: &str) -> Self {
        Script::Fail {
            message: message.to_string(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
pub struct Counters {
    pub builds: Mutex<Vec<(Provider, u16)>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl Counters {
    pub fn builds(&self) -> Vec<(Provider, u16)> {
        self.builds.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub struct ScriptedFactory {
    script: Script,
    fail_disconnect: bool,
    pub counters: Arc<Counters>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            fail_disconnect: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn failing_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }
}

impl ClientFactory for ScriptedFactory {
    fn build(&self, provider: Provider, port: u16) -> Box<dyn TunnelClient> {
        self.counters.builds.lock().unwrap().push((provider, port));
        Box::new(ScriptedClient {
            provider,
            port,
            script: self.script.clone(),
            fail_disconnect: self.fail_disconnect,
            counters: self.counters.clone(),
        })
    }
}

struct ScriptedClient {
    provider: Provider,
    port: u16,
    script: Script,
    fail_disconnect: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl TunnelClient for ScriptedClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn port(&self) -> u16 {
        self.port
    }

    async fn connect(&mut self) -> Result<String> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Succeed { url, delay } => {
                tokio::time::sleep(*delay).await;
                Ok(url.clone())
            }
            Script::Fail { message, delay } => {
                tokio::time::sleep(*delay).await;
                Err(Error::Provider(message.clone()))
            }
            Script::Gated { url, gate } => {
                gate.notified().await;
                Ok(url.clone())
            }
            Script::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect {
            Err(Error::Provider("provider refused to disconnect".into()))
        } else {
            Ok(())
        }
    }
}
