// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - Tunnel Session Module
// Owns the single public tunnel of this daemon: start, stop, status

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use public_tunnel_common::Provider;

use crate::config::DeploymentMode;
use crate::provider::{ClientFactory, TunnelClient};

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Timing behaviour of `TunnelSession::start`
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// How long `start` waits for the provider to report a URL
    pub startup_timeout: Duration,
    /// Abort the attempt when the wait times out instead of letting it finish
    pub cancel_on_timeout: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            cancel_on_timeout: false,
        }
    }
}

/// Snapshot of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub url: Option<String>,
    pub running: bool,
    pub provider: Option<Provider>,
    pub port: Option<u16>,
}

/// What `stop` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running
    Idle,
    /// The provider disconnected cleanly
    Stopped,
    /// The provider failed to disconnect; local state was cleared anyway
    DisconnectFailed(String),
}

impl StopOutcome {
    /// Boolean view of a stop: true only when a running tunnel went down cleanly
    pub fn is_stopped(&self) -> bool {
        matches!(self, StopOutcome::Stopped)
    }
}

/// Session lifecycle events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Starting {
        attempt: Uuid,
        provider: Provider,
        port: u16,
        timestamp: DateTime<Utc>,
    },
    Connected {
        attempt: Uuid,
        url: String,
        timestamp: DateTime<Utc>,
    },
    /// Connected after the caller of `start` stopped waiting
    LateConnected {
        attempt: Uuid,
        url: String,
        timestamp: DateTime<Utc>,
    },
    Failed {
        attempt: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Stopped {
        url: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

/// Result of one connection attempt, as seen by the waiting caller
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptState {
    Pending,
    Connected(String),
    Failed(String),
}

/// Connection attempt still running in the background
struct PendingAttempt {
    id: Uuid,
    handle: JoinHandle<()>,
    /// Cleared once the caller of `start` gave up waiting
    awaited: bool,
}

#[derive(Default)]
struct SessionState {
    provider: Option<Provider>,
    port: Option<u16>,
    public_url: Option<String>,
    running: bool,
    client: Option<Box<dyn TunnelClient>>,
    attempt: Option<PendingAttempt>,
}

impl SessionState {
    fn is_current(&self, attempt: Uuid) -> bool {
        self.attempt.as_ref().is_some_and(|a| a.id == attempt)
    }

    fn take_attempt(&mut self, attempt: Uuid) -> Option<PendingAttempt> {
        if self.is_current(attempt) {
            self.attempt.take()
        } else {
            None
        }
    }

    fn clear(&mut self) {
        self.provider = None;
        self.port = None;
        self.public_url = None;
        self.running = false;
    }
}

struct SessionInner {
    state: RwLock<SessionState>,
    /// Serializes start and stop
    lifecycle: Mutex<()>,
    /// Set once by `shutdown`; no attempt may start afterwards
    shutting_down: AtomicBool,
    factory: Arc<dyn ClientFactory>,
    deployment: DeploymentMode,
    options: SessionOptions,
    event_tx: broadcast::Sender<SessionEvent>,
}

/// The daemon's single public tunnel
#[derive(Clone)]
pub struct TunnelSession {
    inner: Arc<SessionInner>,
}

impl TunnelSession {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        deployment: DeploymentMode,
        options: SessionOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(SessionInner {
                state: RwLock::new(SessionState::default()),
                lifecycle: Mutex::new(()),
                shutting_down: AtomicBool::new(false),
                factory,
                deployment,
                options,
                event_tx,
            }),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start a tunnel or return the running one's URL.
    ///
    /// `port` defaults to the deployment mode's target port. Returns `None`
    /// when the provider failed or did not report a URL within the startup
    /// timeout; in the latter case the attempt keeps running unless
    /// `cancel_on_timeout` is set.
    pub async fn start(&self, port: Option<u16>, provider: Provider) -> Option<String> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        {
            let state = self.inner.state.read().await;
            if state.running {
                if let Some(url) = &state.public_url {
                    info!("Tunnel already running: {}", url);
                    return Some(url.clone());
                }
            }
        }

        let port = self.inner.deployment.resolve_port(port);
        let attempt = Uuid::new_v4();
        let (result_tx, mut result_rx) = watch::channel(AttemptState::Pending);

        {
            let mut state = self.inner.state.write().await;

            // Checked under the state lock: `shutdown` raises the flag before
            // taking it, so either we see the flag or it sees our attempt
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                info!("Session is shutting down, not starting a {} tunnel", provider);
                return None;
            }

            let client = self.inner.factory.build(provider, port);

            if let Some(stale) = state.attempt.take() {
                warn!("Tearing down stale tunnel attempt {}", stale.id);
                stale.handle.abort();
            }

            state.clear();
            state.provider = Some(provider);
            state.port = Some(port);

            // The attempt cannot record its result before it is registered,
            // since it needs this write lock to do so
            let handle = tokio::spawn(self.clone().run_attempt(attempt, client, result_tx));
            state.attempt = Some(PendingAttempt {
                id: attempt,
                handle,
                awaited: true,
            });
        }

        info!("Starting {} tunnel on port {} (attempt {})", provider, port, attempt);
        self.emit(SessionEvent::Starting {
            attempt,
            provider,
            port,
            timestamp: Utc::now(),
        });

        self.wait_for_attempt(attempt, &mut result_rx).await
    }

    /// Stop the running tunnel.
    ///
    /// Local state is cleared even when the provider fails to disconnect.
    pub async fn stop(&self) -> StopOutcome {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await
    }

    /// Body of `stop`; the caller holds the lifecycle lock
    async fn stop_locked(&self) -> StopOutcome {
        let (client, url) = {
            let mut state = self.inner.state.write().await;
            if !state.running {
                return StopOutcome::Idle;
            }
            let client = state.client.take();
            let url = state.public_url.clone();
            state.clear();
            (client, url)
        };

        info!("Stopping tunnel {}", url.as_deref().unwrap_or("<unknown>"));

        let outcome = match client {
            Some(mut client) => match client.disconnect().await {
                Ok(()) => StopOutcome::Stopped,
                Err(e) => {
                    error!("Failed to disconnect tunnel: {}", e);
                    StopOutcome::DisconnectFailed(e.to_string())
                }
            },
            None => StopOutcome::Stopped,
        };

        self.emit(SessionEvent::Stopped {
            url,
            timestamp: Utc::now(),
        });
        outcome
    }

    /// Public URL of the running tunnel
    pub async fn get_url(&self) -> Option<String> {
        let state = self.inner.state.read().await;
        if state.running {
            state.public_url.clone()
        } else {
            None
        }
    }

    pub async fn get_status(&self) -> SessionStatus {
        let state = self.inner.state.read().await;
        SessionStatus {
            url: state.public_url.clone(),
            running: state.running,
            provider: state.provider,
            port: state.port,
        }
    }

    /// Abort any in-flight attempt and stop the running tunnel.
    ///
    /// Later `start` calls return `None` without spawning anything.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        // Aborting first releases a `start` blocked on the attempt, which
        // holds the lifecycle lock we need next
        self.abort_pending().await;

        // Starts queued ahead of us see the flag and return at once
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.abort_pending().await;

        match self.stop_locked().await {
            StopOutcome::Idle => debug!("No tunnel running at shutdown"),
            StopOutcome::Stopped => info!("Tunnel stopped"),
            StopOutcome::DisconnectFailed(e) => warn!("Tunnel did not stop cleanly: {}", e),
        }
    }

    async fn abort_pending(&self) {
        let pending = {
            let mut state = self.inner.state.write().await;
            let pending = state.attempt.take();
            if pending.is_some() {
                state.clear();
            }
            pending
        };
        if let Some(pending) = pending {
            info!("Aborting tunnel attempt {}", pending.id);
            pending.handle.abort();
        }
    }

    async fn run_attempt(
        self,
        attempt: Uuid,
        mut client: Box<dyn TunnelClient>,
        result_tx: watch::Sender<AttemptState>,
    ) {
        let result = client.connect().await;
        let mut state = self.inner.state.write().await;

        match result {
            Ok(url) => {
                let Some(pending) = state.take_attempt(attempt) else {
                    drop(state);
                    warn!("Discarding superseded tunnel attempt {}", attempt);
                    if let Err(e) = client.disconnect().await {
                        debug!("Failed to disconnect superseded attempt {}: {}", attempt, e);
                    }
                    let _ = result_tx.send(AttemptState::Failed("superseded".to_string()));
                    return;
                };

                state.provider = Some(client.provider());
                state.port = Some(client.port());
                state.public_url = Some(url.clone());
                state.running = true;
                state.client = Some(client);
                drop(state);

                let timestamp = Utc::now();
                if pending.awaited {
                    info!("Tunnel started successfully: {}", url);
                    self.emit(SessionEvent::Connected {
                        attempt,
                        url: url.clone(),
                        timestamp,
                    });
                } else {
                    warn!(
                        "Tunnel attempt {} connected after the startup wait elapsed: {}",
                        attempt, url
                    );
                    self.emit(SessionEvent::LateConnected {
                        attempt,
                        url: url.clone(),
                        timestamp,
                    });
                }
                let _ = result_tx.send(AttemptState::Connected(url));
            }
            Err(e) => {
                if state.is_current(attempt) {
                    state.attempt = None;
                    state.clear();
                }
                drop(state);

                error!("Error in tunnel attempt {}: {}", attempt, e);
                if let Err(err) = client.disconnect().await {
                    debug!("Cleanup after failed attempt {} failed: {}", attempt, err);
                }

                self.emit(SessionEvent::Failed {
                    attempt,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                let _ = result_tx.send(AttemptState::Failed(e.to_string()));
            }
        }
    }

    async fn wait_for_attempt(
        &self,
        attempt: Uuid,
        result_rx: &mut watch::Receiver<AttemptState>,
    ) -> Option<String> {
        let timeout = self.inner.options.startup_timeout;
        let started = Instant::now();

        let completion = result_rx.wait_for(|s| *s != AttemptState::Pending);
        tokio::pin!(completion);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut progress =
            tokio::time::interval_at(started + PROGRESS_LOG_INTERVAL, PROGRESS_LOG_INTERVAL);

        loop {
            tokio::select! {
                result = &mut completion => {
                    let outcome = result.map(|s| (*s).clone());
                    return match outcome {
                        Ok(AttemptState::Connected(url)) => Some(url),
                        Ok(AttemptState::Failed(reason)) => {
                            warn!("Tunnel attempt {} failed: {}", attempt, reason);
                            None
                        }
                        Ok(AttemptState::Pending) => None,
                        // Sender dropped without a result: the attempt was aborted
                        Err(_) => {
                            info!("Tunnel attempt {} was aborted", attempt);
                            None
                        }
                    };
                }
                _ = progress.tick() => {
                    info!(
                        "Tunnel starting... ({:.1}s elapsed)",
                        started.elapsed().as_secs_f64()
                    );
                }
                _ = &mut deadline => break,
            }
        }

        warn!(
            "Tunnel failed to start within {} seconds",
            timeout.as_secs_f64()
        );

        let mut state = self.inner.state.write().await;
        if !state.is_current(attempt) {
            // Finished while the lock was contended
            return if state.running { state.public_url.clone() } else { None };
        }
        if self.inner.options.cancel_on_timeout {
            if let Some(pending) = state.take_attempt(attempt) {
                info!("Cancelling tunnel attempt {}", attempt);
                pending.handle.abort();
                state.clear();
            }
        } else if let Some(pending) = state.attempt.as_mut().filter(|a| a.id == attempt) {
            pending.awaited = false;
        }
        None
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.inner.event_tx.send(event) {
            debug!("No subscribers for session event: {:?}", e.0);
        }
    }
}
