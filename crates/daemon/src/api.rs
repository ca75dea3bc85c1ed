// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Public Tunnel Manager Contributors

// Public Tunnel Manager - REST API Module
// Single action endpoint controlling the tunnel session

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use public_tunnel_common::{ActionRequest, ActionResponse, Provider, TunnelAction};

use crate::session::{StopOutcome, TunnelSession};

/// Maps action requests onto the tunnel session
pub struct TunnelRequestHandler {
    session: TunnelSession,
    /// Extra wait before re-checking the URL when `create` comes back empty
    create_grace: Duration,
}

impl TunnelRequestHandler {
    pub fn new(session: TunnelSession, create_grace: Duration) -> Self {
        Self {
            session,
            create_grace,
        }
    }

    pub fn session(&self) -> &TunnelSession {
        &self.session
    }

    /// Handle one request. Never fails; problems are reported in the body.
    pub async fn handle(&self, request: ActionRequest) -> ActionResponse {
        let Some(action) = TunnelAction::parse(request.action_name()) else {
            warn!("Rejected unknown action: {}", request.action_name());
            return ActionResponse::invalid_action();
        };

        match action {
            TunnelAction::Health => ActionResponse::ack(),
            TunnelAction::Create => self.create(&request).await,
            TunnelAction::Stop => {
                let outcome = self.session.stop().await;
                match &outcome {
                    StopOutcome::Idle => info!("Stop requested but no tunnel is running"),
                    StopOutcome::Stopped => info!("Tunnel stopped"),
                    StopOutcome::DisconnectFailed(e) => {
                        warn!("Tunnel stopped with disconnect error: {}", e)
                    }
                }
                // Callers only ever see an acknowledgement, whatever the outcome
                debug!("Stop result: stopped={}", outcome.is_stopped());
                ActionResponse::ack()
            }
            TunnelAction::Get => {
                let status = self.session.get_status().await;
                let url = if status.running { status.url } else { None };
                ActionResponse::status(url, status.running)
            }
        }
    }

    async fn create(&self, request: &ActionRequest) -> ActionResponse {
        let provider = Provider::from_request(request.provider.as_deref());
        // Without an explicit port the session uses its deployment mode's
        let mut url = self.session.start(request.port, provider).await;
        if url.is_none() {
            info!(
                "Tunnel not ready, checking again in {}ms",
                self.create_grace.as_millis()
            );
            tokio::time::sleep(self.create_grace).await;
            url = self.session.get_url().await;
        }

        ActionResponse::created(url)
    }
}

/// Create the API router
pub fn create_router(handler: Arc<TunnelRequestHandler>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tunnel", post(tunnel_action))
        .route("/tunnel", post(tunnel_action))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

/// Health check endpoint
async fn health() -> Json<ActionResponse> {
    Json(ActionResponse::ack())
}

async fn tunnel_action(
    State(handler): State<Arc<TunnelRequestHandler>>,
    Json(request): Json<ActionRequest>,
) -> Json<ActionResponse> {
    info!("Tunnel action requested: {}", request.action_name());
    Json(handler.handle(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentMode;
    use crate::provider::scripted::{Script, ScriptedFactory};
    use crate::session::SessionOptions;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use public_tunnel_common::INVALID_ACTION_MESSAGE;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const URL: &str = "https://bright-owl.trycloudflare.com";

    fn handler_with(factory: ScriptedFactory, options: SessionOptions) -> TunnelRequestHandler {
        let session = TunnelSession::new(Arc::new(factory), DeploymentMode::LocalDev, options);
        TunnelRequestHandler::new(session, Duration::from_millis(20))
    }

    fn request(action: &str) -> ActionRequest {
        ActionRequest {
            action: Some(action.to_string()),
            ..Default::default()
        }
    }

    fn to_json(response: &ActionResponse) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_health_on_fresh_session() {
        let factory = ScriptedFactory::new(Script::succeed(URL));
        let counters = factory.counters.clone();
        let handler = handler_with(factory, SessionOptions::default());

        let response = handler.handle(request("health")).await;
        assert_eq!(to_json(&response), json!({"success": true}));
        assert!(counters.builds().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let factory = ScriptedFactory::new(Script::succeed(URL));
        let counters = factory.counters.clone();
        let handler = handler_with(factory, SessionOptions::default());

        let created = handler
            .handle(ActionRequest::create(Provider::Cloudflared, None))
            .await;
        assert_eq!(
            to_json(&created),
            json!({
                "success": true,
                "tunnel_url": URL,
                "message": "Tunnel created successfully"
            })
        );
        assert_eq!(counters.builds(), vec![(Provider::Cloudflared, 5173)]);

        let status = handler.handle(request("get")).await;
        assert_eq!(
            to_json(&status),
            json!({"success": true, "tunnel_url": URL, "is_running": true})
        );
    }

    #[tokio::test]
    async fn test_create_uses_request_port() {
        let factory = ScriptedFactory::new(Script::succeed(URL));
        let counters = factory.counters.clone();
        let handler = handler_with(factory, SessionOptions::default());

        handler
            .handle(ActionRequest::create(Provider::Serveo, Some(8080)))
            .await;
        assert_eq!(counters.builds(), vec![(Provider::Serveo, 8080)]);
    }

    #[tokio::test]
    async fn test_create_in_container_exposes_port_80() {
        let factory = ScriptedFactory::new(Script::succeed(URL));
        let counters = factory.counters.clone();
        let session = TunnelSession::new(
            Arc::new(factory),
            DeploymentMode::from_flag(Some("true")),
            SessionOptions::default(),
        );
        let handler = TunnelRequestHandler::new(session, Duration::from_millis(20));

        let response = handler.handle(request("create")).await;
        assert!(response.success());
        assert_eq!(counters.builds(), vec![(Provider::Serveo, 80)]);
        assert_eq!(handler.session().get_status().await.port, Some(80));
    }

    #[tokio::test]
    async fn test_create_unknown_provider_falls_back_to_serveo() {
        let factory = ScriptedFactory::new(Script::succeed(URL));
        let counters = factory.counters.clone();
        let handler = handler_with(factory, SessionOptions::default());

        let mut req = request("create");
        req.provider = Some("ngrok".to_string());
        handler.handle(req).await;

        assert_eq!(counters.builds(), vec![(Provider::Serveo, 5173)]);
    }

    #[tokio::test]
    async fn test_create_failure_reports_in_progress() {
        let handler = handler_with(
            ScriptedFactory::new(Script::fail("cloudflared exited")),
            SessionOptions::default(),
        );

        let response = handler.handle(request("create")).await;
        assert_eq!(
            to_json(&response),
            json!({
                "success": false,
                "tunnel_url": null,
                "message": "Tunnel creation in progress"
            })
        );
    }

    #[tokio::test]
    async fn test_create_picks_up_url_during_grace_period() {
        let factory = ScriptedFactory::new(Script::Succeed {
            url: URL.to_string(),
            delay: Duration::from_millis(60),
        });
        let session = TunnelSession::new(
            Arc::new(factory),
            DeploymentMode::LocalDev,
            SessionOptions {
                startup_timeout: Duration::from_millis(20),
                cancel_on_timeout: false,
            },
        );
        let handler =
            TunnelRequestHandler::new(session, Duration::from_millis(500));

        let response = handler.handle(request("create")).await;
        assert!(response.success());
        assert_eq!(response.tunnel_url(), Some(URL));
    }

    #[tokio::test]
    async fn test_stop_then_get() {
        let handler = handler_with(ScriptedFactory::new(Script::succeed(URL)), SessionOptions::default());

        handler.handle(request("create")).await;
        let stopped = handler.handle(request("stop")).await;
        assert_eq!(to_json(&stopped), json!({"success": true}));

        let status = handler.handle(request("get")).await;
        assert_eq!(
            to_json(&status),
            json!({"success": false, "tunnel_url": null, "is_running": false})
        );
    }

    #[tokio::test]
    async fn test_stop_when_idle_still_succeeds() {
        let handler = handler_with(ScriptedFactory::new(Script::succeed(URL)), SessionOptions::default());

        let response = handler.handle(request("stop")).await;
        assert!(response.success());
    }

    #[tokio::test]
    async fn test_missing_action_means_get() {
        let handler = handler_with(ScriptedFactory::new(Script::succeed(URL)), SessionOptions::default());

        let response = handler.handle(ActionRequest::default()).await;
        assert_eq!(
            to_json(&response),
            json!({"success": false, "tunnel_url": null, "is_running": false})
        );
    }

    #[tokio::test]
    async fn test_invalid_action_leaves_session_alone() {
        let factory = ScriptedFactory::new(Script::succeed(URL));
        let counters = factory.counters.clone();
        let handler = handler_with(factory, SessionOptions::default());

        for action in ["restart", "CREATE", ""] {
            let response = handler.handle(request(action)).await;
            assert_eq!(
                to_json(&response),
                json!({"success": false, "error": INVALID_ACTION_MESSAGE})
            );
        }
        assert!(counters.builds().is_empty());
        assert!(!handler.session().get_status().await.running);
    }

    #[tokio::test]
    async fn test_router_tunnel_routes() {
        let handler = Arc::new(handler_with(
            ScriptedFactory::new(Script::succeed(URL)),
            SessionOptions::default(),
        ));

        for path in ["/api/tunnel", "/tunnel"] {
            let app = create_router(handler.clone());
            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(path)
                        .header("content-type", "application/json")
                        .body(Body::from(r#"{"action":"create","provider":"cloudflared"}"#))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value["success"], json!(true));
            assert_eq!(value["tunnel_url"], json!(URL));
        }
    }

    #[tokio::test]
    async fn test_router_health() {
        let handler = Arc::new(handler_with(
            ScriptedFactory::new(Script::succeed(URL)),
            SessionOptions::default(),
        ));

        let response = create_router(handler)
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"success":true}"#);
    }

    #[tokio::test]
    async fn test_router_rejects_malformed_body() {
        let handler = Arc::new(handler_with(
            ScriptedFactory::new(Script::succeed(URL)),
            SessionOptions::default(),
        ));

        let response = create_router(handler)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/tunnel")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
