//! `RelayServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use relay_core::{ConnectionId, RelayError, Result};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::home;
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::Hub;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the hub actor.
    pub hub: Hub,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// One permit per admitted WebSocket session.
    pub slots: Arc<Semaphore>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server: a hub actor plus the HTTP surface in front of it.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    hub: Hub,
    hub_task: Mutex<Option<JoinHandle<()>>>,
    slots: Arc<Semaphore>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a new server and start its hub.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (hub, hub_task) = Hub::spawn(config.hub_config(), shutdown.token());
        Self {
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
            hub,
            hub_task: Mutex::new(Some(hub_task)),
            shutdown,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            config: self.config.clone(),
            slots: self.slots.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(home_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address and a handle that completes once the
    /// listener and the hub have both stopped.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::Bind { addr, source })?;

        info!(%local_addr, "relay server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let hub_task = self.hub_task.lock().take();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
            if let Some(hub_task) = hub_task {
                let _ = hub_task.await;
            }
            info!("relay server stopped");
        });

        Ok((local_addr, handle))
    }

    /// Get the hub handle.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /
async fn home_handler(State(state): State<AppState>) -> Response {
    match home::render(&state.config.template_path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "home page unavailable");
            let detail = match e {
                RelayError::TemplateRender(detail) => detail,
                other => other.to_string(),
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Template error: {detail}"),
            )
                .into_response()
        }
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            let err = RelayError::Handshake(rejection.body_text());
            warn!(error = %err, "rejected websocket request");
            return rejection.into_response();
        }
    };

    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let Ok(permit) = state.slots.clone().try_acquire_owned() else {
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        counter!(WS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let conn_id = ConnectionId::new();
    let hub = state.hub.clone();
    let session = state.config.session_config();

    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|e: axum::Error| {
            let err = RelayError::Handshake(e.to_string());
            warn!(error = %err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, conn_id, hub, session).await;
            drop(permit);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.connection_count().await.ok();
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        RelayServer::new(ServerConfig::default())
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
    }

    #[tokio::test]
    async fn hub_accessible() {
        let server = make_server();
        assert_eq!(server.hub().connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let (status, body) = get(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn health_degraded_after_shutdown() {
        let server = make_server();
        let app = server.router();
        server.shutdown().shutdown();
        // Wait for the hub actor to exit.
        while server.hub().connection_count().await.is_ok() {
            tokio::task::yield_now().await;
        }

        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "degraded");
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let server = make_server();
        let (status, _) = get(server.router(), "/ws").await;
        assert!(status.is_client_error(), "got {status}");
        assert_eq!(server.hub().connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn home_serves_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.html");
        std::fs::write(&path, "<title>relay</title>").unwrap();

        let server = RelayServer::new(ServerConfig {
            template_path: path,
            ..ServerConfig::default()
        });
        let (status, body) = get(server.router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<title>relay</title>");
    }

    #[tokio::test]
    async fn home_picks_up_template_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.html");
        std::fs::write(&path, "v1").unwrap();

        let server = RelayServer::new(ServerConfig {
            template_path: path.clone(),
            ..ServerConfig::default()
        });
        assert_eq!(get(server.router(), "/").await.1, "v1");
        std::fs::write(&path, "v2").unwrap();
        assert_eq!(get(server.router(), "/").await.1, "v2");
    }

    #[tokio::test]
    async fn missing_template_returns_500() {
        let dir = tempfile::tempdir().unwrap();
        let server = RelayServer::new(ServerConfig {
            template_path: dir.path().join("nope.html"),
            ..ServerConfig::default()
        });
        let (status, body) = get(server.router(), "/").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("Template error: "), "body: {body}");
        assert!(body.contains("nope.html"));
    }

    #[tokio::test]
    async fn metrics_404_without_recorder() {
        let server = make_server();
        let (status, _) = get(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_served_with_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let (status, _) = get(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _) = get(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn listen_reports_bind_failure() {
        let first = make_server();
        let (addr, _handle) = first.listen().await.unwrap();

        let second = RelayServer::new(ServerConfig {
            port: addr.port(),
            ..ServerConfig::default()
        });
        let err = second.listen().await.unwrap_err();
        assert!(matches!(err, RelayError::Bind { .. }));
    }
}
