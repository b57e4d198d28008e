//! `CollabServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use doccollab_auth::TokenVerifier;
use doccollab_core::{AccessOracle, ContentStore};

use crate::config::ServerConfig;
use crate::shutdown::ShutdownCoordinator;
use crate::ws::{ContentRelay, MessageRouter, RoomRegistry, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Per-document room membership.
    pub rooms: Arc<RoomRegistry>,
    /// Inbound message dispatch.
    pub router: Arc<MessageRouter>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Current live WebSocket sessions, for the connection cap.
    pub active_connections: Arc<AtomicUsize>,
    /// When the server started.
    pub start_time: Instant,
    /// Renders `/metrics`; absent when no recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The collaborative-session server.
pub struct CollabServer {
    config: Arc<ServerConfig>,
    rooms: Arc<RoomRegistry>,
    router: Arc<MessageRouter>,
    shutdown: Arc<ShutdownCoordinator>,
    active_connections: Arc<AtomicUsize>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl CollabServer {
    /// Wire the server over its injected collaborators.
    pub fn new(
        config: ServerConfig,
        verifier: TokenVerifier,
        oracle: Arc<dyn AccessOracle>,
        store: Arc<dyn ContentStore>,
    ) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let relay = ContentRelay::new(store, Arc::clone(&rooms));
        let router = Arc::new(MessageRouter::new(
            Arc::new(verifier),
            oracle,
            Arc::clone(&rooms),
            relay,
        ));
        Self {
            config: Arc::new(config),
            rooms,
            router,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            active_connections: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Attach a Prometheus handle so `/metrics` renders.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            rooms: Arc::clone(&self.rooms),
            router: Arc::clone(&self.router),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            active_connections: Arc::clone(&self.active_connections),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown is signalled.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(err) = serve.await {
                warn!(error = %err, "server exited with error");
            }
        });

        info!(addr = %local_addr, "doccollab server listening");
        Ok((local_addr, handle))
    }

    /// Get the room registry.
    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
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

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Number of rooms with at least one member.
    pub rooms: usize,
}

/// A reserved slot against the connection cap, released on drop.
///
/// The upgrade callback may be dropped without ever running (client gone
/// mid-handshake); tying the release to `Drop` keeps the count exact on
/// that path too.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    /// Try to reserve a slot; `None` when the cap is reached.
    fn reserve(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        if active.fetch_add(1, Ordering::SeqCst) >= limit {
            let _ = active.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// GET /ws — upgrade to a collaborative session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let Some(slot) =
        ConnectionSlot::reserve(&state.active_connections, state.config.max_connections)
    else {
        warn!(limit = state.config.max_connections, "connection limit reached, refusing upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let router = Arc::clone(&state.router);
    let rooms = Arc::clone(&state.rooms);
    let config = Arc::clone(&state.config);
    let cancel = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            run_ws_session(socket, router, rooms, config, cancel).await;
        })
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: state.active_connections.load(Ordering::SeqCst),
        rooms: state.rooms.room_count().await,
    })
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => crate::metrics::render(&handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
