//! HTTP server implementation using Axum.

use crate::config::ServerConfig;
use crate::handlers::handle_health;
use crate::stream::handle_connect;
use axum::{routing::get, Router};
use kexp_stream::{CancelScope, MessageRouter, StreamConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Message handlers bound for every new stream connection
    pub router: MessageRouter,
    /// Parent scope of every connection; cancelled on shutdown
    pub shutdown: CancelScope,
    /// Largest inbound WebSocket message accepted
    pub max_message_size: usize,
}

impl AppState {
    pub fn new(router: MessageRouter, shutdown: CancelScope) -> Self {
        Self {
            router,
            shutdown,
            max_message_size: StreamConfig::MAX_MESSAGE_SIZE,
        }
    }
}

/// Handle to the running server task.
pub struct ServerHandle {
    pub addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the server task to finish after shutdown was requested.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Server task failed: {}", e);
        }
    }
}

/// Build the router serving health checks and stream connections.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(ServerConfig::HEALTH_ROUTE, get(handle_health))
        .route(ServerConfig::STREAM_ROUTE, get(handle_connect))
        .route(ServerConfig::STREAM_ROUTE_BARE, get(handle_connect))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the stream server.
///
/// Returns once the listener is bound; the actual address is useful when
/// port=0. Cancelling the state's shutdown scope stops accepting new
/// connections and closes every open one.
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<ServerHandle> {
    let shutdown = state.shutdown.clone();
    let app = build_router(Arc::new(state));

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!("Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr: actual_addr,
        task,
    })
}
