//! HTTP endpoints and built-in call handlers.

mod echo;
mod ticker;

pub use echo::{EchoHandler, ECHO};
pub use ticker::{TickerHandler, TICKER};

use axum::{response::IntoResponse, Json};
use kexp_stream::rpc::CallRouter;
use serde_json::json;

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Register the diagnostic call handlers every server exposes.
pub fn register_all(router: &mut CallRouter) -> kexp_stream::Result<()> {
    router.register(ECHO, EchoHandler)?;
    router.register(TICKER, TickerHandler)?;
    Ok(())
}
