//! WebSocket connection handler.
//!
//! Upgrades `GET /api/stream/v1/` to a WebSocket and runs one
//! `MessageDispatcher` over it until either side closes. Text and binary
//! frames both carry JSON messages; replies go out as text frames.

use crate::config::ServerConfig;
use crate::server::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::rejection::WebSocketUpgradeRejection,
        ws::{self, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kexp_stream::{Message, MessageDispatcher, MessageSink, MessageSource, StreamConfig, StreamError};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Read half of an upgraded WebSocket.
pub struct WsReader(SplitStream<WebSocket>);

#[async_trait]
impl MessageSource for WsReader {
    async fn read_message(&mut self) -> kexp_stream::Result<Option<Message>> {
        while let Some(frame) = self.0.next().await {
            match frame.map_err(StreamError::transport)? {
                ws::Message::Text(text) => return Ok(Some(Message::from(text))),
                ws::Message::Binary(data) => return Ok(Some(Message::new(data))),
                ws::Message::Close(_) => return Ok(None),
                // Pongs are answered by the protocol layer.
                ws::Message::Ping(_) | ws::Message::Pong(_) => continue,
            }
        }
        Ok(None)
    }
}

/// Write half of an upgraded WebSocket.
pub struct WsWriter(SplitSink<WebSocket, ws::Message>);

#[async_trait]
impl MessageSink for WsWriter {
    async fn write_message(&mut self, message: Message) -> kexp_stream::Result<()> {
        let frame = match String::from_utf8(message.into_bytes().to_vec()) {
            Ok(text) => ws::Message::Text(text),
            Err(e) => ws::Message::Binary(e.into_bytes()),
        };
        self.0.send(frame).await.map_err(StreamError::transport)
    }

    async fn close(&mut self) -> kexp_stream::Result<()> {
        self.0.close().await.map_err(StreamError::transport)
    }
}

/// Accept a stream connection.
pub async fn handle_connect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let request_id = headers
        .get(ServerConfig::REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(StreamConfig::UNKNOWN_REQUEST_ID)
        .to_string();

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(e) => {
            error!("Couldn't upgrade to WebSocket connection ({}): {}", request_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "upgrade failed"})),
            )
                .into_response();
        }
    };

    upgrade
        .max_message_size(state.max_message_size)
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| serve_connection(state, socket, request_id))
}

async fn serve_connection(state: Arc<AppState>, socket: WebSocket, request_id: String) {
    info!("Stream connection opened ({})", request_id);
    let (sink, stream) = socket.split();
    let parent = state.shutdown.child_with_request_id(request_id.as_str());

    MessageDispatcher::new(&parent, WsReader(stream), WsWriter(sink), state.router.bind())
        .run()
        .await;

    info!("Stream connection closed ({})", request_id);
}
