//! `ticker`: streams `{"tick": n}` at a fixed interval until cancelled.
//!
//! Params: `{ "intervalMs": u64, "count"?: u64 }`. Without `count` the call
//! runs until cancelled or the connection closes.

use async_trait::async_trait;
use kexp_stream::rpc::{Call, CallHandler, Reply};
use kexp_stream::{CancelScope, ReplySender, StreamError};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const TICKER: &str = "ticker";

const MIN_INTERVAL_MS: u64 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerParams {
    interval_ms: u64,
    #[serde(default)]
    count: Option<u64>,
}

pub struct TickerHandler;

impl TickerHandler {
    fn params(call: &Call) -> kexp_stream::Result<TickerParams> {
        let params: TickerParams = call.params_as()?;
        if params.interval_ms < MIN_INTERVAL_MS {
            return Err(StreamError::InvalidParams {
                method: call.method.to_string(),
                message: format!("intervalMs must be at least {}", MIN_INTERVAL_MS),
            });
        }
        Ok(params)
    }
}

#[async_trait]
impl CallHandler for TickerHandler {
    async fn handle(&self, scope: CancelScope, call: Call, reply: ReplySender) -> kexp_stream::Result<()> {
        let params = match Self::params(&call) {
            Ok(params) => params,
            Err(e) => {
                reply
                    .send_reply(&Reply::error(call.id.clone(), e.to_string()))
                    .await?;
                return Err(e);
            }
        };
        debug!("Ticker started with {:?}", params);

        let mut interval = tokio::time::interval(Duration::from_millis(params.interval_ms));
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;

        let mut tick: u64 = 0;
        while params.count.map_or(true, |count| tick < count) {
            // Cancellation wins over a tick that is due at the same time.
            tokio::select! {
                biased;
                _ = scope.cancelled() => {
                    debug!("Ticker cancelled after {} ticks", tick);
                    return Ok(());
                }
                _ = interval.tick() => {}
            }
            tick += 1;
            reply
                .send_reply(&Reply::ok(call.id.clone(), json!({ "tick": tick })))
                .await?;
        }
        Ok(())
    }
}
