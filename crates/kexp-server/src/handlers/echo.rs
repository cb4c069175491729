//! `echo`: replies once with the call's params.

use async_trait::async_trait;
use kexp_stream::rpc::{Call, CallHandler, Reply};
use kexp_stream::{CancelScope, ReplySender};
use serde_json::Value;

pub const ECHO: &str = "echo";

pub struct EchoHandler;

#[async_trait]
impl CallHandler for EchoHandler {
    async fn handle(
        &self,
        _scope: CancelScope,
        call: Call,
        reply: ReplySender,
    ) -> kexp_stream::Result<()> {
        let params: Value = call.params_as()?;
        reply.send_reply(&Reply::ok(call.id, params)).await
    }
}
