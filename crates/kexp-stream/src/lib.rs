//! kexp-stream - multiplexed calls over one full-duplex message connection.
//!
//! A client opens a single connection and runs any number of concurrent,
//! named calls over it. Each call may produce zero or more replies (plain
//! request/response or an open-ended subscription) and can be cancelled by
//! id at any time. Closing the connection cancels every call on it.
//!
//! This crate is transport-agnostic. The HTTP host in `kexp-server` binds it
//! to WebSocket connections; [`transport::memory`] binds it to in-process
//! channels.
//!
//! # Example
//!
//! ```rust,ignore
//! use kexp_stream::rpc::{Call, CallHandler, CallRouter, Reply, MESSAGE_TYPE_CALL};
//! use kexp_stream::{CancelScope, MessageDispatcher, MessageRouter, ReplySender};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl CallHandler for Echo {
//!     async fn handle(&self, _: CancelScope, call: Call, reply: ReplySender) -> kexp_stream::Result<()> {
//!         let params = call.params_as()?;
//!         reply.send_reply(&Reply::ok(call.id, params)).await
//!     }
//! }
//!
//! let mut calls = CallRouter::new();
//! calls.register("echo", Echo)?;
//! let mut router = MessageRouter::new();
//! router.register(MESSAGE_TYPE_CALL, calls);
//!
//! let (reader, writer, client) = kexp_stream::transport::memory::pair();
//! MessageDispatcher::new(&CancelScope::new("req-1"), reader, writer, router.bind())
//!     .run()
//!     .await;
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod rpc;
pub mod stream;
pub mod transport;

pub use cancel::CancelScope;
pub use config::{DispatcherOptions, StreamConfig};
pub use error::{Result, StreamError};
pub use message::{Message, MessageType};
pub use stream::{
    HandlerMap, MessageDispatcher, MessageHandler, MessageHandlerFactory, MessageRouter,
    ReplySender,
};
pub use transport::{MessageSink, MessageSource};
