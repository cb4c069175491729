//! Connection transports.
//!
//! A connection is split into a read half ([`MessageSource`]) and a write
//! half ([`MessageSink`]) so the dispatcher can guard each with its own lock.
//! The WebSocket transport lives with the HTTP host; [`memory`] provides an
//! in-process pair for tests and embedding.

pub mod memory;

use async_trait::async_trait;

use crate::message::Message;
use crate::Result;

/// Read half of a connection.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the peer closed the connection, either with an
    /// explicit close frame or by ending the stream.
    ///
    /// Must be cancel safe: the dispatcher drops a pending read when the
    /// connection scope is cancelled.
    async fn read_message(&mut self) -> Result<Option<Message>>;
}

/// Write half of a connection.
#[async_trait]
pub trait MessageSink: Send + 'static {
    /// Write one complete frame.
    async fn write_message(&mut self, message: Message) -> Result<()>;

    /// Close the connection. Writes after close fail.
    async fn close(&mut self) -> Result<()>;
}
