//! Message routing over one connection.
//!
//! # Architecture
//!
//! - **Router**: configuration-time table from message type to handler
//!   factory, shared by every connection
//! - **Dispatcher**: one per connection; reads frames, routes each to its
//!   handler on a separate task and serializes replies onto the connection
//! - **Reply channel**: one per handled message; drained in order by a relay
//!   task that owns nothing but the channel

mod dispatcher;

pub use dispatcher::MessageDispatcher;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cancel::CancelScope;
use crate::message::{Message, MessageType};
use crate::{Result, StreamError};

/// Handles every message of one type on one connection.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one message.
    ///
    /// `scope` is the connection scope. Replies sent on `reply` are written to
    /// the connection in the order they were sent. Returned errors are logged
    /// by the dispatcher and never close the connection.
    async fn handle(&self, scope: CancelScope, message: Message, reply: ReplySender)
        -> Result<()>;
}

/// Produces the handler a new connection uses for one message type.
///
/// Stateless handlers are shared as `Arc<H>`. Handlers with per-connection
/// state, such as the call dispatcher, build a fresh instance per bind.
pub trait MessageHandlerFactory: Send + Sync + 'static {
    fn bind(&self) -> Arc<dyn MessageHandler>;
}

impl<H: MessageHandler> MessageHandlerFactory for Arc<H> {
    fn bind(&self) -> Arc<dyn MessageHandler> {
        Arc::clone(self) as Arc<dyn MessageHandler>
    }
}

/// Per-connection handler table.
pub type HandlerMap = HashMap<MessageType, Arc<dyn MessageHandler>>;

/// Configuration-time table of message handlers.
#[derive(Clone, Default)]
pub struct MessageRouter {
    factories: HashMap<MessageType, Arc<dyn MessageHandlerFactory>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler factory for a message type.
    ///
    /// Registering the same type twice replaces the earlier factory.
    pub fn register(
        &mut self,
        message_type: impl Into<MessageType>,
        factory: impl MessageHandlerFactory,
    ) {
        self.factories
            .insert(message_type.into(), Arc::new(factory));
    }

    /// Build the handler table for a new connection.
    pub fn bind(&self) -> HandlerMap {
        self.factories
            .iter()
            .map(|(message_type, factory)| (message_type.clone(), factory.bind()))
            .collect()
    }

    /// Registered message types, sorted.
    pub fn message_types(&self) -> Vec<MessageType> {
        let mut types: Vec<_> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("message_types", &self.message_types())
            .finish()
    }
}

/// Send-only half of a handler's reply channel.
#[derive(Debug, Clone)]
pub struct ReplySender {
    tx: mpsc::Sender<Message>,
}

impl ReplySender {
    /// Create a reply channel with the given buffer size.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a frame for the connection.
    ///
    /// Fails once the relay stopped, which happens when the connection is
    /// shutting down.
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.tx
            .send(message.into())
            .await
            .map_err(|_| StreamError::ReplyChannelClosed)
    }

    /// Encode a value as JSON and queue it.
    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.send(Message::from_json(value)?).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
