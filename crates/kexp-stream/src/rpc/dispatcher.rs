//! Call routing, registration and cancellation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, debug_span, warn, Instrument};

use super::call::{Call, CallMethod, Reply};
use super::registry::ActiveCalls;
use super::{CallHandler, CANCEL_METHOD, DUPLICATE_CALL, TOO_MANY_CALLS, UNKNOWN_METHOD};
use crate::cancel::CancelScope;
use crate::config::DispatcherOptions;
use crate::message::Message;
use crate::stream::{MessageHandler, MessageHandlerFactory, ReplySender};
use crate::{Result, StreamError};

type HandlerTable = HashMap<CallMethod, Arc<dyn CallHandler>>;

/// Configuration-time table of call handlers.
///
/// Shared by every connection. Registered with a `MessageRouter` under
/// [`MESSAGE_TYPE_CALL`](super::MESSAGE_TYPE_CALL); each connection gets its
/// own [`CallDispatcher`] with an empty registry.
#[derive(Clone, Default)]
pub struct CallRouter {
    handlers: Arc<HandlerTable>,
    options: DispatcherOptions,
}

impl CallRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: DispatcherOptions) -> Self {
        self.options = options;
        self
    }

    /// Associate a method with its handler.
    ///
    /// The cancel pseudo-method is built in and cannot be registered.
    pub fn register(
        &mut self,
        method: impl Into<CallMethod>,
        handler: impl CallHandler,
    ) -> Result<()> {
        self.register_shared(method, Arc::new(handler))
    }

    /// Associate a method with a handler that is also used elsewhere.
    pub fn register_shared(
        &mut self,
        method: impl Into<CallMethod>,
        handler: Arc<dyn CallHandler>,
    ) -> Result<()> {
        let method = method.into();
        if method.is_cancel() {
            return Err(StreamError::Config {
                message: format!("{} is a reserved method", CANCEL_METHOD),
            });
        }
        Arc::make_mut(&mut self.handlers).insert(method, handler);
        Ok(())
    }

    /// Registered methods, sorted.
    pub fn methods(&self) -> Vec<CallMethod> {
        let mut methods: Vec<_> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Create the dispatcher for one connection.
    pub fn dispatcher(&self) -> CallDispatcher {
        CallDispatcher {
            handlers: Arc::clone(&self.handlers),
            active: ActiveCalls::new(self.options.max_active_calls),
        }
    }
}

impl fmt::Debug for CallRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRouter")
            .field("methods", &self.methods())
            .field("options", &self.options)
            .finish()
    }
}

impl MessageHandlerFactory for CallRouter {
    fn bind(&self) -> Arc<dyn MessageHandler> {
        Arc::new(self.dispatcher())
    }
}

/// Routes the calls of one connection and tracks which are in flight.
pub struct CallDispatcher {
    handlers: Arc<HandlerTable>,
    active: ActiveCalls,
}

impl CallDispatcher {
    /// The registry of in-flight calls.
    pub fn active_calls(&self) -> &ActiveCalls {
        &self.active
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains(id)
    }

    async fn dispatch(&self, scope: CancelScope, call: Call, reply: ReplySender) -> Result<()> {
        debug!("Dispatching call");
        if call.method.is_cancel() {
            return self.cancel(call, reply).await;
        }

        let Some(handler) = self.handlers.get(&call.method).cloned() else {
            debug!("Call handler not found");
            return reply
                .send_reply(&Reply::error(call.id, UNKNOWN_METHOD))
                .await;
        };

        let call_scope = scope.child();
        let _registration = match self.active.register(&call.id, call_scope.clone()) {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Rejecting call: {}", e);
                let message = match e {
                    StreamError::DuplicateCall { .. } => DUPLICATE_CALL,
                    _ => TOO_MANY_CALLS,
                };
                return reply.send_reply(&Reply::error(call.id, message)).await;
            }
        };

        // Runs on the message task already spawned for this frame, so other
        // calls proceed meanwhile. The registration guard drops on any exit.
        let result = handler.handle(call_scope, call, reply).await;
        debug!("Call finished");
        result
    }

    async fn cancel(&self, call: Call, reply: ReplySender) -> Result<()> {
        if self.active.cancel(call.id.as_str()) {
            debug!("Active call cancelled");
        } else {
            warn!("Active call {} not found, nothing to cancel", call.id);
        }
        reply.send_reply(&Reply::ack(call.id)).await
    }
}

#[async_trait]
impl MessageHandler for CallDispatcher {
    async fn handle(&self, scope: CancelScope, message: Message, reply: ReplySender) -> Result<()> {
        let call: Call = message.decode()?;
        let span = debug_span!("call", call_id = %call.id, call_method = %call.method);
        self.dispatch(scope, call, reply).instrument(span).await
    }
}
