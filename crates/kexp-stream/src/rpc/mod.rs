//! Named calls multiplexed over the `"call"` message type.
//!
//! A client starts a call by sending a call envelope with an id of its
//! choosing. The handler registered for the method may send any number of
//! replies keyed to that id until it returns. The client stops a call early
//! with the `.cancel` pseudo-method, naming the call's id as the cancel
//! request's own id.

mod call;
mod dispatcher;
mod registry;

pub use call::{Call, CallId, CallMethod, Reply};
pub use dispatcher::{CallDispatcher, CallRouter};
pub use registry::{ActiveCallGuard, ActiveCalls};

use async_trait::async_trait;

use crate::cancel::CancelScope;
use crate::stream::ReplySender;
use crate::Result;

/// Message type the call dispatcher is registered under.
pub const MESSAGE_TYPE_CALL: &str = "call";

/// Built-in pseudo-method cancelling an active call.
pub const CANCEL_METHOD: &str = ".cancel";

/// Reply error for methods with no registered handler.
pub const UNKNOWN_METHOD: &str = "Unknown method";

/// Reply error for a call reusing the id of a call that is still active.
pub const DUPLICATE_CALL: &str = "Call ID already active";

/// Reply error for a call arriving while the connection is at its limit.
pub const TOO_MANY_CALLS: &str = "Too many active calls";

/// Executes one call.
///
/// Handlers may run for as long as they like, but must stop sending and
/// return promptly once `scope` is cancelled: by a `.cancel` request, or
/// because the connection went away.
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn handle(&self, scope: CancelScope, call: Call, reply: ReplySender) -> Result<()>;
}
