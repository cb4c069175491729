//! Hierarchical cancellation scopes for connections and calls.
//!
//! A `CancelScope` is cloned and shared across the tasks that serve one
//! connection. Cancelling a scope cancels every scope derived from it with
//! [`CancelScope::child`], but never its parent. The connection scope is the
//! parent of every call scope, so dropping the connection cancels all calls
//! hosted on it.
//!
//! # Example
//!
//! ```
//! use kexp_stream::CancelScope;
//!
//! let connection = CancelScope::new("req-1");
//! let call = connection.child();
//!
//! call.cancel();
//! assert!(call.is_cancelled());
//! assert!(!connection.is_cancelled());
//!
//! let other_call = connection.child();
//! connection.cancel();
//! assert!(other_call.is_cancelled());
//! ```

use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::config::StreamConfig;

/// A cancellable execution scope carrying the request id used for logging.
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
    request_id: Arc<str>,
}

impl CancelScope {
    /// Create a new root scope.
    pub fn new(request_id: impl Into<Arc<str>>) -> Self {
        Self {
            token: CancellationToken::new(),
            request_id: request_id.into(),
        }
    }

    /// Derive a scope that is cancelled together with this one.
    ///
    /// Cancelling the child leaves this scope untouched.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            request_id: Arc::clone(&self.request_id),
        }
    }

    /// Derive a child scope with a different request id.
    pub fn child_with_request_id(&self, request_id: impl Into<Arc<str>>) -> Self {
        Self {
            token: self.token.child_token(),
            request_id: request_id.into(),
        }
    }

    /// Request cancellation of this scope and all of its descendants.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until this scope is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::StreamError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Request id of the connection this scope belongs to.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new(StreamConfig::UNKNOWN_REQUEST_ID)
    }
}
