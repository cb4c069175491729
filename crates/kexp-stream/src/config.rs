//! Centralized configuration for the stream protocol.

use std::time::Duration;

/// Per-connection protocol limits and timings.
pub struct StreamConfig;

impl StreamConfig {
    /// Buffered replies per handler before `ReplySender::send` waits on the relay.
    pub const REPLY_CHANNEL_CAPACITY: usize = 16;
    /// Default admission limit for concurrently registered calls on one connection.
    pub const MAX_ACTIVE_CALLS: usize = 1024;
    /// Largest inbound message accepted by a transport.
    pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024; // 4MB
    /// How long a closing connection waits for its handlers to wind down.
    pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);
    /// Request id used in logs when the transport did not supply one.
    pub const UNKNOWN_REQUEST_ID: &'static str = "none";
}

/// Runtime options for a call dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// Maximum number of calls registered at once on one connection.
    pub max_active_calls: usize,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            max_active_calls: StreamConfig::MAX_ACTIVE_CALLS,
        }
    }
}

impl DispatcherOptions {
    /// Override the active-call admission limit.
    ///
    /// A limit of zero is rejected since it would refuse every call.
    pub fn with_max_active_calls(mut self, limit: usize) -> crate::Result<Self> {
        if limit == 0 {
            return Err(crate::StreamError::Config {
                message: "max_active_calls must be at least 1".to_string(),
            });
        }
        self.max_active_calls = limit;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = DispatcherOptions::default();
        assert_eq!(options.max_active_calls, StreamConfig::MAX_ACTIVE_CALLS);
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(DispatcherOptions::default().with_max_active_calls(0).is_err());
        let options = DispatcherOptions::default().with_max_active_calls(3).unwrap();
        assert_eq!(options.max_active_calls, 3);
    }
}
