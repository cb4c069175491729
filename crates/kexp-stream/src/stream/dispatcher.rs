//! Per-connection message dispatcher.
//!
//! Owns one connection for its whole lifetime. The read loop decodes only
//! the message type and hands every message to its own task, so a slow
//! handler never holds up the connection. All writes go through a single
//! writer lock; a failed write cancels the connection scope, which in turn
//! cancels every handler running on the connection.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::{HandlerMap, ReplySender};
use crate::cancel::CancelScope;
use crate::config::StreamConfig;
use crate::message::{Message, MessageType};
use crate::transport::{MessageSink, MessageSource};
use crate::{Result, StreamError};

/// Dispatcher bound to one connection.
pub struct MessageDispatcher<R, W> {
    scope: CancelScope,
    reader: Mutex<R>,
    writer: Mutex<W>,
    handlers: HandlerMap,
    tasks: TaskTracker,
    reply_capacity: usize,
    grace_period: Duration,
    span: Span,
}

impl<R: MessageSource, W: MessageSink> MessageDispatcher<R, W> {
    /// Bind a dispatcher to a connection.
    ///
    /// The connection scope is derived from `parent`, so cancelling the
    /// parent (for example on server shutdown) closes this connection too.
    pub fn new(parent: &CancelScope, reader: R, writer: W, handlers: HandlerMap) -> Self {
        let scope = parent.child();
        let span = info_span!("connection", request_id = %scope.request_id());
        Self {
            scope,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            handlers,
            tasks: TaskTracker::new(),
            reply_capacity: StreamConfig::REPLY_CHANNEL_CAPACITY,
            grace_period: StreamConfig::SHUTDOWN_GRACE_PERIOD,
            span,
        }
    }

    /// Override the per-handler reply buffer size.
    pub fn with_reply_capacity(mut self, capacity: usize) -> Self {
        self.reply_capacity = capacity.max(1);
        self
    }

    /// Override how long shutdown waits for running handlers.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// The connection scope. Cancelling it shuts the dispatcher down.
    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    /// Run the dispatch loop until the connection ends.
    ///
    /// Returns after the connection is closed and every handler finished or
    /// the grace period ran out.
    pub async fn run(self) {
        let span = self.span.clone();
        Arc::new(self).dispatch_loop().instrument(span).await
    }

    async fn dispatch_loop(self: Arc<Self>) {
        debug!("Dispatch loop started");
        loop {
            let message = match self.read_message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    error!("Couldn't read message: {}", e);
                    break;
                }
            };
            let message_type = match message.message_type() {
                Ok(message_type) => message_type,
                Err(e) => {
                    warn!(
                        "Can not decode message type: {} (message: {})",
                        e,
                        message.text_lossy()
                    );
                    continue;
                }
            };
            let this = Arc::clone(&self);
            self.tasks
                .spawn(this.dispatch_message(message, message_type).in_current_span());
        }
        self.shutdown().await;
    }

    async fn read_message(&self) -> Result<Option<Message>> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = self.scope.cancelled() => Ok(None),
            result = reader.read_message() => {
                if matches!(result, Ok(None)) {
                    info!("Connection has been closed by the peer");
                }
                result
            }
        }
    }

    async fn dispatch_message(self: Arc<Self>, message: Message, message_type: MessageType) {
        debug!("Dispatching message of type {}", message_type);
        let Some(handler) = self.handlers.get(&message_type).cloned() else {
            warn!(
                "Unknown message type {} (message: {})",
                message_type,
                message.text_lossy()
            );
            return;
        };

        let (reply, mut replies) = ReplySender::channel(self.reply_capacity);
        let scope = self.scope.clone();
        self.tasks.spawn(
            async move {
                if let Err(e) = handler.handle(scope, message, reply).await {
                    warn!("Handle message of type {} failed: {}", message_type, e);
                }
            }
            .in_current_span(),
        );

        // The handler drops its sender on return, which ends this relay.
        while let Some(reply) = replies.recv().await {
            if self.scope.is_cancelled() || self.write_message(reply).await.is_err() {
                break;
            }
        }
    }

    // A write stalled on a peer that stopped reading holds the writer lock;
    // cancellation drops it so shutdown can still close the connection.
    async fn write_message(&self, message: Message) -> Result<()> {
        let mut writer = tokio::select! {
            _ = self.scope.cancelled() => return Err(StreamError::Cancelled),
            writer = self.writer.lock() => writer,
        };
        let result = tokio::select! {
            _ = self.scope.cancelled() => Err(StreamError::Cancelled),
            result = writer.write_message(message) => result,
        };
        if let Err(e) = result {
            if !matches!(e, StreamError::Cancelled) {
                warn!("Couldn't write message, closing connection: {}", e);
                self.scope.cancel();
            }
            return Err(e);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.scope.cancel();
        self.tasks.close();
        if tokio::time::timeout(self.grace_period, self.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                "{} tasks still running {:?} after connection shutdown",
                self.tasks.len(),
                self.grace_period
            );
        }

        let close = async {
            let mut writer = self.writer.lock().await;
            writer.close().await
        };
        match tokio::time::timeout(self.grace_period, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close connection: {}", e),
            Err(_) => warn!("Connection close timed out after {:?}", self.grace_period),
        }
        debug!("Dispatch loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MessageHandler;
    use crate::transport::memory;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(2);

    /// Replies with the raw message, then returns.
    struct EchoHandler;

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn handle(&self, _: CancelScope, message: Message, reply: ReplySender) -> Result<()> {
            reply.send(message).await
        }
    }

    /// Waits for cancellation, counting how many handlers observed it.
    struct ParkHandler {
        cancelled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler for ParkHandler {
        async fn handle(&self, scope: CancelScope, _: Message, _: ReplySender) -> Result<()> {
            scope.cancelled().await;
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(&self, _: CancelScope, _: Message, _: ReplySender) -> Result<()> {
            Err(StreamError::handler("boom"))
        }
    }

    /// Accepts nothing; every write fails.
    struct BrokenSink;

    #[async_trait]
    impl MessageSink for BrokenSink {
        async fn write_message(&mut self, _: Message) -> Result<()> {
            Err(StreamError::transport("broken pipe"))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Never completes a write, like a peer that stopped reading.
    struct StalledSink {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageSink for StalledSink {
        async fn write_message(&mut self, _: Message) -> Result<()> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Sends `count` numbered replies.
    struct BurstHandler {
        count: usize,
    }

    #[async_trait]
    impl MessageHandler for BurstHandler {
        async fn handle(&self, _: CancelScope, _: Message, reply: ReplySender) -> Result<()> {
            for n in 0..self.count {
                reply.send(n.to_string()).await?;
            }
            Ok(())
        }
    }

    fn shared(handler: impl MessageHandler) -> Arc<dyn MessageHandler> {
        Arc::new(handler)
    }

    fn handlers(entries: Vec<(&str, Arc<dyn MessageHandler>)>) -> HandlerMap {
        entries
            .into_iter()
            .map(|(name, handler)| (MessageType::from(name), handler))
            .collect::<HashMap<_, _>>()
    }

    #[tokio::test]
    async fn test_routes_by_message_type() {
        let (reader, writer, mut client) = memory::pair();
        let dispatcher = MessageDispatcher::new(
            &CancelScope::default(),
            reader,
            writer,
            handlers(vec![("echo", shared(EchoHandler))]),
        );
        let task = tokio::spawn(dispatcher.run());

        client.send(r#"{"type":"echo","n":1}"#).unwrap();
        let reply = client.recv_timeout(WAIT).await.unwrap();
        assert_eq!(reply.as_bytes(), br#"{"type":"echo","n":1}"#);

        client.close().unwrap();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_type_and_bad_frames_keep_connection_open() {
        let (reader, writer, mut client) = memory::pair();
        let dispatcher = MessageDispatcher::new(
            &CancelScope::default(),
            reader,
            writer,
            handlers(vec![
                ("echo", shared(EchoHandler)),
                ("fail", shared(FailingHandler)),
            ]),
        );
        let task = tokio::spawn(dispatcher.run());

        client.send("not json").unwrap();
        client.send(r#"{"no_type":true}"#).unwrap();
        client.send(r#"{"type":"nobody-home"}"#).unwrap();
        client.send(r#"{"type":"fail"}"#).unwrap();
        client.send(r#"{"type":"echo"}"#).unwrap();

        let reply = client.recv_timeout(WAIT).await.unwrap();
        assert_eq!(reply.as_bytes(), br#"{"type":"echo"}"#);
        assert!(!task.is_finished());

        client.close().unwrap();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_cancels_every_handler() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (reader, writer, client) = memory::pair();
        let dispatcher = MessageDispatcher::new(
            &CancelScope::default(),
            reader,
            writer,
            handlers(vec![(
                "park",
                shared(ParkHandler {
                    cancelled: Arc::clone(&cancelled),
                }),
            )]),
        );
        let task = tokio::spawn(dispatcher.run());

        for _ in 0..3 {
            client.send(r#"{"type":"park"}"#).unwrap();
        }
        client.close().unwrap();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(cancelled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parent_cancel_shuts_down() {
        let parent = CancelScope::new("server");
        let (reader, writer, mut client) = memory::pair();
        let dispatcher = MessageDispatcher::new(&parent, reader, writer, HashMap::new());
        let task = tokio::spawn(dispatcher.run());

        parent.cancel();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        // Writer closed on shutdown.
        assert!(client.recv_timeout(WAIT).await.is_none());
    }

    #[tokio::test]
    async fn test_dispatcher_cancel_leaves_parent_alone() {
        let parent = CancelScope::new("server");
        let (reader, writer, _client) = memory::pair();
        let dispatcher = MessageDispatcher::new(&parent, reader, writer, HashMap::new());
        let scope = dispatcher.scope().clone();
        let task = tokio::spawn(dispatcher.run());

        scope.cancel();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_failure_closes_connection() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (reader, _writer, client) = memory::pair();
        let dispatcher = MessageDispatcher::new(
            &CancelScope::default(),
            reader,
            BrokenSink,
            handlers(vec![
                ("echo", shared(EchoHandler)),
                (
                    "park",
                    shared(ParkHandler {
                        cancelled: Arc::clone(&cancelled),
                    }),
                ),
            ]),
        );
        let scope = dispatcher.scope().clone();
        let task = tokio::spawn(dispatcher.run());

        client.send(r#"{"type":"park"}"#).unwrap();
        // Let the parked handler start before the failing write.
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.send(r#"{"type":"echo"}"#).unwrap();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(scope.is_cancelled());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_grace_period_bounds_shutdown() {
        struct StubbornHandler;

        #[async_trait]
        impl MessageHandler for StubbornHandler {
            async fn handle(&self, _: CancelScope, _: Message, _: ReplySender) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let (reader, writer, client) = memory::pair();
        let dispatcher = MessageDispatcher::new(
            &CancelScope::default(),
            reader,
            writer,
            handlers(vec![("stubborn", shared(StubbornHandler))]),
        )
        .with_grace_period(Duration::from_millis(50));
        let task = tokio::spawn(dispatcher.run());

        client.send(r#"{"type":"stubborn"}"#).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close().unwrap();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_with_stalled_write_closes_connection() {
        let closed = Arc::new(AtomicUsize::new(0));
        let (reader, _writer, client) = memory::pair();
        let dispatcher = MessageDispatcher::new(
            &CancelScope::default(),
            reader,
            StalledSink {
                closed: Arc::clone(&closed),
            },
            handlers(vec![("echo", shared(EchoHandler))]),
        );
        let scope = dispatcher.scope().clone();
        let task = tokio::spawn(dispatcher.run());

        client.send(r#"{"type":"echo"}"#).unwrap();
        // Let the relay block inside the write.
        tokio::time::sleep(Duration::from_millis(50)).await;
        scope.cancel();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_close_with_stalled_write_closes_connection() {
        let closed = Arc::new(AtomicUsize::new(0));
        let (reader, _writer, client) = memory::pair();
        let dispatcher = MessageDispatcher::new(
            &CancelScope::default(),
            reader,
            StalledSink {
                closed: Arc::clone(&closed),
            },
            handlers(vec![("echo", shared(EchoHandler))]),
        );
        let task = tokio::spawn(dispatcher.run());

        client.send(r#"{"type":"echo"}"#).unwrap();
        client.send(r#"{"type":"echo"}"#).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close().unwrap();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_small_reply_capacity_keeps_order() {
        let (reader, writer, mut client) = memory::pair();
        let dispatcher = MessageDispatcher::new(
            &CancelScope::default(),
            reader,
            writer,
            handlers(vec![("burst", shared(BurstHandler { count: 20 }))]),
        )
        .with_reply_capacity(1);
        let task = tokio::spawn(dispatcher.run());

        client.send(r#"{"type":"burst"}"#).unwrap();
        for n in 0..20 {
            let reply = client.recv_timeout(WAIT).await.unwrap();
            assert_eq!(reply.as_bytes(), n.to_string().as_bytes());
        }

        client.close().unwrap();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    }
}
