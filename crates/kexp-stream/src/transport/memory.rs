//! In-process transport backed by tokio channels.
//!
//! [`pair`] returns the server halves handed to a `MessageDispatcher` and a
//! [`MemoryClient`] that plays the remote peer.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{MessageSink, MessageSource};
use crate::message::Message;
use crate::{Result, StreamError};

enum Frame {
    Data(Message),
    Close,
}

/// Create a connected server/client pair.
pub fn pair() -> (MemoryReader, MemoryWriter, MemoryClient) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    (
        MemoryReader { inbound: server_rx },
        MemoryWriter {
            outbound: Some(server_tx),
        },
        MemoryClient {
            outbound: client_tx,
            inbound: client_rx,
        },
    )
}

/// Server-side read half.
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl MessageSource for MemoryReader {
    async fn read_message(&mut self) -> Result<Option<Message>> {
        match self.inbound.recv().await {
            Some(Frame::Data(message)) => Ok(Some(message)),
            Some(Frame::Close) | None => Ok(None),
        }
    }
}

/// Server-side write half.
pub struct MemoryWriter {
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

#[async_trait]
impl MessageSink for MemoryWriter {
    async fn write_message(&mut self, message: Message) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| StreamError::transport("connection closed"))?;
        outbound
            .send(message)
            .map_err(|_| StreamError::transport("peer dropped the connection"))
    }

    async fn close(&mut self) -> Result<()> {
        self.outbound = None;
        Ok(())
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryClient {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedReceiver<Message>,
}

impl MemoryClient {
    /// Send a raw frame to the server.
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.outbound
            .send(Frame::Data(message.into()))
            .map_err(|_| StreamError::transport("server dropped the connection"))
    }

    /// Encode a value as JSON and send it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.send(Message::from_json(value)?)
    }

    /// Send a close frame.
    pub fn close(&self) -> Result<()> {
        self.outbound
            .send(Frame::Close)
            .map_err(|_| StreamError::transport("server dropped the connection"))
    }

    /// Receive the next frame written by the server.
    ///
    /// Returns `None` once the server closed the connection and every
    /// pending frame was drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.inbound.recv().await
    }

    /// Receive the next frame, giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Receive the next frame and decode it as JSON.
    pub async fn recv_json(&mut self, timeout: Duration) -> Option<serde_json::Value> {
        let message = self.recv_timeout(timeout).await?;
        message.decode().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_frames_reach_reader() {
        let (mut reader, _writer, client) = pair();

        client.send(r#"{"type":"call"}"#).unwrap();
        let message = reader.read_message().await.unwrap().unwrap();
        assert_eq!(message.as_bytes(), br#"{"type":"call"}"#);
    }

    #[tokio::test]
    async fn test_close_frame_ends_reads() {
        let (mut reader, _writer, client) = pair();

        client.close().unwrap();
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_client_ends_reads() {
        let (mut reader, _writer, client) = pair();

        drop(client);
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_frames_reach_client() {
        let (_reader, mut writer, mut client) = pair();

        writer.write_message(Message::from(r#"{"id":"1"}"#)).await.unwrap();
        let value = client.recv_json(Duration::from_secs(1)).await.unwrap();
        assert_eq!(value["id"], "1");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (_reader, mut writer, mut client) = pair();

        writer.close().await.unwrap();
        let result = writer.write_message(Message::from("{}")).await;
        assert!(matches!(result, Err(StreamError::Transport { .. })));
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_write_to_dropped_client_fails() {
        let (_reader, mut writer, client) = pair();

        drop(client);
        let result = writer.write_message(Message::from("{}")).await;
        assert!(result.unwrap_err().is_connection_fatal());
    }
}
