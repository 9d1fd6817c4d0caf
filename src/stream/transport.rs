use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One open bidirectional session with the feed.
#[async_trait]
pub trait StreamTransport: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Yields `None` once the peer has gone away.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StreamTransport>, TransportError>;
}
