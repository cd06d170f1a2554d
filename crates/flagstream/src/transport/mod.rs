pub mod mock;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Field of a raw push message that carries the notification JSON.
pub const MESSAGE_DATA_FIELD: &str = "data";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("streaming connect failed: {0}")]
    Connect(String),
    /// The server refused the subscription outright; reconnecting with the
    /// same token will not help.
    #[error("streaming connection rejected")]
    Rejected,
}

/// One event from the streaming connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Opened,
    /// Raw message fields as delivered by the stream.
    Message(HashMap<String, String>),
    Error { retryable: bool },
    Closed,
}

/// Seam to the streaming transport. The engine derives the token and the
/// channel list; sockets, heartbeats and wire framing live below this
/// interface.
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    /// Subscribes to `channels` using `token` and returns the event stream
    /// for this connection attempt.
    async fn connect(
        &self,
        token: &str,
        channels: &[String],
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError>;

    async fn disconnect(&self);
}
