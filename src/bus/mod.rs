//! Publish/Subscribe Bus
//!
//! The relay listens to a pub/sub bus as a subscribe-only peer. Channel
//! subscriptions are prefixes applied at the transport level; every
//! inbound message is a `(channel, payload)` pair whose payload is JSON.
//!
//! ## Listeners
//!
//! - **ZmqListener**: ZeroMQ SUB socket connected to a TCP endpoint
//! - **MemoryBus**: in-process bus used by tests and embedders
//!
//! ## Example
//!
//! ```rust,no_run
//! use sse_relay::bus::{BusListener, ZmqListener};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut listener = ZmqListener::new("tcp://127.0.0.1:5556");
//!     listener.connect().await?;
//!     listener.subscribe("room1").await?;
//!
//!     let message = listener.recv().await?;
//!     println!("{}: {}", message.channel, message.decode()?);
//!     Ok(())
//! }
//! ```

mod memory;
mod zmq;

pub use memory::{MemoryBus, MemoryListener};
pub use zmq::ZmqListener;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A raw message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Build a message from transport frames: exactly `[channel, payload]`
    pub fn from_frames(frames: Vec<Vec<u8>>) -> BusResult<Self> {
        let count = frames.len();
        let mut frames = frames.into_iter();
        match (frames.next(), frames.next(), frames.next()) {
            (Some(channel), Some(payload), None) => {
                let channel = String::from_utf8(channel)
                    .map_err(|_| BusError::Malformed("channel is not valid UTF-8".to_string()))?;
                Ok(Self { channel, payload })
            }
            _ => Err(BusError::Malformed(format!(
                "expected 2 frames, got {}",
                count
            ))),
        }
    }

    /// Decode the JSON payload
    pub fn decode(&self) -> BusResult<Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Subscribe-only connection to the bus
#[async_trait]
pub trait BusListener: Send {
    /// Open the connection. Subscriptions are only valid afterwards.
    async fn connect(&mut self) -> BusResult<()>;

    /// Start receiving messages whose channel starts with `channel`
    async fn subscribe(&mut self, channel: &str) -> BusResult<()>;

    /// Drop one subscription previously made with `subscribe`
    async fn unsubscribe(&mut self, channel: &str) -> BusResult<()>;

    /// Wait for the next message. Must be cancel-safe.
    async fn recv(&mut self) -> BusResult<BusMessage>;

    /// Release the connection; further calls fail with `NotConnected`
    async fn close(&mut self);
}

#[async_trait]
impl<T: BusListener + ?Sized> BusListener for Box<T> {
    async fn connect(&mut self) -> BusResult<()> {
        (**self).connect().await
    }

    async fn subscribe(&mut self, channel: &str) -> BusResult<()> {
        (**self).subscribe(channel).await
    }

    async fn unsubscribe(&mut self, channel: &str) -> BusResult<()> {
        (**self).unsubscribe(channel).await
    }

    async fn recv(&mut self) -> BusResult<BusMessage> {
        (**self).recv().await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

/// Errors that can occur on the bus connection
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus listener is not connected")]
    NotConnected,

    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Bus closed")]
    Closed,

    #[error("Malformed bus message: {0}")]
    Malformed(String),

    #[error("Payload decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<::zeromq::ZmqError> for BusError {
    fn from(err: ::zeromq::ZmqError) -> Self {
        BusError::Socket(err.to_string())
    }
}

/// Result type alias for bus operations
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_frames() {
        let message =
            BusMessage::from_frames(vec![b"room1".to_vec(), br#"{"x":1}"#.to_vec()]).unwrap();
        assert_eq!(message.channel, "room1");
        assert_eq!(message.decode().unwrap(), json!({"x": 1}));
    }

    #[test]
    fn test_from_frames_wrong_count() {
        let result = BusMessage::from_frames(vec![b"room1".to_vec()]);
        assert!(matches!(result, Err(BusError::Malformed(_))));

        let result = BusMessage::from_frames(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(matches!(result, Err(BusError::Malformed(_))));
    }

    #[test]
    fn test_from_frames_invalid_channel() {
        let result = BusMessage::from_frames(vec![vec![0xff, 0xfe], b"{}".to_vec()]);
        assert!(matches!(result, Err(BusError::Malformed(_))));
    }

    #[test]
    fn test_decode_error() {
        let message = BusMessage::new("room1", "not json");
        assert!(matches!(message.decode(), Err(BusError::Decode(_))));
    }
}
