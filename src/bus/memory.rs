//! In-process bus
//!
//! A publisher backed by a tokio broadcast channel. Listeners created from
//! it behave like ZeroMQ SUB sockets: nothing is received before `connect`,
//! and subscriptions are counted prefix filters.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{BusError, BusListener, BusMessage, BusResult};

/// Publisher side of the in-process bus
#[derive(Debug, Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a raw payload on `channel`
    ///
    /// Returns the number of connected listeners the message reached.
    pub fn publish(&self, channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> usize {
        self.sender
            .send(BusMessage::new(channel, payload))
            .unwrap_or(0)
    }

    /// Publish a JSON value on `channel`
    pub fn publish_json(&self, channel: impl Into<String>, value: &serde_json::Value) -> usize {
        self.publish(channel, value.to_string())
    }

    /// Create a new, unconnected listener
    pub fn listener(&self) -> MemoryListener {
        MemoryListener {
            sender: self.sender.clone(),
            receiver: None,
            prefixes: Vec::new(),
        }
    }

    /// Number of connected listeners
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Subscriber side of the in-process bus
#[derive(Debug)]
pub struct MemoryListener {
    sender: broadcast::Sender<BusMessage>,
    receiver: Option<broadcast::Receiver<BusMessage>>,
    prefixes: Vec<String>,
}

impl MemoryListener {
    /// Active subscription prefixes, one entry per `subscribe` call
    pub fn subscriptions(&self) -> &[String] {
        &self.prefixes
    }

    fn matches(&self, channel: &str) -> bool {
        self.prefixes.iter().any(|prefix| channel.starts_with(prefix.as_str()))
    }
}

#[async_trait]
impl BusListener for MemoryListener {
    async fn connect(&mut self) -> BusResult<()> {
        self.receiver = Some(self.sender.subscribe());
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> BusResult<()> {
        if self.receiver.is_none() {
            return Err(BusError::NotConnected);
        }
        self.prefixes.push(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> BusResult<()> {
        if self.receiver.is_none() {
            return Err(BusError::NotConnected);
        }
        if let Some(pos) = self.prefixes.iter().position(|p| p == channel) {
            self.prefixes.remove(pos);
        }
        Ok(())
    }

    async fn recv(&mut self) -> BusResult<BusMessage> {
        loop {
            let receiver = self.receiver.as_mut().ok_or(BusError::NotConnected)?;
            match receiver.recv().await {
                Ok(message) => {
                    if self.matches(&message.channel) {
                        return Ok(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Memory bus listener lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }

    async fn close(&mut self) {
        self.receiver = None;
        self.prefixes.clear();
    }
}
