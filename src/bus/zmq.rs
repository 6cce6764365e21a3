//! ZeroMQ bus listener
//!
//! Connects a SUB socket to the publisher endpoint. ZeroMQ applies channel
//! subscriptions as prefix filters and counts them, so every `subscribe`
//! must be matched by one `unsubscribe`.

use async_trait::async_trait;
use zeromq::{Socket, SocketRecv, SubSocket};

use super::{BusError, BusListener, BusMessage, BusResult};

/// Subscribe-only ZeroMQ peer
pub struct ZmqListener {
    endpoint: String,
    socket: Option<SubSocket>,
}

impl ZmqListener {
    /// Create a listener for an endpoint such as `tcp://127.0.0.1:5556`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            socket: None,
        }
    }

    /// Listener for a publisher on the loopback interface
    pub fn loopback(port: u16) -> Self {
        Self::new(format!("tcp://127.0.0.1:{}", port))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn socket_mut(&mut self) -> BusResult<&mut SubSocket> {
        self.socket.as_mut().ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl BusListener for ZmqListener {
    async fn connect(&mut self) -> BusResult<()> {
        let mut socket = SubSocket::new();
        socket
            .connect(&self.endpoint)
            .await
            .map_err(|e| BusError::Connect {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(endpoint = %self.endpoint, "Connected to bus");
        self.socket = Some(socket);
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> BusResult<()> {
        self.socket_mut()?.subscribe(channel).await?;
        tracing::trace!(channel = %channel, "Bus subscribe");
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> BusResult<()> {
        self.socket_mut()?.unsubscribe(channel).await?;
        tracing::trace!(channel = %channel, "Bus unsubscribe");
        Ok(())
    }

    async fn recv(&mut self) -> BusResult<BusMessage> {
        let socket = self.socket_mut()?;
        loop {
            let message = socket.recv().await?;
            let frames = message
                .into_vec()
                .into_iter()
                .map(|frame| frame.to_vec())
                .collect();

            match BusMessage::from_frames(frames) {
                Ok(message) => return Ok(message),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed bus message");
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            let errors = socket.close().await;
            for error in errors {
                tracing::debug!(error = %error, "Error while closing bus socket");
            }
            tracing::debug!(endpoint = %self.endpoint, "Bus connection closed");
        }
    }
}

impl std::fmt::Debug for ZmqListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZmqListener")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.socket.is_some())
            .finish()
    }
}
