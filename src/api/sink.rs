//! Streaming response sink
//!
//! Bridges the synchronous [`ResponseSink`](crate::relay::ResponseSink) used
//! by the relay to an axum streaming body. Headers set by the relay are held
//! back until the first flush, then handed to the request handler so it can
//! build the response; every later flush becomes one body chunk.

use std::convert::Infallible;
use std::io;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use futures_util::stream;
use tokio::sync::{mpsc, oneshot};

use crate::api::error::{ApiError, ApiResult};
use crate::relay::{HeaderSink, StreamSink};

/// Create a connected sink / response pair
pub fn stream_channel() -> (ChannelSink, PendingStream) {
    let (commit_tx, commit_rx) = oneshot::channel();
    // Unbounded: chunks for a slow client queue in memory, there is no backpressure
    let (body_tx, body_rx) = mpsc::unbounded_channel();

    let sink = ChannelSink {
        headers: HeaderMap::new(),
        commit: Some(commit_tx),
        buffer: Vec::new(),
        body: body_tx,
    };
    let pending = PendingStream {
        headers: commit_rx,
        body: body_rx,
    };
    (sink, pending)
}

/// Relay-side end of a streaming response
#[derive(Debug)]
pub struct ChannelSink {
    headers: HeaderMap,
    commit: Option<oneshot::Sender<HeaderMap>>,
    buffer: Vec<u8>,
    body: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    /// Whether the headers have been handed to the response
    pub fn headers_committed(&self) -> bool {
        self.commit.is_none()
    }
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected")
}

impl HeaderSink for ChannelSink {
    fn set_header(&mut self, name: &'static str, value: &'static str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!(header = name, "Ignoring invalid response header"),
        }
    }
}

impl StreamSink for ChannelSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.body.is_closed() {
            return Err(client_gone());
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(commit) = self.commit.take() {
            commit
                .send(std::mem::take(&mut self.headers))
                .map_err(|_| client_gone())?;
        }

        if self.buffer.is_empty() {
            return Ok(());
        }

        let chunk = Bytes::from(std::mem::take(&mut self.buffer));
        self.body.send(chunk).map_err(|_| client_gone())
    }
}

/// Handler-side end of a streaming response
#[derive(Debug)]
pub struct PendingStream {
    headers: oneshot::Receiver<HeaderMap>,
    body: mpsc::UnboundedReceiver<Bytes>,
}

impl PendingStream {
    /// Wait for the header commit and build the streaming response
    ///
    /// The body ends when the relay drops its sink.
    pub async fn into_response(self) -> ApiResult<Response> {
        let headers = self.headers.await.map_err(|_| ApiError::StreamNotStarted)?;

        let chunks = stream::unfold(self.body, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk| (Ok::<_, Infallible>(chunk), rx))
        });

        let mut response = Response::new(Body::from_stream(chunks));
        *response.headers_mut() = headers;
        Ok(response)
    }
}
