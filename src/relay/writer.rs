//! Stream writer
//!
//! Owns the response sink. Every write is followed by a flush so the client
//! sees each event as soon as it is produced, and every successful write
//! resets the activity clock used by the heartbeat policy.

use std::io;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Headers required before the first byte of an event stream
pub const STREAM_HEADERS: [(&str, &str); 4] = [
    ("content-type", "text/event-stream"),
    // Disable proxy (nginx / fastcgi) buffering
    ("x-accel-buffering", "no"),
    // Disable output compression
    ("content-encoding", "identity"),
    // Disable browser caching
    ("cache-control", "no-cache"),
];

/// Byte sink of a streaming response
pub trait StreamSink: Send {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

/// Response header setter; headers are committed by the first flush
pub trait HeaderSink {
    fn set_header(&mut self, name: &'static str, value: &'static str);
}

/// A sink that can carry both headers and the body of the stream
pub trait ResponseSink: StreamSink + HeaderSink {}

impl<T: StreamSink + HeaderSink> ResponseSink for T {}

/// Flushing writer over a response sink
pub struct StreamWriter {
    sink: Box<dyn ResponseSink>,
    last_activity: Instant,
    bytes_written: u64,
    headers_committed: bool,
    failure: Option<io::ErrorKind>,
}

impl StreamWriter {
    pub fn new(sink: Box<dyn ResponseSink>) -> Self {
        Self {
            sink,
            last_activity: Instant::now(),
            bytes_written: 0,
            headers_committed: false,
            failure: None,
        }
    }

    /// Set the event-stream headers. Only the first call has an effect.
    pub fn commit_headers(&mut self) {
        if self.headers_committed {
            return;
        }
        for (name, value) in STREAM_HEADERS {
            self.sink.set_header(name, value);
        }
        self.headers_committed = true;
    }

    /// Write `text` and flush it immediately
    ///
    /// A failed write poisons the writer: every later call fails with the
    /// same error kind without touching the sink.
    pub fn write(&mut self, text: &str) -> io::Result<()> {
        if let Some(kind) = self.failure {
            return Err(io::Error::new(kind, "stream sink already failed"));
        }

        let result = self
            .sink
            .write(text.as_bytes())
            .and_then(|_| self.sink.flush());

        match result {
            Ok(()) => {
                self.last_activity = Instant::now();
                self.bytes_written += text.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.failure = Some(e.kind());
                Err(e)
            }
        }
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Error kind of the first failed write, if any
    pub fn failure(&self) -> Option<io::ErrorKind> {
        self.failure
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("bytes_written", &self.bytes_written)
            .field("headers_committed", &self.headers_committed)
            .field("failure", &self.failure)
            .finish()
    }
}

/// In-memory response sink with shared access to what was written
///
/// Cloning shares the underlying buffer, so one handle can be given to a
/// relay while another inspects the output. `close()` simulates a client
/// disconnect: later flushes fail with `BrokenPipe`.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemorySinkState>>,
}

#[derive(Debug, Default)]
struct MemorySinkState {
    headers: Vec<(String, String)>,
    pending: Vec<u8>,
    flushed: Vec<u8>,
    flushes: usize,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything flushed so far, as text
    pub fn contents(&self) -> String {
        let state = self.lock();
        String::from_utf8_lossy(&state.flushed).into_owned()
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.lock().headers.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.lock()
            .headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    /// Make every later write and flush fail
    pub fn close(&self) {
        self.lock().closed = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySinkState> {
        // A panic while holding the lock cannot leave the buffers inconsistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StreamSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        state.pending.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        let pending = std::mem::take(&mut state.pending);
        state.flushed.extend_from_slice(&pending);
        state.flushes += 1;
        Ok(())
    }
}

impl HeaderSink for MemorySink {
    fn set_header(&mut self, name: &'static str, value: &'static str) {
        self.lock()
            .headers
            .push((name.to_string(), value.to_string()));
    }
}
