//! SSE Relay Core
//!
//! Streams messages from a publish/subscribe bus to one long-lived client
//! connection using the Server-Sent Events wire format.
//!
//! - **event**: Event value and wire encoding
//! - **heartbeat**: Idle keep-alive policy
//! - **registry**: Channel → handler mapping
//! - **writer**: Flushing stream writer and sink interfaces
//! - **engine**: The relay loop and the handler context
//! - **options**: Keep-alive / retry options and validation
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Bus message:
//!   BusListener → Registry lookup → handler(ctx, payload) → send_event → Encoder → Writer → flush
//!
//! Timer tick (250 ms):
//!   HeartbeatPolicy → send_heartbeat → Writer → flush
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sse_relay::bus::ZmqListener;
//! use sse_relay::relay::{Event, MemorySink, Relay, RelayOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = RelayOptions::new().keep_alive(2.0).retry_delay(2000);
//!     let mut relay = Relay::new(&options, MemorySink::new(), ZmqListener::loopback(5556))?;
//!
//!     relay.subscribe("room1", |ctx, data| {
//!         ctx.send_event(Event::new(data).name("room"))
//!     });
//!
//!     // Runs until a handler calls `ctx.end()` or the client goes away
//!     relay.start().await?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod options;
pub mod registry;
pub mod writer;

// Re-export commonly used types
pub use engine::{ConnectionState, Relay, RelayContext, RelayStats};
pub use error::{RelayError, RelayResult};
pub use event::{encode_retry, Event, EventInput, HEARTBEAT, PREAMBLE};
pub use heartbeat::{HeartbeatPolicy, HEARTBEAT_TICK};
pub use options::{RelayOptions, RelaySettings};
pub use registry::{Handler, SubscriptionRegistry};
pub use writer::{HeaderSink, MemorySink, ResponseSink, StreamSink, StreamWriter, STREAM_HEADERS};
