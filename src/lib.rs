//! # SSE Relay
//!
//! Streams messages published on a publish/subscribe bus to long-lived HTTP
//! client connections using the Server-Sent Events wire format.
//!
//! ## Features
//!
//! - **Relay engine**: One connection per relay, driven by bus messages and a heartbeat timer
//! - **Dynamic subscriptions**: Channel handlers may subscribe or unsubscribe while streaming
//! - **Keep-alive**: Heartbeat comments on idle connections, optional client retry hint
//! - **ZeroMQ transport**: SUB socket listener, plus an in-process bus for embedding and tests
//!
//! ## Modules
//!
//! - [`relay`]: Relay engine, event encoding and stream writer
//! - [`bus`]: Bus listener interface and transports
//! - [`api`]: HTTP server with Axum
//! - [`config`]: File and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sse_relay::bus::MemoryBus;
//! use sse_relay::relay::{MemorySink, Relay, RelayOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MemoryBus::default();
//!     let sink = MemorySink::new();
//!
//!     let options = RelayOptions::new().keep_alive(2.0);
//!     let mut relay = Relay::new(&options, sink.clone(), bus.listener())?;
//!
//!     relay.subscribe("room1", |ctx, data| {
//!         ctx.send_event(data)?;
//!         ctx.end()
//!     });
//!
//!     let publisher = bus.clone();
//!     tokio::spawn(async move {
//!         tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//!         publisher.publish("room1", r#"{"hello":"world"}"#);
//!     });
//!
//!     relay.start().await?;
//!     println!("{}", sink.contents());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bus;
pub mod config;
pub mod relay;

// Re-export top-level types for convenience
pub use relay::{
    ConnectionState, Event, EventInput, Relay, RelayContext, RelayError, RelayOptions,
    RelayResult, RelayStats,
};

pub use bus::{BusError, BusListener, BusMessage, BusResult, MemoryBus, ZmqListener};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{ApiConfig, BusConfig, Config, ConfigError, LoggingConfig};
