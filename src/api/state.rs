//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::bus::{BusListener, ZmqListener};
use crate::config::Config;

/// Creates one bus listener per client connection
pub type BusFactory = Arc<dyn Fn() -> Box<dyn BusListener> + Send + Sync>;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Service configuration
    pub config: Arc<Config>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    bus_factory: BusFactory,
    active_streams: Arc<AtomicUsize>,
}

impl AppState {
    /// Create an AppState whose streams listen on the configured ZeroMQ publisher
    pub fn new(config: Config) -> Self {
        let endpoint = config.bus.endpoint();
        let factory: BusFactory = Arc::new(move || {
            Box::new(ZmqListener::new(endpoint.clone())) as Box<dyn BusListener>
        });
        Self::with_bus_factory(config, factory)
    }

    /// Create an AppState with a custom bus listener factory
    pub fn with_bus_factory(config: Config, bus_factory: BusFactory) -> Self {
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            bus_factory,
            active_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// A fresh, unconnected bus listener for one stream
    pub fn open_bus(&self) -> Box<dyn BusListener> {
        (self.bus_factory)()
    }

    /// Number of streams currently being relayed
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::Relaxed)
    }

    /// Count a stream as active until the returned guard is dropped
    pub fn track_stream(&self) -> StreamGuard {
        self.active_streams.fetch_add(1, Ordering::Relaxed);
        StreamGuard {
            counter: Arc::clone(&self.active_streams),
        }
    }
}

/// Keeps a stream counted in [`AppState::active_streams`]
#[derive(Debug)]
pub struct StreamGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
