//! Heartbeat policy
//!
//! Level-triggered idle check run on every timer tick. A heartbeat is due
//! once the time since the last successful write exceeds the keep-alive
//! interval; since the heartbeat itself is a write, at most one fires per
//! idle period.

use std::time::Duration;
use tokio::time::Instant;

/// Period of the relay's heartbeat check timer
pub const HEARTBEAT_TICK: Duration = Duration::from_millis(250);

/// Decides when an idle connection needs a heartbeat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    keep_alive: Option<Duration>,
}

impl HeartbeatPolicy {
    /// `None` disables heartbeats
    pub fn new(keep_alive: Option<Duration>) -> Self {
        Self { keep_alive }
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }

    pub fn is_enabled(&self) -> bool {
        self.keep_alive.is_some()
    }

    /// Whether a heartbeat should be written at `now`
    pub fn is_due(&self, last_activity: Instant, now: Instant) -> bool {
        match self.keep_alive {
            Some(interval) => now.saturating_duration_since(last_activity) > interval,
            None => false,
        }
    }
}
