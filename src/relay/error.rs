//! Relay error types
//!
//! Defines all errors that can occur while driving a relay connection.

use thiserror::Error;

use crate::bus::BusError;

/// Errors that can occur in the relay engine
#[derive(Error, Debug)]
pub enum RelayError {
    /// Keep-alive or retry options failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A send, heartbeat or end was attempted outside the Running state
    #[error("The relay is not running")]
    NotRunning,

    /// `start()` was called on a relay that already ran
    #[error("The relay has already been started")]
    AlreadyStarted,

    /// The value given to `send_event` is neither a payload nor an event
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Writing or flushing the response stream failed
    #[error("Transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// The pub/sub bus connection failed
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl RelayError {
    /// Whether this error terminates the connection's event loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Transport(_) | RelayError::Bus(_))
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
