//! Data Transfer Objects
//!
//! Request and response types for the API endpoints, plus the control
//! messages published on an instance channel.

use serde::{Deserialize, Serialize};

// ============================================
// STREAM DTOs
// ============================================

/// Query parameters of `GET /api/v1/streams/:instance`
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Updates authored by this user id are not forwarded
    #[serde(default)]
    pub viewer: Option<String>,
}

/// Control message published on an instance's own channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Start forwarding updates from `channel`
    Subscribe { channel: String },
    /// Stop forwarding updates from `channel`
    Unsubscribe { channel: String },
    /// Close the stream
    End,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: String,
    /// Streams currently open
    pub active_streams: usize,
    /// Publisher endpoint the streams listen on
    pub bus_endpoint: String,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
