//! Relay options
//!
//! Keep-alive and retry settings for one relay, validated once at
//! construction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::error::{RelayError, RelayResult};

/// Unvalidated relay options, as read from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayOptions {
    /// Idle seconds before a heartbeat is sent; absent disables heartbeats
    #[serde(default)]
    pub keep_alive: Option<f64>,

    /// Client reconnection delay in milliseconds; absent disables the hint
    #[serde(default)]
    pub retry_delay: Option<i64>,
}

/// Options after validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySettings {
    pub keep_alive: Option<Duration>,
    pub retry_delay: Option<u64>,
}

impl RelayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_alive(mut self, seconds: f64) -> Self {
        self.keep_alive = Some(seconds);
        self
    }

    pub fn retry_delay(mut self, millis: i64) -> Self {
        self.retry_delay = Some(millis);
        self
    }

    /// Read options from a loosely typed JSON map
    ///
    /// `keepAlive`/`keep_alive` must be a number and `retryDelay`/`retry_delay`
    /// an integer; anything else is an invalid configuration.
    pub fn from_value(value: &Value) -> RelayResult<Self> {
        let map = value.as_object().ok_or_else(|| {
            RelayError::InvalidConfig("relay options must be an object".to_string())
        })?;

        let keep_alive = match map.get("keepAlive").or_else(|| map.get("keep_alive")) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(_) => {
                return Err(RelayError::InvalidConfig(
                    "keep_alive value must be a number".to_string(),
                ))
            }
        };

        let retry_delay = match map.get("retryDelay").or_else(|| map.get("retry_delay")) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(ms) => Some(ms),
                None if n.is_u64() => {
                    return Err(RelayError::InvalidConfig(
                        "retry_delay value is out of range".to_string(),
                    ))
                }
                None => {
                    return Err(RelayError::InvalidConfig(
                        "retry_delay value must be an integer".to_string(),
                    ))
                }
            },
            Some(_) => {
                return Err(RelayError::InvalidConfig(
                    "retry_delay value must be an integer".to_string(),
                ))
            }
        };

        let options = Self {
            keep_alive,
            retry_delay,
        };
        options.validate()?;
        Ok(options)
    }

    /// Check the options and convert them into runtime settings
    pub fn validate(&self) -> RelayResult<RelaySettings> {
        let keep_alive = match self.keep_alive {
            None => None,
            Some(seconds) if !seconds.is_finite() => {
                return Err(RelayError::InvalidConfig(
                    "keep_alive value must be a finite number".to_string(),
                ))
            }
            Some(seconds) if seconds <= 0.0 => {
                return Err(RelayError::InvalidConfig(
                    "keep_alive must be greater than 0".to_string(),
                ))
            }
            Some(seconds) => Some(Duration::try_from_secs_f64(seconds).map_err(|_| {
                RelayError::InvalidConfig("keep_alive value is too large".to_string())
            })?),
        };

        let retry_delay = match self.retry_delay {
            None => None,
            Some(ms) => Some(u64::try_from(ms).map_err(|_| {
                RelayError::InvalidConfig("retry_delay must not be negative".to_string())
            })?),
        };

        Ok(RelaySettings {
            keep_alive,
            retry_delay,
        })
    }
}
