//! Subscription registry
//!
//! Maps channel names to the handlers that decide what to do with each
//! incoming bus message. One handler per channel; re-registering a channel
//! replaces its handler.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::engine::RelayContext;
use super::error::RelayResult;

/// Application callback invoked with the decoded payload of a bus message
pub type Handler = Arc<dyn Fn(&mut RelayContext, Value) -> RelayResult<()> + Send + Sync>;

/// Channel → handler mapping owned by one relay
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: HashMap<String, Handler>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or overwrite the handler for `channel`
    ///
    /// Returns `true` if the channel was not registered before.
    pub fn insert(&mut self, channel: impl Into<String>, handler: Handler) -> bool {
        self.handlers.insert(channel.into(), handler).is_none()
    }

    /// Remove the handler for `channel`, returning whether one existed
    pub fn remove(&mut self, channel: &str) -> bool {
        self.handlers.remove(channel).is_some()
    }

    /// Look up the handler for an exact channel name
    pub fn get(&self, channel: &str) -> Option<Handler> {
        self.handlers.get(channel).cloned()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.handlers.contains_key(channel)
    }

    /// Registered channel names, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.handlers.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}
