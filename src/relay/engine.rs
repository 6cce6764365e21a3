//! Relay Engine
//!
//! Drives one client connection: writes the stream preamble, then runs a
//! cooperative loop multiplexing bus messages and heartbeat ticks until a
//! handler calls [`RelayContext::end`] or the stream breaks.
//!
//! ```text
//! NotStarted --start()--> Running --end()--> Stopped
//! ```
//!
//! Handlers run one at a time on the relay's task and receive the
//! [`RelayContext`] by mutable reference, so they can send events or change
//! subscriptions without any locking. Bus subscribe/unsubscribe calls made
//! from a handler are queued and applied before the next message is read.

use serde_json::Value;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::error::{RelayError, RelayResult};
use super::event::{encode_retry, EventInput, HEARTBEAT, PREAMBLE};
use super::heartbeat::{HeartbeatPolicy, HEARTBEAT_TICK};
use super::options::{RelayOptions, RelaySettings};
use super::registry::SubscriptionRegistry;
use super::writer::{ResponseSink, StreamWriter};
use crate::bus::{BusListener, BusMessage};

/// Lifecycle of a relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotStarted,
    Running,
    /// Terminal; a stopped relay cannot be restarted
    Stopped,
}

/// Counters for one relay connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub events_sent: u64,
    pub heartbeats_sent: u64,
    pub messages_dispatched: u64,
    pub messages_dropped: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BusCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Connection state shared with every handler
#[derive(Debug)]
pub struct RelayContext {
    id: Uuid,
    state: ConnectionState,
    settings: RelaySettings,
    heartbeat: HeartbeatPolicy,
    registry: SubscriptionRegistry,
    writer: StreamWriter,
    bus_connected: bool,
    pending: VecDeque<BusCommand>,
    preamble_sent: bool,
    stats: RelayStats,
}

impl RelayContext {
    fn new(settings: RelaySettings, sink: Box<dyn ResponseSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ConnectionState::NotStarted,
            settings,
            heartbeat: HeartbeatPolicy::new(settings.keep_alive),
            registry: SubscriptionRegistry::new(),
            writer: StreamWriter::new(sink),
            bus_connected: false,
            pending: VecDeque::new(),
            preamble_sent: false,
            stats: RelayStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ConnectionState::Running
    }

    pub fn preamble_sent(&self) -> bool {
        self.preamble_sent
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            bytes_written: self.writer.bytes_written(),
            ..self.stats
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.registry.contains(channel)
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.registry.channels()
    }

    /// Register `handler` for `channel`, replacing any previous handler
    ///
    /// Legal in any state. Once the bus is connected the channel is also
    /// subscribed on the transport, but only the first time it is registered.
    pub fn subscribe<F>(&mut self, channel: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&mut RelayContext, Value) -> RelayResult<()> + Send + Sync + 'static,
    {
        let channel = channel.into();
        let added = self.registry.insert(channel.clone(), Arc::new(handler));
        if added && self.bus_connected {
            self.pending.push_back(BusCommand::Subscribe(channel.clone()));
        }

        tracing::debug!(
            relay_id = %self.id,
            channel = %channel,
            replaced = !added,
            "Subscribed to channel"
        );
        self
    }

    /// Remove the handler for `channel`; unknown channels are ignored
    pub fn unsubscribe(&mut self, channel: &str) -> &mut Self {
        if self.registry.remove(channel) {
            if self.bus_connected {
                self.pending
                    .push_back(BusCommand::Unsubscribe(channel.to_string()));
            }
            tracing::debug!(relay_id = %self.id, channel = %channel, "Unsubscribed from channel");
        }
        self
    }

    /// Encode and write an event
    ///
    /// Accepts a JSON object/array payload or a pre-built [`Event`](super::Event).
    pub fn send_event(&mut self, event: impl Into<EventInput>) -> RelayResult<()> {
        let event = event.into().into_event()?;
        self.write(&event.encode())?;
        self.stats.events_sent += 1;

        tracing::trace!(
            relay_id = %self.id,
            event = ?event.event_name(),
            "Event sent"
        );
        Ok(())
    }

    /// Write a heartbeat comment regardless of idle time
    pub fn send_heartbeat(&mut self) -> RelayResult<()> {
        self.write(HEARTBEAT)?;
        self.stats.heartbeats_sent += 1;
        Ok(())
    }

    /// Send a heartbeat if the connection has been idle past the keep-alive
    ///
    /// Returns whether a heartbeat was written.
    pub fn keep_alive(&mut self) -> RelayResult<bool> {
        if !self.heartbeat.is_due(self.writer.last_activity(), Instant::now()) {
            return Ok(false);
        }
        self.send_heartbeat()?;
        Ok(true)
    }

    /// Stop the relay; the loop exits once the current callback returns
    pub fn end(&mut self) -> RelayResult<()> {
        if !self.is_running() {
            return Err(RelayError::NotRunning);
        }
        self.state = ConnectionState::Stopped;
        tracing::debug!(relay_id = %self.id, "Relay end requested");
        Ok(())
    }

    /// Commit headers and open the stream
    ///
    /// The stream always opens with the `:empty` preamble; the `retry:` line,
    /// when configured, follows it immediately.
    fn begin(&mut self) -> RelayResult<()> {
        if self.state != ConnectionState::NotStarted {
            return Err(RelayError::AlreadyStarted);
        }

        self.writer.commit_headers();
        self.state = ConnectionState::Running;

        self.write(PREAMBLE)?;
        self.preamble_sent = true;

        if let Some(millis) = self.settings.retry_delay {
            self.write(&encode_retry(millis))?;
        }
        Ok(())
    }

    fn write(&mut self, text: &str) -> RelayResult<()> {
        if !self.is_running() {
            return Err(RelayError::NotRunning);
        }

        if let Err(e) = self.writer.write(text) {
            tracing::warn!(
                relay_id = %self.id,
                error = %e,
                "Stream write failed, stopping relay"
            );
            self.state = ConnectionState::Stopped;
            return Err(RelayError::Transport(e));
        }
        Ok(())
    }

    fn halt(&mut self) {
        if self.state == ConnectionState::Running {
            self.state = ConnectionState::Stopped;
        }
    }
}

/// Relay engine bound to one client connection
pub struct Relay<B: BusListener = Box<dyn BusListener>> {
    ctx: RelayContext,
    bus: B,
}

impl<B: BusListener> Relay<B> {
    /// Create a relay writing to `sink` and listening on `bus`
    ///
    /// Fails with [`RelayError::InvalidConfig`] if the options are invalid.
    pub fn new<S>(options: &RelayOptions, sink: S, bus: B) -> RelayResult<Self>
    where
        S: ResponseSink + 'static,
    {
        let settings = options.validate()?;
        Ok(Self {
            ctx: RelayContext::new(settings, Box::new(sink)),
            bus,
        })
    }

    pub fn id(&self) -> Uuid {
        self.ctx.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    pub fn stats(&self) -> RelayStats {
        self.ctx.stats()
    }

    pub fn context(&self) -> &RelayContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RelayContext {
        &mut self.ctx
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn subscribe<F>(&mut self, channel: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&mut RelayContext, Value) -> RelayResult<()> + Send + Sync + 'static,
    {
        self.ctx.subscribe(channel, handler);
        self
    }

    pub fn unsubscribe(&mut self, channel: &str) -> &mut Self {
        self.ctx.unsubscribe(channel);
        self
    }

    pub fn send_event(&mut self, event: impl Into<EventInput>) -> RelayResult<()> {
        self.ctx.send_event(event)
    }

    pub fn send_heartbeat(&mut self) -> RelayResult<()> {
        self.ctx.send_heartbeat()
    }

    pub fn end(&mut self) -> RelayResult<()> {
        self.ctx.end()
    }

    /// Run the connection until it is stopped
    ///
    /// Writes the preamble, connects the bus, replays registered channels
    /// and then processes bus messages and heartbeat ticks. Returns once a
    /// handler has called `end()` (`Ok`), or when the stream or the bus
    /// failed (`Err`). The bus connection is released before returning.
    pub async fn start(&mut self) -> RelayResult<()> {
        self.ctx.begin()?;

        tracing::info!(
            relay_id = %self.ctx.id,
            keep_alive = ?self.ctx.settings.keep_alive,
            retry_delay = ?self.ctx.settings.retry_delay,
            channels = self.ctx.registry.len(),
            "Relay started"
        );

        let result = self.run().await;
        self.ctx.halt();
        self.release().await;

        let stats = self.ctx.stats();
        match &result {
            Ok(()) => tracing::info!(
                relay_id = %self.ctx.id,
                events = stats.events_sent,
                heartbeats = stats.heartbeats_sent,
                bytes = stats.bytes_written,
                "Relay stopped"
            ),
            Err(e) => tracing::warn!(
                relay_id = %self.ctx.id,
                error = %e,
                events = stats.events_sent,
                heartbeats = stats.heartbeats_sent,
                "Relay terminated"
            ),
        }

        result
    }

    async fn run(&mut self) -> RelayResult<()> {
        self.bus.connect().await?;
        self.ctx.bus_connected = true;

        for channel in self.ctx.registry.channels() {
            self.bus.subscribe(&channel).await?;
        }
        self.ctx.pending.clear();

        let mut ticker = tokio::time::interval(HEARTBEAT_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first immediate tick
        ticker.tick().await;

        while self.ctx.is_running() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.ctx.keep_alive()?;
                }
                received = self.bus.recv() => {
                    self.dispatch(received?)?;
                }
            }
            self.apply_pending().await?;
        }

        // A handler may have swallowed a transport error
        match self.ctx.writer.failure() {
            Some(kind) => Err(RelayError::Transport(io::Error::new(
                kind,
                "stream sink failed",
            ))),
            None => Ok(()),
        }
    }

    fn dispatch(&mut self, message: BusMessage) -> RelayResult<()> {
        let Some(handler) = self.ctx.registry.get(&message.channel) else {
            self.ctx.stats.messages_dropped += 1;
            tracing::trace!(
                relay_id = %self.ctx.id,
                channel = %message.channel,
                "No handler for channel, message dropped"
            );
            return Ok(());
        };

        let payload = match message.decode() {
            Ok(payload) => payload,
            Err(e) => {
                self.ctx.stats.messages_dropped += 1;
                tracing::warn!(
                    relay_id = %self.ctx.id,
                    channel = %message.channel,
                    error = %e,
                    "Undecodable bus payload dropped"
                );
                return Ok(());
            }
        };

        self.ctx.stats.messages_dispatched += 1;
        match handler(&mut self.ctx, payload) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(
                    relay_id = %self.ctx.id,
                    channel = %message.channel,
                    error = %e,
                    "Channel handler failed"
                );
                Ok(())
            }
        }
    }

    async fn apply_pending(&mut self) -> RelayResult<()> {
        while let Some(command) = self.ctx.pending.pop_front() {
            match command {
                BusCommand::Subscribe(channel) => self.bus.subscribe(&channel).await?,
                BusCommand::Unsubscribe(channel) => self.bus.unsubscribe(&channel).await?,
            }
        }
        Ok(())
    }

    async fn release(&mut self) {
        if !self.ctx.bus_connected {
            return;
        }
        self.ctx.bus_connected = false;
        self.ctx.pending.clear();

        for channel in self.ctx.registry.channels() {
            if let Err(e) = self.bus.unsubscribe(&channel).await {
                tracing::debug!(
                    relay_id = %self.ctx.id,
                    channel = %channel,
                    error = %e,
                    "Failed to release bus subscription"
                );
            }
        }
        self.bus.close().await;
    }
}

impl<B: BusListener> std::fmt::Debug for Relay<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay").field("ctx", &self.ctx).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, MemoryListener, ZmqListener};
    use crate::relay::{Event, MemorySink};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn relay_with(options: RelayOptions) -> (Relay<MemoryListener>, MemorySink, MemoryBus) {
        let bus = MemoryBus::default();
        let sink = MemorySink::new();
        let relay = Relay::new(&options, sink.clone(), bus.listener()).unwrap();
        (relay, sink, bus)
    }

    /// Publish each message after waiting the given number of milliseconds
    fn publish_script(bus: &MemoryBus, steps: Vec<(u64, &'static str, Value)>) -> JoinHandle<()> {
        let bus = bus.clone();
        tokio::spawn(async move {
            for (delay_ms, channel, payload) in steps {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                bus.publish_json(channel, &payload);
            }
        })
    }

    fn forward(ctx: &mut RelayContext, data: Value) -> RelayResult<()> {
        ctx.send_event(data)
    }

    fn control(ctx: &mut RelayContext, data: Value) -> RelayResult<()> {
        let channel = data["channel"].as_str().unwrap_or_default().to_string();
        match data["action"].as_str() {
            Some("end") => ctx.end(),
            Some("subscribe") => {
                ctx.subscribe(channel, forward);
                Ok(())
            }
            Some("unsubscribe") => {
                ctx.unsubscribe(&channel);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn counter(
        hits: &Arc<AtomicUsize>,
    ) -> impl Fn(&mut RelayContext, Value) -> RelayResult<()> + Send + Sync + 'static {
        let hits = Arc::clone(hits);
        move |_ctx: &mut RelayContext, _data: Value| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let bus = MemoryBus::default();
        for options in [
            RelayOptions::new().keep_alive(0.0),
            RelayOptions::new().keep_alive(-2.0),
            RelayOptions::new().retry_delay(-1),
        ] {
            let result = Relay::new(&options, MemorySink::new(), bus.listener());
            assert!(matches!(result, Err(RelayError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_operations_fail_before_start() {
        let (mut relay, sink, _bus) = relay_with(RelayOptions::default());
        assert_eq!(relay.state(), ConnectionState::NotStarted);

        assert!(matches!(
            relay.send_event(json!({"x": 1})),
            Err(RelayError::NotRunning)
        ));
        assert!(matches!(relay.send_heartbeat(), Err(RelayError::NotRunning)));
        assert!(matches!(relay.end(), Err(RelayError::NotRunning)));
        assert!(matches!(
            relay.send_event(json!("scalar")),
            Err(RelayError::InvalidEvent(_))
        ));

        assert_eq!(sink.contents(), "");
    }

    #[test]
    fn test_subscribe_before_start_is_legal() {
        let (mut relay, _sink, _bus) = relay_with(RelayOptions::default());
        relay.subscribe("room1", forward).subscribe("room2", forward);
        relay.unsubscribe("never");
        relay.unsubscribe("room2");

        assert_eq!(relay.context().subscribed_channels(), vec!["room1"]);
        assert!(relay.context().is_subscribed("room1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_stream() {
        let (mut relay, sink, bus) =
            relay_with(RelayOptions::new().keep_alive(2.0).retry_delay(2));
        relay.subscribe("room1", forward).subscribe("control", control);

        let script = publish_script(
            &bus,
            vec![
                (2600, "room1", json!({"x": 1})),
                (100, "control", json!({"action": "end"})),
            ],
        );

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(relay.state(), ConnectionState::Stopped);
        assert_eq!(
            sink.contents(),
            ":empty\n\nretry:2\n\n:heartbeat\n\ndata:{\"x\":1}\n\n"
        );
        assert_eq!(sink.header("content-type").as_deref(), Some("text/event-stream"));

        let stats = relay.stats();
        assert_eq!(stats.events_sent, 1);
        assert_eq!(stats.heartbeats_sent, 1);
        assert_eq!(stats.messages_dispatched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_without_keep_alive() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::default());
        relay.subscribe("control", control);

        let script = publish_script(&bus, vec![(10_000, "control", json!({"action": "end"}))]);

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(sink.contents(), ":empty\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_once_per_idle_period() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::new().keep_alive(1.0));
        relay.subscribe("control", control);

        let script = publish_script(&bus, vec![(3100, "control", json!({"action": "end"}))]);

        relay.start().await.unwrap();
        script.await.unwrap();

        // Ticks at 1250 ms and 2500 ms are the first ones past each idle threshold
        assert_eq!(sink.contents(), ":empty\n\n:heartbeat\n\n:heartbeat\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_resets_idle_clock() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::new().keep_alive(1.0));
        relay.subscribe("room1", forward).subscribe("control", control);

        let script = publish_script(
            &bus,
            vec![
                (900, "room1", json!({"n": 1})),
                (900, "room1", json!({"n": 2})),
                (900, "control", json!({"action": "end"})),
            ],
        );

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(
            sink.contents(),
            ":empty\n\ndata:{\"n\":1}\n\ndata:{\"n\":2}\n\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let (mut relay, _sink, bus) = relay_with(RelayOptions::default());
        relay.subscribe("control", control);

        let script = publish_script(&bus, vec![(100, "control", json!({"action": "end"}))]);
        relay.start().await.unwrap();
        script.await.unwrap();

        assert!(matches!(relay.start().await, Err(RelayError::AlreadyStarted)));
        assert!(matches!(
            relay.send_event(json!({"x": 1})),
            Err(RelayError::NotRunning)
        ));
        assert!(matches!(relay.send_heartbeat(), Err(RelayError::NotRunning)));
        assert!(matches!(relay.end(), Err(RelayError::NotRunning)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery() {
        let (mut relay, _sink, bus) = relay_with(RelayOptions::default());
        let hits = Arc::new(AtomicUsize::new(0));
        relay
            .subscribe("room1", counter(&hits))
            .subscribe("control", control);

        let script = publish_script(
            &bus,
            vec![
                (100, "room1", json!({})),
                (100, "control", json!({"action": "unsubscribe", "channel": "room1"})),
                (100, "room1", json!({})),
                (100, "control", json!({"action": "unsubscribe", "channel": "never"})),
                (100, "control", json!({"action": "end"})),
            ],
        );

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!relay.context().is_subscribed("room1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_replaces_handler() {
        let (mut relay, _sink, bus) = relay_with(RelayOptions::default());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        relay
            .subscribe("room1", counter(&first))
            .subscribe("room1", counter(&second))
            .subscribe("control", control);

        let script = publish_script(
            &bus,
            vec![
                (100, "room1", json!({})),
                (100, "control", json!({"action": "end"})),
            ],
        );

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_subscribes_live() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::default());
        relay.subscribe("control", control);

        let script = publish_script(
            &bus,
            vec![
                (100, "room2", json!({"before": true})),
                (100, "control", json!({"action": "subscribe", "channel": "room2"})),
                (100, "room2", json!({"y": 2})),
                (100, "control", json!({"action": "end"})),
            ],
        );

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(sink.contents(), ":empty\n\ndata:{\"y\":2}\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_channel_and_bad_payload_dropped() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::default());
        relay.subscribe("room1", forward).subscribe("control", control);

        let publisher = bus.clone();
        let script = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            // Passes the transport prefix filter but has no exact handler
            publisher.publish("room10", r#"{"x":10}"#);
            publisher.publish("room1", "not json");
            publisher.publish("room1", r#"{"x":1}"#);
            tokio::time::sleep(Duration::from_millis(100)).await;
            publisher.publish("control", r#"{"action":"end"}"#);
        });

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(sink.contents(), ":empty\n\ndata:{\"x\":1}\n\n");
        let stats = relay.stats();
        assert_eq!(stats.messages_dropped, 2);
        assert_eq!(stats.messages_dispatched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_sends_prebuilt_event() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::default());
        relay
            .subscribe("room1", |ctx, data| {
                ctx.send_event(Event::new(data).name("instance").id("7"))?;
                ctx.end()
            });

        let script = publish_script(&bus, vec![(100, "room1", json!({"x": 1}))]);

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(
            sink.contents(),
            ":empty\n\nevent:instance\ndata:{\"x\":1}\nid:7\n\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_event_from_handler_is_not_fatal() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::default());
        relay
            .subscribe("room1", |ctx, _data| ctx.send_event(json!(5)))
            .subscribe("control", control);

        let script = publish_script(
            &bus,
            vec![
                (100, "room1", json!({})),
                (100, "control", json!({"action": "end"})),
            ],
        );

        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(sink.contents(), ":empty\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_terminates_loop() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::new().keep_alive(1.0));
        relay.subscribe("control", control);

        let client = sink.clone();
        let disconnect = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            client.close();
        });

        let result = relay.start().await;
        disconnect.await.unwrap();

        assert!(matches!(result, Err(RelayError::Transport(_))));
        assert_eq!(relay.state(), ConnectionState::Stopped);
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(sink.contents(), ":empty\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_swallowed_transport_error_still_stops() {
        let (mut relay, sink, bus) = relay_with(RelayOptions::default());
        relay.subscribe("room1", |ctx, data| {
            let _ = ctx.send_event(data);
            Ok(())
        });

        sink.close();
        let script = publish_script(&bus, vec![(100, "room1", json!({"x": 1}))]);

        // The preamble write already fails on a closed sink
        let result = relay.start().await;
        assert!(matches!(result, Err(RelayError::Transport(_))));
        assert_eq!(bus.listener_count(), 0);
        script.abort();

        let (mut relay, sink, bus) = relay_with(RelayOptions::default());
        relay.subscribe("room1", |ctx, data| {
            let _ = ctx.send_event(data);
            Ok(())
        });

        let client = sink.clone();
        let publisher = bus.clone();
        let script = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.close();
            publisher.publish("room1", r#"{"x":1}"#);
        });

        let result = relay.start().await;
        script.await.unwrap();

        assert!(matches!(result, Err(RelayError::Transport(_))));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_released_after_end() {
        let (mut relay, _sink, bus) = relay_with(RelayOptions::default());
        relay.subscribe("control", control);

        let script = publish_script(&bus, vec![(100, "control", json!({"action": "end"}))]);
        relay.start().await.unwrap();
        script.await.unwrap();

        assert_eq!(bus.listener_count(), 0);
        assert!(relay.bus().subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_bus_connect_failure() {
        let sink = MemorySink::new();
        let mut relay = Relay::new(
            &RelayOptions::default(),
            sink.clone(),
            ZmqListener::new("not-an-endpoint"),
        )
        .unwrap();

        let result = relay.start().await;
        assert!(matches!(result, Err(RelayError::Bus(_))));
        assert_eq!(relay.state(), ConnectionState::Stopped);
        assert_eq!(sink.contents(), ":empty\n\n");
    }

    #[tokio::test]
    async fn test_boxed_listener() {
        let bus = MemoryBus::default();
        let listener: Box<dyn BusListener> = Box::new(bus.listener());
        let mut relay: Relay = Relay::new(&RelayOptions::default(), MemorySink::new(), listener).unwrap();
        relay.subscribe("room1", |ctx, _data| ctx.end());

        let publisher = bus.clone();
        let script = tokio::spawn(async move {
            while publisher.listener_count() == 0 {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish("room1", "{}");
        });

        relay.start().await.unwrap();
        script.await.unwrap();
        assert_eq!(relay.state(), ConnectionState::Stopped);
    }
}
