//! Stream Routes
//!
//! Server-Sent Events endpoint for one application instance.
//!
//! - GET /api/v1/streams/:instance - Open an event stream
//!
//! The stream listens on the channel named after the instance. Messages on
//! that channel drive the stream itself:
//!
//! ```json
//! {"action": "subscribe", "channel": "room1"}
//! {"action": "unsubscribe", "channel": "room1"}
//! {"action": "end"}
//! ```
//!
//! Updates from subscribed channels are forwarded as `instance` events,
//! except those authored by the viewer (`user.id`).

use axum::{
    extract::{Path, Query, State},
    response::Response,
};
use serde_json::Value;
use std::sync::Arc;

use crate::api::dto::{ControlMessage, StreamParams};
use crate::api::error::{ApiError, ApiResult};
use crate::api::sink::stream_channel;
use crate::api::state::AppState;
use crate::relay::{Event, Relay, RelayContext, RelayResult};

/// Event name of forwarded updates
pub const INSTANCE_EVENT: &str = "instance";

/// GET /api/v1/streams/:instance
///
/// Open an event stream for an instance. The relay runs in its own task
/// until an `end` control message arrives or the client disconnects.
pub async fn instance_stream(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
    Query(params): Query<StreamParams>,
) -> ApiResult<Response> {
    if instance.trim().is_empty() {
        return Err(ApiError::Validation("Instance id is empty".to_string()));
    }

    let (sink, pending) = stream_channel();
    let mut relay: Relay = Relay::new(&state.config.relay, sink, state.open_bus())?;
    relay.subscribe(instance.clone(), instance_controller(params.viewer));

    let relay_id = relay.id();
    let guard = state.track_stream();
    tracing::info!(relay_id = %relay_id, instance = %instance, "Opening instance stream");

    tokio::spawn(async move {
        let _guard = guard;
        match relay.start().await {
            Ok(()) => tracing::debug!(relay_id = %relay_id, "Instance stream ended"),
            Err(e) => tracing::debug!(relay_id = %relay_id, error = %e, "Instance stream closed"),
        }
    });

    pending.into_response().await
}

/// Handler for the instance control channel
fn instance_controller(
    viewer: Option<String>,
) -> impl Fn(&mut RelayContext, Value) -> RelayResult<()> + Send + Sync + 'static {
    move |ctx: &mut RelayContext, payload: Value| {
        let message: ControlMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(relay_id = %ctx.id(), error = %e, "Ignoring malformed control message");
                return Ok(());
            }
        };

        match message {
            ControlMessage::Subscribe { channel } => {
                let viewer = viewer.clone();
                ctx.subscribe(channel, move |ctx: &mut RelayContext, data: Value| {
                    forward_update(ctx, data, viewer.as_deref())
                });
                Ok(())
            }
            ControlMessage::Unsubscribe { channel } => {
                ctx.unsubscribe(&channel);
                Ok(())
            }
            ControlMessage::End => ctx.end(),
        }
    }
}

fn forward_update(ctx: &mut RelayContext, data: Value, viewer: Option<&str>) -> RelayResult<()> {
    if let Some(viewer) = viewer {
        if author_id(&data).as_deref() == Some(viewer) {
            tracing::trace!(relay_id = %ctx.id(), "Skipping update authored by viewer");
            return Ok(());
        }
    }
    ctx.send_event(Event::new(data).name(INSTANCE_EVENT))
}

/// `user.id` of an update, numbers rendered as strings
fn author_id(data: &Value) -> Option<String> {
    match data.pointer("/user/id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
