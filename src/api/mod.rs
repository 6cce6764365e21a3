//! SSE Relay HTTP API
//!
//! HTTP layer serving relay streams, built with Axum.
//!
//! # Endpoints
//!
//! ## Streams
//! - `GET /api/v1/streams/:instance` - Server-Sent Events stream for an instance
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,no_run
//! use sse_relay::api::{serve, AppState};
//! use sse_relay::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default()?;
//!     let api = config.api.clone();
//!
//!     serve(AppState::new(config), &api).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod sink;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use sink::{stream_channel, ChannelSink, PendingStream};
pub use state::{AppState, BusFactory, StreamGuard};

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ApiConfig;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/streams/:instance", get(routes::streams::instance_stream));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("SSE relay listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("SSE relay shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusListener, MemoryBus};
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn create_test_app(bus: &MemoryBus) -> (Router, AppState) {
        let publisher = bus.clone();
        let factory: BusFactory =
            Arc::new(move || Box::new(publisher.listener()) as Box<dyn BusListener>);

        let state = AppState::with_bus_factory(Config::default(), factory);
        (build_router(state.clone()), state)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _state) = create_test_app(&MemoryBus::default());

        let response = app.oneshot(get("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _state) = create_test_app(&MemoryBus::default());

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: dto::HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.active_streams, 0);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_stream_relays_updates() {
        let bus = MemoryBus::default();
        let (app, state) = create_test_app(&bus);

        let response = app
            .oneshot(get("/api/v1/streams/inst-1?viewer=u1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["cache-control"], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");
        assert_eq!(state.active_streams(), 1);

        let publisher = bus.clone();
        tokio::spawn(async move {
            let step = Duration::from_millis(100);
            tokio::time::sleep(step).await;
            publisher.publish_json("inst-1", &json!({"action": "subscribe", "channel": "room1"}));
            tokio::time::sleep(step).await;
            publisher.publish_json("room1", &json!({"user": {"id": "u2"}, "v": 1}));
            publisher.publish_json("room1", &json!({"user": {"id": "u1"}, "v": 2}));
            tokio::time::sleep(step).await;
            publisher.publish_json("inst-1", &json!({"action": "unsubscribe", "channel": "room1"}));
            tokio::time::sleep(step).await;
            publisher.publish_json("room1", &json!({"user": {"id": "u3"}, "v": 3}));
            publisher.publish_json("inst-1", &json!({"action": "end"}));
        });

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            ":empty\n\nretry:2000\n\nevent:instance\ndata:{\"user\":{\"id\":\"u2\"},\"v\":1}\n\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_stream_sends_heartbeats() {
        let bus = MemoryBus::default();
        let (app, _state) = create_test_app(&bus);

        let response = app.oneshot(get("/api/v1/streams/inst-2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4_900)).await;
            publisher.publish_json("inst-2", &json!({"action": "end"}));
        });

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            ":empty\n\nretry:2000\n\n:heartbeat\n\n:heartbeat\n\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_disconnect_releases_stream() {
        let bus = MemoryBus::default();
        let (app, state) = create_test_app(&bus);

        let response = app.oneshot(get("/api/v1/streams/inst-3")).await.unwrap();
        assert_eq!(state.active_streams(), 1);
        drop(response);

        // The next heartbeat hits the closed body and stops the relay
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(state.active_streams(), 0);
        assert_eq!(bus.listener_count(), 0);
    }
}
