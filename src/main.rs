//! SSE Relay Server
//!
//! Run with: cargo run --bin sse-relay
//!
//! # Configuration
//!
//! Read from `SSE_RELAY_CONFIG`, `<config dir>/sse-relay/config.toml`,
//! `/etc/sse-relay/config.toml` or `./config.toml`, with `SSE_RELAY_*`
//! environment overrides. `RUST_LOG` takes precedence over `logging.level`.

use sse_relay::api::{serve, AppState};
use sse_relay::config::{Config, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_default()?;
    init_tracing(&config.logging);

    tracing::info!("Starting SSE relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bus = %config.bus.endpoint(),
        keep_alive = ?config.relay.keep_alive,
        retry_delay = ?config.relay.retry_delay,
        "Relay configuration"
    );

    let api_config = config.api.clone();
    let state = AppState::new(config);
    serve(state, &api_config).await?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("sse_relay={},tower_http=debug", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
