//! SSE Relay CLI
//!
//! Command-line tools for working with a relay deployment:
//! - Publish a message on the bus
//! - Listen to a relay stream
//! - Check server status
//! - Generate a config file

use bytes::Bytes;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

#[derive(Parser)]
#[command(name = "sse-relay-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tools for the SSE relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8085", global = true)]
    pub api_url: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a JSON payload on a bus channel
    Publish {
        /// Channel name
        channel: String,
        /// JSON payload
        payload: String,
        /// Address to bind the PUB socket on
        #[arg(long, default_value = "tcp://127.0.0.1:5556")]
        bind: String,
        /// Time to wait for subscribers before sending, in milliseconds
        #[arg(long, default_value = "500")]
        linger_ms: u64,
    },

    /// Stream events from an instance and print them as they arrive
    Listen {
        /// Instance id
        instance: String,
        /// Skip updates authored by this user id
        #[arg(long)]
        viewer: Option<String>,
        /// Prefix each chunk with the time it was received
        #[arg(short, long)]
        timestamps: bool,
    },

    /// Show server status
    Status,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Publish {
            channel,
            payload,
            bind,
            linger_ms,
        } => {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&payload) {
                eprintln!("Payload is not valid JSON: {}", e);
                std::process::exit(1);
            }

            let mut socket = PubSocket::new();
            let endpoint = socket.bind(&bind).await?;

            // Give subscribers time to connect; PUB drops messages nobody listens to
            tokio::time::sleep(Duration::from_millis(linger_ms)).await;

            let mut message = ZmqMessage::from(channel.clone().into_bytes());
            message.push_back(Bytes::from(payload.into_bytes()));
            socket.send(message).await?;

            // Let the frames leave the socket before closing it
            tokio::time::sleep(Duration::from_millis(100)).await;
            socket.close().await;

            println!("Published on {} via {}", channel, endpoint);
        }

        Commands::Listen {
            instance,
            viewer,
            timestamps,
        } => {
            let client = reqwest::Client::new();
            let mut request = client
                .get(format!("{}/api/v1/streams/{}", cli.api_url, instance))
                .header("Accept", "text/event-stream");
            if let Some(viewer) = viewer {
                request = request.query(&[("viewer", viewer)]);
            }

            let mut response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                eprintln!("Failed ({}): {}", status, text);
                std::process::exit(1);
            }

            while let Some(chunk) = response.chunk().await? {
                let text = String::from_utf8_lossy(&chunk);
                if timestamps {
                    print!("[{}] {}", Utc::now().format("%H:%M:%S%.3f"), text);
                } else {
                    print!("{}", text);
                }
            }
            eprintln!("Stream closed by server");
        }

        Commands::Status => {
            let client = reqwest::Client::new();
            let response = client
                .get(format!("{}/health", cli.api_url))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let health: serde_json::Value = resp.json().await?;

                    println!("SSE relay v{}", env!("CARGO_PKG_VERSION"));
                    println!();
                    println!(
                        "Server Status: {}",
                        health["status"].as_str().unwrap_or("unknown")
                    );
                    if let Some(version) = health["version"].as_str() {
                        println!("Server Version: {}", version);
                    }
                    if let Some(endpoint) = health["bus_endpoint"].as_str() {
                        println!("Bus: {}", endpoint);
                    }
                    if let Some(streams) = health["active_streams"].as_u64() {
                        println!("Active streams: {}", streams);
                    }
                    if let Some(uptime) = health["uptime_seconds"].as_u64() {
                        println!("Uptime: {}", format_uptime(uptime));
                    }
                }
                Ok(resp) => {
                    eprintln!("Server returned {}", resp.status());
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Cannot reach {}: {}", cli.api_url, e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { output } => {
            let content = sse_relay::config::generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)?;
                    println!("Config written to {}", path.display());
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
