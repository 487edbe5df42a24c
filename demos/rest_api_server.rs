//! REST API server example
//!
//! This example shows how to run remux-dl with the REST API enabled.
//! yt-dlp and ffmpeg are taken from PATH when present and downloaded into
//! the tool cache directory otherwise.
//!
//! After starting, you can:
//! - View Swagger UI at http://localhost:6790/swagger-ui
//! - List formats via GET http://localhost:6790/formats?sourceUrl=...
//! - Register a download via POST http://localhost:6790/downloads
//! - Follow progress via GET http://localhost:6790/downloads/{id}/progress
//! - Download the result via GET http://localhost:6790/downloads/{id}/stream

use std::net::SocketAddr;
use std::sync::Arc;
use remux_dl::config::{ApiConfig, Config, ServerIntegrationConfig, StreamingConfig};
use remux_dl::{RemuxDownloader, run_with_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let api_config = ApiConfig {
        bind_address: "127.0.0.1:6790".parse::<SocketAddr>()?,
        api_key: None, // No authentication for local use
        cors_enabled: true,
        cors_origins: vec!["*".to_string()],
        swagger_ui: true,
    };

    let config = Config {
        streaming: StreamingConfig {
            temp_dir: "temp".into(),
            ..Default::default()
        },
        server: ServerIntegrationConfig { api: api_config },
        ..Default::default()
    };

    let downloader = Arc::new(RemuxDownloader::new(config).await?);
    let api_handle = downloader.spawn_api_server();

    println!("🚀 Starting remux-dl REST API server");
    println!("📖 Swagger UI: http://localhost:6790/swagger-ui");
    println!();
    println!("Example commands:");
    println!("  # List the formats of a video");
    println!("  curl 'http://localhost:6790/formats?sourceUrl=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3Daqz-KE-bpKQ'");
    println!();
    println!("  # Register a download");
    println!("  curl -X POST http://localhost:6790/downloads \\");
    println!("    -H 'Content-Type: application/json' \\");
    println!(
        "    -d '{{\"sourceUrl\": \"https://www.youtube.com/watch?v=aqz-KE-bpKQ\", \"formatId\": \"137\"}}'"
    );
    println!();
    println!("  # Follow progress (Server-Sent Events)");
    println!("  curl -N http://localhost:6790/downloads/<downloadId>/progress");
    println!();
    println!("  # Download the muxed file");
    println!("  curl -OJ http://localhost:6790/downloads/<downloadId>/stream");

    // Runs until SIGINT/SIGTERM, then winds down open streams
    run_with_shutdown((*downloader).clone()).await?;
    api_handle.abort();

    Ok(())
}
