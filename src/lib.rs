//! # remux-dl
//!
//! Remote media fetch-and-mux streaming pipeline.
//!
//! A client picks a quality option of a remote page, registers a download
//! and receives the result as an ordinary file download while the media is
//! still being fetched. Video-only formats are muxed with an audio track on
//! the fly by piping `yt-dlp` into `ffmpeg`; everything else goes through a
//! temp-file fallback. Progress of every download is published on its own
//! channel (SSE or NDJSON over the REST API).
//!
//! ## Design Philosophy
//!
//! remux-dl is designed to be:
//! - **Library-first** - The REST API is a router you mount or spawn
//! - **Self-provisioning** - Missing tool binaries are downloaded on first use
//! - **Stateless** - Download descriptors live in memory with a short TTL
//! - **Event-driven** - Consumers subscribe to progress, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use remux_dl::{RemuxDownloader, Config};
//! use remux_dl::downloader::DownloadRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = RemuxDownloader::new(Config::default()).await?;
//!
//!     let listing = downloader.list_formats("https://www.youtube.com/watch?v=aqz-KE-bpKQ").await?;
//!     let ticket = downloader
//!         .create_download(&DownloadRequest {
//!             source_url: "https://www.youtube.com/watch?v=aqz-KE-bpKQ".to_string(),
//!             format_id: listing.formats[0].format_id.clone(),
//!         })
//!         .await?;
//!
//!     // Follow progress while the stream is consumed elsewhere
//!     let mut progress = downloader.open_progress(&ticket.download_id);
//!     let plan = downloader.open_stream(&ticket.download_id).await?;
//!     println!("streaming {} ({:?})", plan.filename, plan.length);
//!
//!     use futures::StreamExt;
//!     while let Some(event) = progress.next().await {
//!         println!("{:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Service facade (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Remote metadata and format selection
pub mod formats;
/// Process graphs for real-time muxing
pub mod orchestrator;
/// Per-download progress channels
pub mod progress;
/// Download descriptor registry
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Download responses and the temp-file fallback
pub mod streaming;
/// Tool binary resolution, installation and probing
pub mod tools;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, ProgressConfig, RegistryConfig, StreamingConfig, ToolsConfig};
pub use downloader::{DownloadRequest, DownloadTicket, RemuxDownloader};
pub use error::{
    ApiError, Error, ErrorDetail, ExtractionError, Result, ToHttpStatus, ToolError,
};
pub use formats::FormatListing;
pub use registry::DownloadDescriptor;
pub use streaming::{BodyLength, StreamPlan};
pub use types::{
    AudioEncoder, Capabilities, DescriptorId, ExtractionFormat, ProgressEvent, Stage,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use remux_dl::{RemuxDownloader, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let downloader = RemuxDownloader::new(config).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: RemuxDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
