//! Service facade owning every pipeline component.
//!
//! The `RemuxDownloader` struct and its methods are organized by domain:
//! - [`downloads`] - Format listing and download descriptor creation
//! - [`streams`] - Opening content streams and tracking running ones
//! - [`lifecycle`] - Shutdown coordination

mod downloads;
mod lifecycle;
mod streams;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
pub(crate) mod test_helpers;

pub use downloads::{DownloadRequest, DownloadTicket};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::formats::FormatSelector;
use crate::orchestrator::Orchestrator;
use crate::progress::{ProgressHub, ProgressReporter, ProgressSubscription};
use crate::registry::DescriptorRegistry;
use crate::streaming::{LegacyFallback, StreamingResponder};
use crate::tools::{EncoderProbe, ToolBinary};
use crate::types::{Capabilities, DescriptorId, ProgressEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Streams currently being served, each with the token that stops it
#[derive(Clone, Default)]
pub(crate) struct ActiveStreams {
    next_key: Arc<AtomicU64>,
    streams: Arc<std::sync::Mutex<HashMap<u64, ActiveStream>>>,
}

#[derive(Clone, Debug)]
pub(crate) struct ActiveStream {
    pub(crate) download_id: DescriptorId,
    pub(crate) cancel: CancellationToken,
}

impl ActiveStreams {
    /// Register a stream; dropping the returned guard unregisters it
    pub(crate) fn register(&self, download_id: DescriptorId, cancel: CancellationToken) -> StreamGuard {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            key,
            ActiveStream {
                download_id,
                cancel,
            },
        );
        StreamGuard {
            key,
            streams: self.clone(),
        }
    }

    pub(crate) fn cancel_all(&self) -> usize {
        let streams = self.lock();
        for stream in streams.values() {
            tracing::debug!(download_id = %stream.download_id, "Cancelling active stream");
            stream.cancel.cancel();
        }
        streams.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ActiveStream>> {
        self.streams.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes its stream from [`ActiveStreams`] when dropped
pub(crate) struct StreamGuard {
    key: u64,
    streams: ActiveStreams,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.streams.lock().remove(&self.key);
    }
}

/// Pipeline components shared by every request
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) selector: FormatSelector,
    pub(crate) orchestrator: Orchestrator,
    pub(crate) legacy: LegacyFallback,
    pub(crate) responder: StreamingResponder,
}

/// Main service instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct RemuxDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Extractor binary (yt-dlp)
    pub(crate) extractor: Arc<ToolBinary>,
    /// Muxer binary (ffmpeg)
    pub(crate) muxer: Arc<ToolBinary>,
    /// Audio encoder probe, run once per process lifetime
    pub(crate) probe: Arc<EncoderProbe>,
    /// Download descriptors
    pub(crate) registry: DescriptorRegistry,
    /// Per-download progress channels
    pub(crate) hub: ProgressHub,
    /// Format selection, orchestration and response building
    pub(crate) pipeline: Pipeline,
    /// Streams being served (for shutdown)
    pub(crate) active: ActiveStreams,
    /// Whether new downloads and streams are accepted (false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops background tasks (the descriptor sweeper) on shutdown
    pub(crate) background: CancellationToken,
}

impl std::fmt::Debug for RemuxDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemuxDownloader")
            .field("extractor", &self.extractor.path())
            .field("muxer", &self.muxer.path())
            .field("active_streams", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl RemuxDownloader {
    /// Create a new RemuxDownloader instance
    ///
    /// This initializes all core components:
    /// - Creates the temp directory used by the fallback path
    /// - Resolves the extractor and muxer binaries (nothing is downloaded yet)
    /// - Creates the descriptor registry and starts its expiry sweep
    /// - Creates the progress hub
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the temp directory cannot be created.
    pub async fn new(config: Config) -> Result<Self> {
        let extractor = Arc::new(ToolBinary::extractor(&config.tools));
        let muxer = Arc::new(ToolBinary::muxer(&config.tools));
        Self::with_tools(config, extractor, muxer).await
    }

    /// Create an instance around already resolved tool binaries
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the temp directory cannot be created.
    pub async fn with_tools(
        config: Config,
        extractor: Arc<ToolBinary>,
        muxer: Arc<ToolBinary>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.streaming.temp_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create temp directory '{}': {}",
                        config.streaming.temp_dir.display(),
                        e
                    ),
                ))
            })?;

        let probe = Arc::new(EncoderProbe::new(&config.streaming));
        let registry =
            DescriptorRegistry::new(config.registry.descriptor_ttl, config.streaming.realtime_mux);
        let hub = ProgressHub::new(&config.progress);

        let pipeline = Pipeline {
            selector: FormatSelector::new(extractor.clone(), config.streaming.extractor_args.clone()),
            orchestrator: Orchestrator::new(
                extractor.clone(),
                muxer.clone(),
                probe.clone(),
                &config.streaming,
            ),
            legacy: LegacyFallback::new(
                extractor.clone(),
                muxer.clone(),
                probe.clone(),
                &config.streaming,
            ),
            responder: StreamingResponder::new(config.streaming.estimate_content_length),
        };

        let background = CancellationToken::new();
        registry.spawn_sweeper(config.registry.sweep_interval, background.child_token());

        tracing::info!(
            extractor = %extractor.path().display(),
            muxer = %muxer.path().display(),
            realtime_mux = config.streaming.realtime_mux,
            descriptor_ttl_secs = config.registry.descriptor_ttl.as_secs(),
            "Remux downloader initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            extractor,
            muxer,
            probe,
            registry,
            hub,
            pipeline,
            active: ActiveStreams::default(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            background,
        })
    }

    /// Subscribe to progress events of every download
    ///
    /// Each subscriber receives all events independently. Events are buffered,
    /// but a subscriber that falls behind by more than 1000 events receives
    /// `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use remux_dl::{RemuxDownloader, Config};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = RemuxDownloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok((id, event)) = events.recv().await {
    ///             tracing::info!(download_id = %id, stage = event.stage.as_str(), "progress");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<(DescriptorId, ProgressEvent)> {
        self.hub.tap()
    }

    /// Open the progress channel of one download
    ///
    /// The subscription starts with the handshake frame and replaces any
    /// earlier subscription for the same id.
    pub fn open_progress(&self, id: &DescriptorId) -> ProgressSubscription {
        self.hub.open(id)
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Builder for stream responses
    pub fn responder(&self) -> StreamingResponder {
        self.pipeline.responder
    }

    /// Query the current system capabilities
    ///
    /// The audio encoder is only reported once it has been probed.
    pub async fn capabilities(&self) -> Capabilities {
        Capabilities {
            extractor: self.extractor.path().to_path_buf(),
            muxer: self.muxer.path().to_path_buf(),
            realtime_mux: self.config.streaming.realtime_mux,
            audio_encoder: self.probe.selected(),
            active_descriptors: self.registry.len().await,
            active_streams: self.active.len(),
        }
    }

    /// Whether new work is accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    pub(crate) fn reporter(&self, id: &DescriptorId) -> ProgressReporter {
        ProgressReporter::new(self.hub.clone(), id.clone(), self.config.progress.publish_interval)
    }

    /// Spawn the REST API server in a background task
    ///
    /// The server runs concurrently with streaming and listens on the
    /// configured bind address (default: 127.0.0.1:6790).
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let downloader = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(downloader, config).await })
    }
}
