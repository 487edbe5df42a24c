//! Temp-file fallback
//!
//! Used for formats that already carry audio and whenever real-time muxing
//! is disabled. Tracks are downloaded to a per-attempt temp directory, muxed
//! once into a seekable MP4 when needed, and the finished file is streamed
//! with its exact length. The directory is removed when the stream ends or
//! is dropped.

use crate::config::StreamingConfig;
use crate::error::{Error, Result, ToolError};
use crate::formats::{FormatSelector, RemoteMetadata, smallest_audio_track};
use crate::orchestrator::plan::{extractor_file_args, file_muxer_args};
use crate::progress::{
    DiagnosticTail, ExtractorPercentEstimator, LineSplitter, ProgressEstimator,
    ProgressReporter,
};
use crate::registry::DownloadDescriptor;
use crate::tools::{EncoderProbe, ToolBinary, diagnostic_message, translate_extractor_error};
use crate::types::Stage;
use crate::utils::container_of;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;

/// A finished file ready to stream
pub struct LegacyOutput {
    /// File contents; dropping the stream removes the temp directory
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
    /// Exact size in bytes
    pub length: u64,
    /// Container of the file
    pub container: String,
}

impl std::fmt::Debug for LegacyOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyOutput")
            .field("length", &self.length)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

/// Downloads to temp files, muxes once, and streams the result
#[derive(Clone, Debug)]
pub struct LegacyFallback {
    extractor: Arc<ToolBinary>,
    muxer: Arc<ToolBinary>,
    selector: FormatSelector,
    probe: Arc<EncoderProbe>,
    temp_root: PathBuf,
    extractor_args: Vec<String>,
}

impl LegacyFallback {
    /// Create a fallback sharing the given tools and encoder probe
    pub fn new(
        extractor: Arc<ToolBinary>,
        muxer: Arc<ToolBinary>,
        probe: Arc<EncoderProbe>,
        config: &StreamingConfig,
    ) -> Self {
        Self {
            selector: FormatSelector::new(extractor.clone(), config.extractor_args.clone()),
            extractor,
            muxer,
            probe,
            temp_root: config.temp_dir.clone(),
            extractor_args: config.extractor_args.clone(),
        }
    }

    /// Produce the finished file for `descriptor`
    ///
    /// Publishes the download, merge and hand-off stages through `reporter`,
    /// then per-read streaming progress and `complete` (or `cancelled` when
    /// the body is dropped early).
    ///
    /// # Errors
    ///
    /// Extraction, tool and I/O failures; the temp directory is removed in
    /// every case.
    pub async fn prepare(
        &self,
        descriptor: &DownloadDescriptor,
        reporter: ProgressReporter,
    ) -> Result<LegacyOutput> {
        match self.prepare_inner(descriptor, &reporter).await {
            Ok(output) => Ok(output),
            Err(e) => {
                tracing::warn!(download_id = %descriptor.id, error = %e, "Temp-file fallback failed");
                reporter.failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn prepare_inner(
        &self,
        descriptor: &DownloadDescriptor,
        reporter: &ProgressReporter,
    ) -> Result<LegacyOutput> {
        tokio::fs::create_dir_all(&self.temp_root).await?;
        let root = self.temp_root.clone();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix("remux-").tempdir_in(root)
        })
        .await
        .map_err(|e| Error::Other(format!("temp directory task failed: {e}")))??;

        tracing::debug!(
            download_id = %descriptor.id,
            dir = %dir.path().display(),
            embedded_audio = descriptor.has_embedded_audio,
            "Preparing temp-file download"
        );

        let (path, container) = if descriptor.has_embedded_audio {
            let container =
                container_of(&descriptor.filename).unwrap_or_else(|| "mp4".to_string());
            let path = dir.path().join(format!("media.{container}"));
            self.download(descriptor, &descriptor.format_id, &path, Stage::Downloading, reporter)
                .await?;
            (path, container)
        } else {
            let metadata: RemoteMetadata =
                self.selector.fetch_metadata(&descriptor.source_url).await?;
            let audio = smallest_audio_track(&metadata)?;
            reporter.enter(Stage::Info);

            let video_path = dir.path().join("video.track");
            let audio_path = dir.path().join("audio.track");
            let output = dir.path().join("output.mp4");

            self.download(
                descriptor,
                &descriptor.format_id,
                &video_path,
                Stage::DownloadingVideo,
                reporter,
            )
            .await?;
            self.download(
                descriptor,
                &audio.format_id,
                &audio_path,
                Stage::DownloadingAudio,
                reporter,
            )
            .await?;

            reporter.enter(Stage::Merging);
            self.mux(&video_path, &audio_path, &output).await?;
            remove_input(&video_path).await;
            remove_input(&audio_path).await;

            (output, "mp4".to_string())
        };

        let file = tokio::fs::File::open(&path).await?;
        let length = file.metadata().await?.len();

        reporter.enter(Stage::BrowserDownload);
        tracing::info!(
            download_id = %descriptor.id,
            bytes = length,
            "Temp-file download ready"
        );

        Ok(LegacyOutput {
            body: file_body(file, length, dir, reporter.clone()),
            length,
            container,
        })
    }

    async fn download(
        &self,
        descriptor: &DownloadDescriptor,
        format_id: &str,
        path: &Path,
        stage: Stage,
        reporter: &ProgressReporter,
    ) -> Result<()> {
        self.extractor.ensure().await?;
        reporter.enter(stage);

        let mut child = self
            .extractor
            .command()
            .args(extractor_file_args(
                format_id,
                &descriptor.source_url,
                path,
                &self.extractor_args,
            ))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::ProcessSpawn {
                program: self.extractor.name().to_string(),
                source,
            })?;

        // the extractor prints progress on stdout and errors on stderr
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let progress_reporter = reporter.clone();
        let progress = tokio::spawn(async move {
            let mut estimator = ExtractorPercentEstimator::new();
            read_lines(stdout, |line| {
                if let Some(estimate) = estimator.feed_line(line) {
                    progress_reporter.estimate(stage, &estimate);
                }
            })
            .await
        });
        let errors = tokio::spawn(async move {
            let mut tail = DiagnosticTail::default();
            read_lines(stderr, |line| tail.push(line)).await;
            tail
        });

        let status = child.wait().await?;
        let _ = progress.await;
        let tail = errors.await.unwrap_or_default();

        if !status.success() {
            tracing::debug!(download_id = %descriptor.id, format_id, status = %status, "Extractor failed");
            return Err(translate_extractor_error(&tail.joined(), Some(format_id)).into());
        }
        reporter.percent(stage, 100.0);
        Ok(())
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.muxer.ensure().await?;
        let encoder = self.probe.audio_encoder(&self.muxer).await;

        let result = self
            .muxer
            .command()
            .args(file_muxer_args(video, audio, output, &encoder))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| Error::ProcessSpawn {
                program: self.muxer.name().to_string(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ToolError::Execution {
                tool: self.muxer.name().to_string(),
                message: diagnostic_message(&stderr, &result.status.to_string()),
            }
            .into());
        }
        Ok(())
    }
}

async fn read_lines<R>(reader: Option<R>, mut on_line: impl FnMut(&str))
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    on_line(&line);
                }
            }
        }
    }
    if let Some(line) = splitter.finish() {
        on_line(&line);
    }
}

async fn remove_input(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp input");
    }
}

/// Removes the temp directory and reports cancellation unless finished
struct CleanupGuard {
    dir: Option<TempDir>,
    reporter: ProgressReporter,
    finished: bool,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.reporter.cancelled();
        }
        let Some(dir) = self.dir.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(dir));
            }
            Err(_) => drop(dir),
        }
    }
}

fn file_body<R>(
    file: R,
    length: u64,
    dir: TempDir,
    reporter: ProgressReporter,
) -> BoxStream<'static, std::io::Result<Bytes>>
where
    R: AsyncRead + Send + 'static,
{
    let guard = CleanupGuard {
        dir: Some(dir),
        reporter,
        finished: false,
    };
    let reader = ReaderStream::new(Box::pin(file));

    futures::stream::unfold(Some((reader, guard, 0u64)), move |state| async move {
        let (mut reader, mut guard, sent) = state?;
        match reader.next().await {
            Some(Ok(chunk)) => {
                let sent = sent + chunk.len() as u64;
                if length > 0 {
                    guard
                        .reporter
                        .percent(Stage::Streaming, sent as f64 / length as f64 * 100.0);
                }
                Some((Ok(chunk), Some((reader, guard, sent))))
            }
            Some(Err(e)) => {
                tracing::warn!(download_id = %guard.reporter.id(), error = %e, "Reading the temp file failed");
                guard.finished = true;
                guard.reporter.failed(e.to_string());
                Some((Err(e), None))
            }
            None => {
                guard.finished = true;
                guard.reporter.complete();
                None
            }
        }
    })
    .boxed()
}
