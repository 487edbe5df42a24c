//! Process orchestrator
//!
//! Drives one real-time streaming attempt: resolves the video and audio
//! tracks, spawns the extractor and muxer processes as a [`graph::GraphSpec`],
//! and hands back the muxer output as soon as its first bytes exist.
//!
//! - [`graph`] - process graph description and supervised execution
//! - [`plan`] - tool arguments, graph layouts and the output size heuristic

pub mod graph;
pub mod plan;

pub use graph::{
    DiagnosticSink, GraphHandle, GraphOutcome, GraphSpec, InputSlot, NodeFailure, NodeId,
    NodeSpec, PipeEdge, RunningGraph,
};
pub use plan::estimate_output_size;

use crate::config::StreamingConfig;
use crate::error::{Error, Result};
use crate::formats::{FormatSelector, find_format, smallest_audio_track};
use crate::progress::{MuxTimeEstimator, ProgressEstimator, ProgressReporter};
use crate::registry::DownloadDescriptor;
use crate::tools::{EncoderProbe, ToolBinary, translate_extractor_error};
use crate::types::Stage;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use plan::{RealtimeInputs, realtime_graph, roles};
use std::sync::Arc;
use std::time::Duration;

/// Muxer output of a running real-time graph
pub struct LiveStream {
    /// Output bytes; dropping the stream cancels the graph
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
    /// Heuristic output size, when both track sizes are known
    pub estimated_size: Option<u64>,
    /// Control handle of the graph
    pub handle: GraphHandle,
}

impl std::fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStream")
            .field("estimated_size", &self.estimated_size)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Starts real-time mux graphs
#[derive(Clone, Debug)]
pub struct Orchestrator {
    extractor: Arc<ToolBinary>,
    muxer: Arc<ToolBinary>,
    selector: FormatSelector,
    probe: Arc<EncoderProbe>,
    extractor_args: Vec<String>,
    kill_grace: Duration,
}

impl Orchestrator {
    /// Create an orchestrator sharing the given tools and encoder probe
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
            extractor_args: config.extractor_args.clone(),
            kill_grace: config.kill_grace_period,
        }
    }

    /// Start streaming `descriptor` through the real-time muxer
    ///
    /// Returns once the muxer has produced its first bytes, so failures up to
    /// that point come back as errors. Terminal progress goes through
    /// `reporter`: `complete` once the body has been read to its end,
    /// `cancelled` when the body is dropped before that, and `error` when
    /// the graph fails.
    ///
    /// # Errors
    ///
    /// - [`crate::error::ExtractionError`] when metadata cannot be fetched, the
    ///   format is unknown, no audio track exists or an extractor fails early
    /// - [`crate::error::ToolError::Unavailable`] when a tool is missing
    /// - [`Error::ProcessSpawn`] when a process cannot be started
    /// - [`Error::Stream`] when the muxer fails or ends without output
    pub async fn start(
        &self,
        descriptor: &DownloadDescriptor,
        reporter: ProgressReporter,
    ) -> Result<LiveStream> {
        match self.start_inner(descriptor, &reporter).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                tracing::warn!(download_id = %descriptor.id, error = %e, "Real-time mux failed to start");
                reporter.failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn start_inner(
        &self,
        descriptor: &DownloadDescriptor,
        reporter: &ProgressReporter,
    ) -> Result<LiveStream> {
        let metadata = self.selector.fetch_metadata(&descriptor.source_url).await?;
        let video = find_format(&metadata, &descriptor.format_id)?;
        let audio = smallest_audio_track(&metadata)?;
        reporter.enter(Stage::Info);

        let estimated_size = video
            .effective_size()
            .zip(audio.effective_size())
            .map(|(v, a)| estimate_output_size(v, a));

        self.muxer.ensure().await?;
        let encoder = self.probe.audio_encoder(&self.muxer).await;

        let spec = realtime_graph(
            RealtimeInputs {
                extractor: self.extractor.path(),
                muxer: self.muxer.path(),
                source_url: &descriptor.source_url,
                video_format: &video.format_id,
                audio_format: &audio.format_id,
                extractor_args: &self.extractor_args,
                encoder: &encoder,
            },
            MuxProgress {
                estimator: MuxTimeEstimator::new(metadata.duration),
                reporter: reporter.clone(),
            },
        );

        reporter.enter(Stage::Merging);
        let running = spec.spawn(self.kill_grace).await?;
        tracing::info!(
            download_id = %descriptor.id,
            video_format = %video.format_id,
            audio_format = %audio.format_id,
            encoder = ?encoder,
            estimated_size = ?estimated_size,
            "Real-time mux started"
        );

        let formats = TrackIds {
            video: video.format_id.clone(),
            audio: audio.format_id.clone(),
        };
        let (mut body, handle) = running.into_body();
        spawn_outcome_reporter(handle.clone(), reporter.clone(), formats.clone());

        let first = body.next().await;
        match first {
            Some(Ok(first)) => {
                reporter.enter(Stage::Streaming);
                let body = futures::stream::once(async move { Ok(first) })
                    .chain(body)
                    .boxed();
                Ok(LiveStream {
                    body: reported_body(body, handle.clone(), reporter.clone()),
                    estimated_size,
                    handle,
                })
            }
            first => {
                // cancels the graph if it is somehow still running
                drop(body);
                let outcome = handle.outcome().await;
                Err(match (outcome, first) {
                    (GraphOutcome::Failed(failure), _) => failure_error(&failure, &formats),
                    (_, Some(Err(e))) => Error::Io(e),
                    (outcome, _) => Error::Stream {
                        reason: format!("muxer produced no output ({outcome})"),
                    },
                })
            }
        }
    }
}

#[derive(Clone, Debug)]
struct TrackIds {
    video: String,
    audio: String,
}

/// Error for a failed graph: extractor failures are translated from their
/// diagnostics, anything else is a stream failure
fn failure_error(failure: &NodeFailure, formats: &TrackIds) -> Error {
    let format_id = match failure.role.as_str() {
        roles::VIDEO => Some(formats.video.as_str()),
        roles::AUDIO => Some(formats.audio.as_str()),
        _ => None,
    };
    match format_id {
        Some(format_id) => {
            Error::Extraction(translate_extractor_error(&failure.diagnostics, Some(format_id)))
        }
        None => Error::Stream {
            reason: failure.to_string(),
        },
    }
}

/// Publishes cancellation and failure; completion is left to the body, which
/// knows whether the output was actually delivered
fn spawn_outcome_reporter(handle: GraphHandle, reporter: ProgressReporter, formats: TrackIds) {
    tokio::spawn(async move {
        let outcome = handle.outcome().await;
        tracing::info!(download_id = %reporter.id(), outcome = %outcome, "Real-time mux finished");
        match outcome {
            GraphOutcome::Completed => {}
            GraphOutcome::Cancelled => reporter.cancelled(),
            GraphOutcome::Failed(failure) => {
                reporter.failed(failure_error(&failure, &formats).to_string())
            }
        }
    });
}

/// Reports `cancelled` unless the body it belongs to reached its end
struct BodyEnd {
    reporter: ProgressReporter,
    ended: bool,
}

impl Drop for BodyEnd {
    fn drop(&mut self) {
        if !self.ended {
            self.reporter.cancelled();
        }
    }
}

/// Publish `complete` when `body` is read to its end, `cancelled` when it
/// is dropped before
fn reported_body(
    body: BoxStream<'static, std::io::Result<Bytes>>,
    handle: GraphHandle,
    reporter: ProgressReporter,
) -> BoxStream<'static, std::io::Result<Bytes>> {
    let end = BodyEnd {
        reporter,
        ended: false,
    };
    futures::stream::unfold(Some((body, handle, end)), |state| async move {
        let (mut body, handle, mut end) = state?;
        match body.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((body, handle, end)))),
            Some(Err(e)) => {
                end.ended = true;
                // a finished graph reports its own failure
                if !handle.is_finished() {
                    end.reporter.failed(e.to_string());
                }
                Some((Err(e), None))
            }
            None => {
                end.ended = true;
                end.reporter.complete();
                None
            }
        }
    })
    .boxed()
}

/// Feeds muxer diagnostics into the progress reporter
struct MuxProgress {
    estimator: MuxTimeEstimator,
    reporter: ProgressReporter,
}

impl DiagnosticSink for MuxProgress {
    fn line(&mut self, line: &str) {
        let Some(estimate) = self.estimator.feed_line(line) else {
            return;
        };
        let stage = match self.reporter.current_stage() {
            Some(stage @ (Stage::Merging | Stage::Streaming)) => stage,
            _ => return,
        };
        self.reporter.estimate(stage, &estimate);
    }
}
