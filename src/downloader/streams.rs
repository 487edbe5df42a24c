//! Opening content streams and tracking the running ones.

use crate::error::{Error, Result};
use crate::streaming::{BodyLength, StreamPlan};
use crate::types::DescriptorId;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use super::{RemuxDownloader, StreamGuard};

impl RemuxDownloader {
    /// Start producing the content of a registered download
    ///
    /// Formats without audio go through the real-time muxer when enabled;
    /// everything else is prepared by the temp-file fallback. The returned
    /// plan is ready for [`crate::streaming::StreamingResponder::build`].
    /// Progress is published to the download's progress channel throughout.
    ///
    /// A descriptor can be streamed any number of times before it expires;
    /// every call runs its own processes.
    ///
    /// # Errors
    ///
    /// - [`Error::DescriptorExpired`] for an unknown or expired id
    /// - [`Error::ShuttingDown`] during shutdown, including a shutdown that
    ///   starts while the stream is being prepared
    /// - any extraction, tool, spawn or stream failure before the first byte
    pub async fn open_stream(&self, id: &DescriptorId) -> Result<StreamPlan> {
        self.ensure_accepting()?;
        let descriptor = self.registry.get(id).await?;
        let reporter = self.reporter(id);

        let cancel = CancellationToken::new();
        let guard = self.active.register(id.clone(), cancel.clone());

        let prepared = if descriptor.use_realtime_mux {
            let start = self.pipeline.orchestrator.start(&descriptor, reporter.clone());
            tokio::select! {
                live = start => live.map(|live| {
                    let length = live
                        .estimated_size
                        .map_or(BodyLength::Unknown, BodyLength::Estimated);
                    (live.body, length, "mp4".to_string())
                }),
                _ = cancel.cancelled() => Err(Error::ShuttingDown),
            }
        } else {
            let prepare = self.pipeline.legacy.prepare(&descriptor, reporter.clone());
            tokio::select! {
                output = prepare => output.map(|output| {
                    (output.body, BodyLength::Exact(output.length), output.container)
                }),
                _ = cancel.cancelled() => Err(Error::ShuttingDown),
            }
        };

        let (body, length, container) = match prepared {
            Ok(prepared) => prepared,
            Err(Error::ShuttingDown) => {
                tracing::info!(download_id = %id, "Stream preparation interrupted by shutdown");
                reporter.cancelled();
                return Err(Error::ShuttingDown);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            download_id = %id,
            realtime = descriptor.use_realtime_mux,
            length = ?length,
            "Stream opened"
        );

        Ok(StreamPlan {
            filename: descriptor.filename,
            container,
            length,
            body: tracked(body, cancel, guard),
            progress: Some(reporter),
        })
    }
}

/// Keep `guard` alive as long as `body`, and cut `body` off when `cancel` fires
///
/// A body cut off this way ends with an error, so the client never takes a
/// truncated download for a finished one.
fn tracked(
    body: BoxStream<'static, std::io::Result<Bytes>>,
    cancel: CancellationToken,
    guard: StreamGuard,
) -> BoxStream<'static, std::io::Result<Bytes>> {
    futures::stream::unfold(Some((body, cancel, guard)), |state| async move {
        let (mut body, cancel, guard) = state?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Stream cut off by shutdown");
                // the pipeline reports its end before the stream counts as released
                drop(body);
                drop(guard);
                Some((Err(std::io::Error::other("shutting down")), None))
            }
            chunk = body.next() => chunk.map(|chunk| (chunk, Some((body, cancel, guard)))),
        }
    })
    .boxed()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::downloader::DownloadRequest;
    use crate::downloader::test_helpers::{LIVE_OUTPUT, create_test_downloader};
    use crate::types::{ProgressEvent, Stage};

    async fn register(downloader: &RemuxDownloader, format_id: &str) -> DescriptorId {
        downloader
            .create_download(&DownloadRequest {
                source_url: "https://example.com/watch?v=abc".into(),
                format_id: format_id.into(),
            })
            .await
            .unwrap()
            .download_id
    }

    async fn read_all(mut body: BoxStream<'static, std::io::Result<Bytes>>) -> Vec<u8> {
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk.unwrap());
        }
        data
    }

    #[tokio::test]
    async fn realtime_stream_delivers_muxer_output() {
        let (downloader, _dirs) = create_test_downloader().await;
        let id = register(&downloader, "137").await;
        let progress = downloader.open_progress(&id);

        let plan = downloader.open_stream(&id).await.unwrap();
        assert_eq!(plan.filename, "Test Clip_1080p.mp4");
        assert_eq!(plan.container, "mp4");
        assert_eq!(plan.length, BodyLength::Estimated(20_550));
        assert_eq!(downloader.capabilities().await.active_streams, 1);

        assert_eq!(read_all(plan.body).await, LIVE_OUTPUT);
        assert_eq!(downloader.capabilities().await.active_streams, 0);

        let events: Vec<ProgressEvent> = progress.collect().await;
        assert_eq!(events.first().unwrap().stage, Stage::Preparing);
        assert_eq!(events.last().unwrap().stage, Stage::Complete);
        assert!(events.iter().any(|e| e.stage == Stage::Merging));
    }

    #[tokio::test]
    async fn embedded_audio_stream_uses_exact_length() {
        let (downloader, _dirs) = create_test_downloader().await;
        let id = register(&downloader, "43").await;

        let plan = downloader.open_stream(&id).await.unwrap();
        assert_eq!(plan.container, "webm");
        assert_eq!(plan.length, BodyLength::Exact(8));
        assert_eq!(read_all(plan.body).await, b"track-43");
    }

    #[tokio::test]
    async fn descriptor_can_be_streamed_twice() {
        let (downloader, _dirs) = create_test_downloader().await;
        let id = register(&downloader, "43").await;

        for _ in 0..2 {
            let plan = downloader.open_stream(&id).await.unwrap();
            assert_eq!(read_all(plan.body).await, b"track-43");
        }
    }

    #[tokio::test]
    async fn unknown_id_is_expired() {
        let (downloader, _dirs) = create_test_downloader().await;
        let err = downloader
            .open_stream(&"0123456789abcdef".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DescriptorExpired { .. }));
    }

    #[tokio::test]
    async fn shutdown_ends_open_streams() {
        let (downloader, _dirs) = create_test_downloader().await;
        let id = register(&downloader, "43").await;
        let mut plan = downloader.open_stream(&id).await.unwrap();

        let shutdown = tokio::spawn({
            let downloader = downloader.clone();
            async move { downloader.shutdown().await }
        });

        let mut received = 0;
        while let Some(chunk) = plan.body.next().await {
            match chunk {
                Ok(chunk) => received += chunk.len(),
                Err(_) => break,
            }
        }
        assert!(received <= 8);
        drop(plan);

        tokio::time::timeout(std::time::Duration::from_secs(5), shutdown)
            .await
            .expect("shutdown waited for a finished stream")
            .unwrap()
            .unwrap();
        assert!(!downloader.is_accepting());
        assert!(matches!(
            downloader.open_stream(&id).await.unwrap_err(),
            Error::ShuttingDown
        ));
    }

    #[tokio::test]
    async fn cancelled_body_ends_with_error() {
        let active = crate::downloader::ActiveStreams::default();
        let cancel = CancellationToken::new();
        let guard = active.register("abc".parse().unwrap(), cancel.clone());

        let source = futures::stream::iter(vec![Ok(Bytes::from_static(b"chunk-00"))])
            .chain(futures::stream::pending())
            .boxed();
        let mut body = tracked(source, cancel.clone(), guard);

        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"chunk-00");
        cancel.cancel();
        let err = body.next().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "shutting down");
        assert!(body.next().await.is_none());
        assert_eq!(active.len(), 0);
    }

    #[tokio::test]
    async fn finished_body_ends_cleanly() {
        let active = crate::downloader::ActiveStreams::default();
        let cancel = CancellationToken::new();
        let guard = active.register("abc".parse().unwrap(), cancel.clone());

        let source = futures::stream::iter(vec![Ok(Bytes::from_static(b"all"))]).boxed();
        let chunks: Vec<_> = tracked(source, cancel, guard).collect().await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_ok());
        assert_eq!(active.len(), 0);
    }
}
