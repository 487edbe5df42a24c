//! Shutdown coordination.

use crate::error::Result;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::RemuxDownloader;

/// How long shutdown waits for open streams to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl RemuxDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new downloads and streams
    /// 2. Stops the descriptor sweep
    /// 3. Cancels every open stream, killing its processes
    /// 4. Waits for open streams to be released with a timeout (30 seconds)
    /// 5. Closes every progress channel and drains the descriptor registry
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Currently always succeeds; the signature leaves room for steps that
    /// can fail.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new work
        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new downloads");

        // 2. Background tasks
        self.background.cancel();

        // 3. Cancel open streams
        let cancelled = self.active.cancel_all();
        tracing::info!(cancelled, "Signaled cancellation to all open streams");

        // 4. Wait for them to be released
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_streams()).await {
            Ok(()) => tracing::info!("All open streams released"),
            Err(_) => tracing::warn!(
                remaining = self.active.len(),
                "Timeout waiting for open streams, proceeding with shutdown"
            ),
        }

        // 5. Release progress channels and descriptors
        let closed = self.hub.close_all();
        let drained = self.registry.drain().await;
        tracing::info!(
            progress_channels = closed,
            descriptors = drained,
            "Graceful shutdown complete"
        );
        Ok(())
    }

    async fn wait_for_active_streams(&self) {
        loop {
            let active_count = self.active.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for open streams to be released");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use crate::downloader::DownloadRequest;
    use crate::downloader::test_helpers::create_test_downloader;
    use crate::types::Stage;
    use futures::StreamExt;

    #[tokio::test]
    async fn shutdown_drains_registry_and_closes_progress() {
        let (downloader, _dirs) = create_test_downloader().await;
        let ticket = downloader
            .create_download(&DownloadRequest {
                source_url: "https://example.com/watch?v=abc".into(),
                format_id: "43".into(),
            })
            .await
            .unwrap();
        let mut progress = downloader.open_progress(&ticket.download_id);
        assert_eq!(progress.next().await.unwrap().stage, Stage::Preparing);

        downloader.shutdown().await.unwrap();

        assert!(downloader.registry.is_empty().await);
        assert!(downloader.hub.is_empty());
        assert_eq!(progress.next().await, None);
        assert!(downloader.background.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (downloader, _dirs) = create_test_downloader().await;
        downloader.shutdown().await.unwrap();
        downloader.shutdown().await.unwrap();
        assert!(!downloader.is_accepting());
    }
}
