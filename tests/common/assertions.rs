//! Custom test assertions for integration tests

use futures::StreamExt;
use remux_dl::progress::ProgressSubscription;
use remux_dl::{ProgressEvent, Stage};
use std::time::Duration;

/// Collect every event of `subscription` until it ends
///
/// Panics if the subscription is still open after `timeout`.
pub async fn collect_progress(
    subscription: ProgressSubscription,
    timeout: Duration,
) -> Vec<ProgressEvent> {
    tokio::time::timeout(timeout, subscription.collect::<Vec<_>>())
        .await
        .expect("progress subscription did not end in time")
}

/// Assert the common shape of a finished progress sequence
///
/// - starts with the handshake frame
/// - exactly one terminal event, which is last and has stage `terminal`
/// - percentages never decrease within a stage
pub fn assert_progress_sequence(events: &[ProgressEvent], terminal: Stage) {
    assert_eq!(
        events.first(),
        Some(&ProgressEvent::handshake()),
        "first event must be the handshake: {events:?}"
    );

    let terminals: Vec<&ProgressEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminals.len(), 1, "exactly one terminal event: {events:?}");
    assert_eq!(events.last().map(|e| e.stage), Some(terminal), "{events:?}");

    for pair in events.windows(2) {
        if pair[0].stage == pair[1].stage
            && let (Some(before), Some(after)) = (pair[0].progress, pair[1].progress)
        {
            assert!(
                after >= before,
                "progress went backwards within {:?}: {before} -> {after}",
                pair[0].stage
            );
        }
    }
}

/// Stages of `events` with consecutive duplicates removed
pub fn stage_path(events: &[ProgressEvent]) -> Vec<Stage> {
    let mut stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
    stages.dedup();
    stages
}

/// Wait until `check` resolves to true, polling every 20 ms
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
