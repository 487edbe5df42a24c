//! Progress broadcast channel
//!
//! [`ProgressHub`] keeps at most one live subscription per download id. The
//! pipeline publishes into the hub without knowing whether anybody listens;
//! the HTTP layer turns a [`ProgressSubscription`] into SSE or NDJSON frames.
//!
//! - [`estimator`] - parsers turning tool diagnostics into percentages
//! - [`throttle`] - per-stage clamping and publish rate limiting
//! - [`reporter`] - the publishing handle a running pipeline holds

pub mod estimator;
pub mod reporter;
pub mod throttle;

pub use estimator::{
    DiagnosticTail, Estimate, ExtractorPercentEstimator, LineSplitter, MuxTimeEstimator,
    ProgressEstimator,
};
pub use reporter::ProgressReporter;
pub use throttle::{PublishThrottle, StageProgress};

use crate::config::ProgressConfig;
use crate::types::{DescriptorId, ProgressEvent};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Sleep;

/// Capacity of the process-wide event tap
const TAP_CAPACITY: usize = 1000;

struct Registration {
    generation: u64,
    sender: mpsc::Sender<ProgressEvent>,
}

struct HubInner {
    connections: Mutex<HashMap<DescriptorId, Registration>>,
    next_generation: AtomicU64,
    capacity: usize,
    max_lifetime: Duration,
    tap: broadcast::Sender<(DescriptorId, ProgressEvent)>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<DescriptorId, Registration>> {
        // a panic while holding the lock leaves the map itself consistent
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry of live progress subscriptions keyed by download id
///
/// Cloning is cheap and clones share the same registrations.
#[derive(Clone)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHub")
            .field("open", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("max_lifetime", &self.inner.max_lifetime)
            .finish()
    }
}

impl ProgressHub {
    /// Create a hub from the progress configuration
    pub fn new(config: &ProgressConfig) -> Self {
        Self::with_limits(config.channel_capacity, config.max_lifetime)
    }

    /// Create a hub with an explicit per-subscription buffer and lifetime
    pub fn with_limits(capacity: usize, max_lifetime: Duration) -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                connections: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                // the handshake alone needs one slot
                capacity: capacity.max(1),
                max_lifetime,
                tap,
            }),
        }
    }

    /// Open the subscription for `id`
    ///
    /// The handshake frame is queued immediately. A subscription already open
    /// for the same id is superseded: its stream ends without receiving any
    /// further event.
    pub fn open(&self, id: &DescriptorId) -> ProgressSubscription {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        // cannot fail: the channel is fresh and has at least one slot
        let _ = sender.try_send(ProgressEvent::handshake());

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.lock().insert(
            id.clone(),
            Registration {
                generation,
                sender,
            },
        );

        if previous.is_some() {
            tracing::debug!(download_id = %id, "Progress subscription superseded");
        } else {
            tracing::debug!(download_id = %id, "Progress subscription opened");
        }

        ProgressSubscription {
            id: id.clone(),
            generation,
            receiver,
            deadline: Box::pin(tokio::time::sleep(self.inner.max_lifetime)),
            hub: Arc::downgrade(&self.inner),
            finished: false,
        }
    }

    /// Deliver `event` to the subscription for `id`, if one is open
    ///
    /// Events for ids nobody listens to are dropped; there is no replay. A
    /// terminal event closes the subscription after delivery.
    pub fn publish(&self, id: &DescriptorId, event: ProgressEvent) {
        let terminal = event.is_terminal();
        {
            let mut connections = self.inner.lock();
            if let Some(registration) = connections.get(id) {
                let unregister = match registration.sender.try_send(event.clone()) {
                    Ok(()) => terminal,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(
                            download_id = %id,
                            stage = event.stage.as_str(),
                            "Progress subscriber lagging, event dropped"
                        );
                        // releasing the sender still ends the stream once the buffer drains
                        terminal
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => true,
                };
                if unregister {
                    connections.remove(id);
                }
            }
        }

        // no receivers is the normal case for the tap
        let _ = self.inner.tap.send((id.clone(), event));
    }

    /// Unregister the subscription for `id`, ending its stream
    pub fn close(&self, id: &DescriptorId) {
        if self.inner.lock().remove(id).is_some() {
            tracing::debug!(download_id = %id, "Progress subscription closed");
        }
    }

    /// Drop every registration (shutdown)
    pub fn close_all(&self) -> usize {
        let mut connections = self.inner.lock();
        let count = connections.len();
        connections.clear();
        count
    }

    /// Whether a subscription is open for `id`
    pub fn is_open(&self, id: &DescriptorId) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Number of open subscriptions
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no subscription is open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every published event, for every id
    pub fn tap(&self) -> broadcast::Receiver<(DescriptorId, ProgressEvent)> {
        self.inner.tap.subscribe()
    }
}

/// One client's view of a download's progress
///
/// Yields the handshake first, then every event published while it is the
/// current registration. Ends after a terminal event, when superseded or
/// closed, or when the maximum lifetime elapses. Dropping it unregisters the
/// id unless a newer subscription has taken over.
pub struct ProgressSubscription {
    id: DescriptorId,
    generation: u64,
    receiver: mpsc::Receiver<ProgressEvent>,
    deadline: Pin<Box<Sleep>>,
    hub: Weak<HubInner>,
    finished: bool,
}

impl ProgressSubscription {
    /// Download id this subscription follows
    pub fn id(&self) -> &DescriptorId {
        &self.id
    }
}

impl Stream for ProgressSubscription {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                return Poll::Ready(Some(event));
            }
            Poll::Ready(None) => {
                self.finished = true;
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        if self.deadline.as_mut().poll(cx).is_ready() {
            tracing::debug!(download_id = %self.id, "Progress subscription reached its maximum lifetime");
            self.finished = true;
            return Poll::Ready(None);
        }

        Poll::Pending
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let mut connections = hub.lock();
        if connections
            .get(&self.id)
            .is_some_and(|r| r.generation == self.generation)
        {
            connections.remove(&self.id);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stage;
    use futures::StreamExt;

    fn hub() -> ProgressHub {
        ProgressHub::with_limits(16, Duration::from_secs(60))
    }

    fn id(s: &str) -> DescriptorId {
        s.parse().unwrap()
    }

    async fn next(sub: &mut ProgressSubscription) -> Option<ProgressEvent> {
        tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("subscription stalled")
    }

    #[tokio::test]
    async fn handshake_is_first_frame() {
        let hub = hub();
        let mut sub = hub.open(&id("abc"));

        assert_eq!(next(&mut sub).await, Some(ProgressEvent::handshake()));
    }

    #[tokio::test]
    async fn published_events_arrive_in_order() {
        let hub = hub();
        let a = id("abc");
        let mut sub = hub.open(&a);

        hub.publish(&a, ProgressEvent::stage(Stage::Info));
        hub.publish(&a, ProgressEvent::with_progress(Stage::Streaming, 12.0));

        assert_eq!(next(&mut sub).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut sub).await.unwrap().stage, Stage::Info);
        assert_eq!(next(&mut sub).await.unwrap().progress, Some(12.0));
    }

    #[tokio::test]
    async fn terminal_event_ends_stream_and_unregisters() {
        let hub = hub();
        let a = id("abc");
        let mut sub = hub.open(&a);

        hub.publish(&a, ProgressEvent::complete());
        assert!(!hub.is_open(&a));

        assert_eq!(next(&mut sub).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut sub).await.unwrap().stage, Stage::Complete);
        assert_eq!(next(&mut sub).await, None);
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_dropped() {
        let hub = hub();
        let a = id("abc");

        hub.publish(&a, ProgressEvent::stage(Stage::Info));
        let mut sub = hub.open(&a);
        hub.publish(&a, ProgressEvent::stage(Stage::Merging));

        // the earlier Info event is never replayed
        assert_eq!(next(&mut sub).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut sub).await.unwrap().stage, Stage::Merging);
    }

    #[tokio::test]
    async fn reopening_supersedes_silently() {
        let hub = hub();
        let a = id("abc");
        let mut first = hub.open(&a);
        let mut second = hub.open(&a);

        hub.publish(&a, ProgressEvent::stage(Stage::Info));

        // the old stream only sees what was queued before it was replaced
        assert_eq!(next(&mut first).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut first).await, None);

        assert_eq!(next(&mut second).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut second).await.unwrap().stage, Stage::Info);
    }

    #[tokio::test]
    async fn dropping_superseded_subscription_keeps_successor() {
        let hub = hub();
        let a = id("abc");
        let first = hub.open(&a);
        let _second = hub.open(&a);

        drop(first);
        assert!(hub.is_open(&a));
    }

    #[tokio::test]
    async fn dropping_current_subscription_unregisters() {
        let hub = hub();
        let a = id("abc");
        let sub = hub.open(&a);
        assert_eq!(hub.len(), 1);

        drop(sub);
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn close_ends_stream() {
        let hub = hub();
        let a = id("abc");
        let mut sub = hub.open(&a);

        hub.close(&a);
        assert_eq!(next(&mut sub).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut sub).await, None);
    }

    #[tokio::test]
    async fn ids_are_independent() {
        let hub = hub();
        let (a, b) = (id("aaa"), id("bbb"));
        let mut sub_a = hub.open(&a);
        let mut sub_b = hub.open(&b);

        hub.publish(&a, ProgressEvent::failed("boom"));
        hub.publish(&b, ProgressEvent::stage(Stage::Merging));

        assert_eq!(next(&mut sub_a).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut sub_a).await.unwrap().stage, Stage::Error);
        assert_eq!(next(&mut sub_b).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut sub_b).await.unwrap().stage, Stage::Merging);
        assert!(hub.is_open(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_expires_after_max_lifetime() {
        let hub = ProgressHub::with_limits(4, Duration::from_secs(30));
        let mut sub = hub.open(&id("abc"));
        assert_eq!(sub.next().await.unwrap().stage, Stage::Preparing);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn full_buffer_drops_events_without_blocking() {
        let hub = ProgressHub::with_limits(2, Duration::from_secs(60));
        let a = id("abc");
        let mut sub = hub.open(&a);

        for i in 0..10 {
            hub.publish(&a, ProgressEvent::with_progress(Stage::Streaming, i as f64));
        }

        assert_eq!(next(&mut sub).await.unwrap().stage, Stage::Preparing);
        assert_eq!(next(&mut sub).await.unwrap().progress, Some(0.0));
        assert!(hub.is_open(&a));
    }

    #[tokio::test]
    async fn tap_sees_every_event() {
        let hub = hub();
        let mut tap = hub.tap();
        let a = id("abc");

        hub.publish(&a, ProgressEvent::stage(Stage::Info));

        let (tapped_id, event) = tap.recv().await.unwrap();
        assert_eq!(tapped_id, a);
        assert_eq!(event.stage, Stage::Info);
    }
}
