//! The publishing side a running pipeline holds

use super::{Estimate, ProgressHub, PublishThrottle, StageProgress};
use crate::types::{DescriptorId, ProgressEvent, Stage};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug)]
struct ReporterState {
    stage: StageProgress,
    throttle: PublishThrottle,
    finished: bool,
}

/// Publishes one download's progress into a [`ProgressHub`]
///
/// Percentages are clamped per stage and throttled; stage transitions are
/// published immediately. Only the first terminal event is published, later
/// calls are ignored. Clones share state, so a stderr reader task and the
/// supervising task can report through the same reporter.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    hub: ProgressHub,
    id: DescriptorId,
    state: Arc<Mutex<ReporterState>>,
}

impl ProgressReporter {
    /// Create a reporter publishing at most one intra-stage update per `interval`
    pub fn new(hub: ProgressHub, id: DescriptorId, interval: Duration) -> Self {
        Self {
            hub,
            id,
            state: Arc::new(Mutex::new(ReporterState {
                stage: StageProgress::new(),
                throttle: PublishThrottle::new(interval),
                finished: false,
            })),
        }
    }

    /// Download id this reporter publishes for
    pub fn id(&self) -> &DescriptorId {
        &self.id
    }

    /// Announce a new stage
    pub fn enter(&self, stage: Stage) {
        self.send(stage, None, |_| ProgressEvent::stage(stage));
    }

    /// Report a percentage within `stage`
    pub fn percent(&self, stage: Stage, percent: f64) {
        self.send(stage, Some(percent), |p| {
            ProgressEvent::with_progress(stage, p.unwrap_or_default())
        });
    }

    /// Report an estimator reading within `stage`
    pub fn estimate(&self, stage: Stage, estimate: &Estimate) {
        self.send(stage, Some(estimate.percent), |p| ProgressEvent {
            speed: estimate.speed.clone(),
            eta: estimate.eta.clone(),
            ..ProgressEvent::with_progress(stage, p.unwrap_or_default())
        });
    }

    /// Publish `complete`
    pub fn complete(&self) {
        self.finish(ProgressEvent::complete());
    }

    /// Publish `cancelled`
    pub fn cancelled(&self) {
        self.finish(ProgressEvent::cancelled());
    }

    /// Publish `error` with `message`
    pub fn failed(&self, message: impl Into<String>) {
        self.finish(ProgressEvent::failed(message));
    }

    /// Stage of the most recent report
    pub fn current_stage(&self) -> Option<Stage> {
        self.lock().stage.current()
    }

    /// Whether a terminal event has been published
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    fn send(&self, stage: Stage, percent: Option<f64>, build: impl FnOnce(Option<f64>) -> ProgressEvent) {
        let event = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            let clamped = state.stage.clamp(stage, percent.unwrap_or(0.0));
            let event = build(percent.map(|_| clamped));
            if !state.throttle.should_publish(&event) {
                return;
            }
            event
        };
        self.hub.publish(&self.id, event);
    }

    fn finish(&self, event: ProgressEvent) {
        {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.finished = true;
        }
        tracing::debug!(download_id = %self.id, stage = event.stage.as_str(), "Pipeline finished");
        self.hub.publish(&self.id, event);
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
