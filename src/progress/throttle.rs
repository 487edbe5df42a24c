//! Per-stage clamping and publish rate limiting

use crate::types::{ProgressEvent, Stage};
use std::time::{Duration, Instant};

/// Keeps a stage's percentage from moving backwards
///
/// The percentage is reset when the stage changes, so each stage is a fresh
/// 0 to 100 range.
#[derive(Debug, Default)]
pub struct StageProgress {
    stage: Option<Stage>,
    best: f64,
}

impl StageProgress {
    /// Create a tracker with no stage yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `percent` for `stage` and return the value to report
    pub fn clamp(&mut self, stage: Stage, percent: f64) -> f64 {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };

        if self.stage != Some(stage) {
            self.stage = Some(stage);
            self.best = percent;
        } else if percent > self.best {
            self.best = percent;
        }
        self.best
    }

    /// Stage most recently recorded
    pub fn current(&self) -> Option<Stage> {
        self.stage
    }
}

/// Limits how often progress frames go out
///
/// Stage changes and terminal events always pass; plain percentage updates
/// within a stage pass at most once per interval.
#[derive(Debug)]
pub struct PublishThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    last_stage: Option<Stage>,
}

impl PublishThrottle {
    /// Allow at most one intra-stage update per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            last_stage: None,
        }
    }

    /// Whether `event` should be sent now; records the send when it should
    pub fn should_publish(&mut self, event: &ProgressEvent) -> bool {
        self.should_publish_at(event, Instant::now())
    }

    pub(crate) fn should_publish_at(&mut self, event: &ProgressEvent, now: Instant) -> bool {
        let stage_changed = self.last_stage != Some(event.stage);
        let due = self
            .last_sent
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);

        if event.is_terminal() || stage_changed || due {
            self.last_sent = Some(now);
            self.last_stage = Some(event.stage);
            true
        } else {
            false
        }
    }
}
