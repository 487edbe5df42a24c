//! Turning tool diagnostics into progress estimates
//!
//! Both external tools report progress as text on stderr. Lines are cut on
//! `\r` as well as `\n` because the extractor redraws its progress line in
//! place.

use crate::utils::format_hms;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

/// Upper bound for a percentage derived from elapsed mux time
const MUX_PERCENT_CAP: f64 = 99.0;

/// Time constant (seconds) of the fallback curve used when the duration is unknown
const UNKNOWN_DURATION_TAU: f64 = 600.0;

/// Asymptote of the fallback curve
const UNKNOWN_DURATION_CEILING: f64 = 95.0;

static MUX_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(?:out_)?time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)")
        .unwrap_or_else(|e| panic!("invalid mux time regex: {e}"))
});

static MUX_SPEED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)speed=\s*(\d+(?:\.\d+)?)x")
        .unwrap_or_else(|e| panic!("invalid mux speed regex: {e}"))
});

static EXTRACTOR_PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%(?:.*?\sat\s+(\S+))?(?:.*?\sETA\s+(\S+))?")
        .unwrap_or_else(|e| panic!("invalid extractor percent regex: {e}"))
});

/// A progress reading derived from one diagnostic line
#[derive(Clone, Debug, PartialEq)]
pub struct Estimate {
    /// Percentage within the current stage
    pub percent: f64,
    /// Human-readable speed
    pub speed: Option<String>,
    /// Human-readable time remaining
    pub eta: Option<String>,
}

/// Strategy for reading progress out of a tool's diagnostic stream
pub trait ProgressEstimator: Send {
    /// Consume one diagnostic line, returning an estimate if it carried one
    fn feed_line(&mut self, line: &str) -> Option<Estimate>;
}

/// Estimates mux progress from the elapsed output time the muxer reports
///
/// Understands both `-progress` key/value lines (`out_time=00:01:02.500000`,
/// `speed=1.8x`) and classic stats lines (`... time=00:01:02.50 ... speed=1.8x`).
#[derive(Debug, Default)]
pub struct MuxTimeEstimator {
    duration: Option<f64>,
    speed: Option<f64>,
}

impl MuxTimeEstimator {
    /// `duration` is the expected media length in seconds, when known
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            duration: duration.filter(|d| d.is_finite() && *d > 0.0),
            speed: None,
        }
    }

    /// Percentage for `elapsed` seconds of output
    pub fn percent_for(&self, elapsed: f64) -> f64 {
        let elapsed = elapsed.max(0.0);
        match self.duration {
            Some(duration) => (elapsed / duration * 100.0).min(MUX_PERCENT_CAP),
            None => UNKNOWN_DURATION_CEILING * (1.0 - (-elapsed / UNKNOWN_DURATION_TAU).exp()),
        }
    }
}

impl ProgressEstimator for MuxTimeEstimator {
    fn feed_line(&mut self, line: &str) -> Option<Estimate> {
        if let Some(caps) = MUX_SPEED_RE.captures(line)
            && let Ok(speed) = caps[1].parse::<f64>()
        {
            self.speed = Some(speed);
        }

        let caps = MUX_TIME_RE.captures(line)?;
        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        let elapsed = hours * 3600.0 + minutes * 60.0 + seconds;

        let eta = match (self.duration, self.speed) {
            (Some(duration), Some(speed)) if speed > 0.0 => {
                Some(format_hms(((duration - elapsed) / speed).max(0.0)))
            }
            _ => None,
        };

        Some(Estimate {
            percent: self.percent_for(elapsed),
            speed: self.speed.map(|s| format!("{s}x")),
            eta,
        })
    }
}

/// Reads the extractor's `[download]  42.3% of ~12.30MiB at 1.20MiB/s ETA 00:10` lines
#[derive(Debug, Default)]
pub struct ExtractorPercentEstimator;

impl ExtractorPercentEstimator {
    /// Create an estimator
    pub fn new() -> Self {
        Self
    }
}

impl ProgressEstimator for ExtractorPercentEstimator {
    fn feed_line(&mut self, line: &str) -> Option<Estimate> {
        let caps = EXTRACTOR_PERCENT_RE.captures(line.trim_start())?;
        let percent: f64 = caps[1].parse().ok()?;

        let known = |m: Option<regex::Match<'_>>| {
            m.map(|m| m.as_str().to_string())
                .filter(|s| !s.starts_with("Unknown"))
        };

        Some(Estimate {
            percent: percent.clamp(0.0, 100.0),
            speed: known(caps.get(2)),
            eta: known(caps.get(3)),
        })
    }
}

/// Splits a byte stream into lines on `\r` and `\n`
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Create an empty splitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes`, returning every line completed by them (empty lines skipped)
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// The trailing line without a terminator, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

/// Keeps the last few diagnostic lines for error messages
#[derive(Debug)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    limit: usize,
}

impl DiagnosticTail {
    /// Lines kept by [`Default`]
    pub const DEFAULT_LIMIT: usize = 20;

    /// Keep at most `limit` lines
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(limit),
            limit: limit.max(1),
        }
    }

    /// Record a line, evicting the oldest one when full
    ///
    /// `-progress` key/value chatter is not worth keeping and is ignored.
    pub fn push(&mut self, line: &str) {
        if is_progress_key_value(line) {
            return;
        }
        if self.lines.len() == self.limit {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The kept lines joined with newlines
    pub fn joined(&self) -> String {
        self.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for DiagnosticTail {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}

fn is_progress_key_value(line: &str) -> bool {
    const KEYS: [&str; 12] = [
        "frame=",
        "fps=",
        "stream_",
        "bitrate=",
        "total_size=",
        "out_time_us=",
        "out_time_ms=",
        "out_time=",
        "dup_frames=",
        "drop_frames=",
        "speed=",
        "progress=",
    ];
    KEYS.iter().any(|key| line.starts_with(key)) && !line.contains(' ')
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const MUX_PROGRESS_BLOCK: &str = "frame=0\nfps=0.00\nbitrate=N/A\ntotal_size=48\n\
        out_time_us=12500000\nout_time_ms=12500000\nout_time=00:00:12.500000\n\
        dup_frames=0\ndrop_frames=0\nspeed=2.5x\nprogress=continue\n";

    fn feed_all(estimator: &mut dyn ProgressEstimator, text: &str) -> Vec<Estimate> {
        text.lines().filter_map(|l| estimator.feed_line(l)).collect()
    }

    #[test]
    fn mux_progress_block_yields_one_estimate() {
        let mut estimator = MuxTimeEstimator::new(Some(100.0));
        let estimates = feed_all(&mut estimator, MUX_PROGRESS_BLOCK);

        assert_eq!(estimates.len(), 1);
        assert!((estimates[0].percent - 12.5).abs() < 1e-9);
        // speed arrives after out_time inside a block, so it applies from the next one
        assert_eq!(estimates[0].speed, None);

        let next = estimator.feed_line("out_time=00:00:50.000000").unwrap();
        assert!((next.percent - 50.0).abs() < 1e-9);
        assert_eq!(next.speed.as_deref(), Some("2.5x"));
        assert_eq!(next.eta.as_deref(), Some("00:00:20"));
    }

    #[test]
    fn mux_stats_line_is_understood() {
        let mut estimator = MuxTimeEstimator::new(Some(3600.0));
        let estimate = estimator
            .feed_line("frame= 1200 fps=240 q=-1.0 size=   10240kB time=00:30:00.00 bitrate=4000.0kbits/s speed=9.6x")
            .unwrap();

        assert!((estimate.percent - 50.0).abs() < 1e-9);
        assert_eq!(estimate.speed.as_deref(), Some("9.6x"));
    }

    #[test]
    fn mux_percent_is_capped_below_100() {
        let mut estimator = MuxTimeEstimator::new(Some(10.0));
        let estimate = estimator.feed_line("out_time=00:00:15.000000").unwrap();
        assert_eq!(estimate.percent, 99.0);
    }

    #[test]
    fn unknown_duration_uses_saturating_curve() {
        let estimator = MuxTimeEstimator::new(None);
        assert_eq!(estimator.percent_for(0.0), 0.0);

        let at_tau = estimator.percent_for(600.0);
        assert!((at_tau - 95.0 * (1.0 - (-1.0f64).exp())).abs() < 1e-9);
        assert!(estimator.percent_for(100_000.0) < 95.0 + 1e-9);
        assert!(estimator.percent_for(1200.0) > at_tau);
    }

    #[test]
    fn zero_duration_is_treated_as_unknown() {
        let estimator = MuxTimeEstimator::new(Some(0.0));
        assert!(estimator.percent_for(60.0) < 95.0);
    }

    #[test]
    fn unrelated_and_na_lines_are_ignored() {
        let mut estimator = MuxTimeEstimator::new(Some(100.0));
        assert!(estimator.feed_line("out_time=N/A").is_none());
        assert!(estimator.feed_line("Input #0, matroska,webm, from 'tcp://127.0.0.1:4000':").is_none());
        assert!(estimator.feed_line("").is_none());
    }

    #[test]
    fn extractor_percent_line() {
        let mut estimator = ExtractorPercentEstimator::new();
        let estimate = estimator
            .feed_line("[download]  42.3% of ~ 12.30MiB at    1.20MiB/s ETA 00:10 (frag 3/8)")
            .unwrap();

        assert!((estimate.percent - 42.3).abs() < 1e-9);
        assert_eq!(estimate.speed.as_deref(), Some("1.20MiB/s"));
        assert_eq!(estimate.eta.as_deref(), Some("00:10"));
    }

    #[test]
    fn extractor_unknown_speed_is_omitted() {
        let mut estimator = ExtractorPercentEstimator::new();
        let estimate = estimator
            .feed_line("[download]   0.0% of 3.50MiB at  Unknown B/s ETA Unknown")
            .unwrap();
        assert_eq!(estimate.percent, 0.0);
        assert_eq!(estimate.speed, None);
        assert_eq!(estimate.eta, None);
    }

    #[test]
    fn extractor_non_progress_lines_are_ignored() {
        let mut estimator = ExtractorPercentEstimator::new();
        assert!(estimator.feed_line("[download] Destination: video.mp4").is_none());
        assert!(estimator.feed_line("[youtube] abc: Downloading webpage").is_none());
    }

    #[test]
    fn splitter_handles_carriage_returns_and_partial_lines() {
        let mut splitter = LineSplitter::new();
        let first = splitter.push(b"[download]  1.0%\r[download]  2.");
        assert_eq!(first, ["[download]  1.0%"]);

        let second = splitter.push(b"0%\r\nERROR: boom\n\ntail");
        assert_eq!(second, ["[download]  2.0%", "ERROR: boom"]);
        assert_eq!(splitter.finish().as_deref(), Some("tail"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn tail_keeps_last_lines_and_skips_progress_chatter() {
        let mut tail = DiagnosticTail::new(2);
        tail.push("out_time=00:00:01.000000");
        tail.push("first");
        tail.push("second");
        tail.push("third");
        tail.push("progress=end");

        assert_eq!(tail.joined(), "second\nthird");
    }
}
