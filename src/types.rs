//! Core types for remux-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

/// Opaque, URL-safe identifier of a download descriptor
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct DescriptorId(String);

impl DescriptorId {
    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    // callers guarantee the value is URL-safe (hex digest output)
    pub(crate) fn from_trusted(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a string is not a valid descriptor id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDescriptorId;

impl std::fmt::Display for InvalidDescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("descriptor id must be 1-64 URL-safe characters")
    }
}

impl std::error::Error for InvalidDescriptorId {}

impl std::str::FromStr for DescriptorId {
    type Err = InvalidDescriptorId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if crate::utils::is_url_safe_id(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidDescriptorId)
        }
    }
}

impl From<DescriptorId> for String {
    fn from(id: DescriptorId) -> Self {
        id.0
    }
}

/// Pipeline stage reported through the progress channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Subscription opened, nothing started yet
    Preparing,
    /// Remote metadata fetched
    Info,
    /// Fetching a single track that already contains audio
    Downloading,
    /// Fetching the video track (legacy path)
    DownloadingVideo,
    /// Fetching the audio track (legacy path)
    DownloadingAudio,
    /// Muxer running, no output delivered yet
    Merging,
    /// Bytes are flowing to the client
    Streaming,
    /// Finished file handed to the client (legacy path)
    BrowserDownload,
    /// Stream finished successfully
    Complete,
    /// Client went away before completion
    Cancelled,
    /// Pipeline failed
    Error,
}

impl Stage {
    /// Whether no further events follow this stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Cancelled | Stage::Error)
    }

    /// Wire name of the stage (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preparing => "preparing",
            Stage::Info => "info",
            Stage::Downloading => "downloading",
            Stage::DownloadingVideo => "downloading_video",
            Stage::DownloadingAudio => "downloading_audio",
            Stage::Merging => "merging",
            Stage::Streaming => "streaming",
            Stage::BrowserDownload => "browser_download",
            Stage::Complete => "complete",
            Stage::Cancelled => "cancelled",
            Stage::Error => "error",
        }
    }
}

/// A single progress update
///
/// `progress` is a percentage within the current stage: it never decreases
/// while the stage stays the same and may restart from a lower value when the
/// stage changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProgressEvent {
    /// Current stage
    pub stage: Stage,
    /// Percentage (0.0 to 100.0) within the stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Human-readable processing speed (e.g. "1.8x" or "2.3MiB/s")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    /// Human-readable estimated time remaining (HH:MM:SS)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    /// Error message (error stage only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// Event for a stage with no additional data
    pub fn stage(stage: Stage) -> Self {
        Self {
            stage,
            progress: None,
            speed: None,
            eta: None,
            error: None,
        }
    }

    /// Event for a stage with a percentage
    pub fn with_progress(stage: Stage, progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Self::stage(stage)
        }
    }

    /// The handshake frame sent as soon as a subscription opens
    pub fn handshake() -> Self {
        Self::with_progress(Stage::Preparing, 0.0)
    }

    /// Terminal success frame
    pub fn complete() -> Self {
        Self::with_progress(Stage::Complete, 100.0)
    }

    /// Terminal cancellation frame
    pub fn cancelled() -> Self {
        Self::stage(Stage::Cancelled)
    }

    /// Terminal failure frame
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::stage(Stage::Error)
        }
    }

    /// Whether this event ends the subscription
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// A presentable quality option for a remote source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionFormat {
    /// Extractor format id (passed back in POST /downloads)
    pub format_id: String,
    /// Container extension (e.g. "mp4", "webm", "m4a")
    pub container: String,
    /// Exact or approximate size in bytes
    pub size_bytes: u64,
    /// Track carries video
    pub has_video: bool,
    /// Track carries audio
    pub has_audio: bool,
    /// Track carries audio and no video
    pub is_audio_only: bool,
    /// Normalized label ("720p", "audio 128k", ...)
    pub quality_label: String,
    /// Video height in pixels, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Audio encoder chosen for the real-time mux
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum AudioEncoder {
    /// libfdk_aac HE-AAC profile
    HeAac {
        /// Target bitrate (e.g. "64k")
        bitrate: String,
    },
    /// Native AAC-LC encoder
    Aac {
        /// Target bitrate (e.g. "128k")
        bitrate: String,
    },
}

impl AudioEncoder {
    /// Muxer arguments selecting this encoder
    pub fn muxer_args(&self) -> Vec<String> {
        match self {
            AudioEncoder::HeAac { bitrate } => vec![
                "-c:a".into(),
                "libfdk_aac".into(),
                "-profile:a".into(),
                "aac_he".into(),
                "-b:a".into(),
                bitrate.clone(),
            ],
            AudioEncoder::Aac { bitrate } => vec![
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                bitrate.clone(),
            ],
        }
    }
}

/// System capabilities reported by GET /capabilities
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Capabilities {
    /// Extractor binary location
    #[schema(value_type = String)]
    pub extractor: PathBuf,
    /// Muxer binary location
    #[schema(value_type = String)]
    pub muxer: PathBuf,
    /// Real-time muxing enabled
    pub realtime_mux: bool,
    /// Audio encoder selected by the capability probe, once probed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_encoder: Option<AudioEncoder>,
    /// Number of live descriptors
    pub active_descriptors: usize,
    /// Number of running process graphs
    pub active_streams: usize,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_serializes_to_preparing_zero() {
        let json = serde_json::to_value(ProgressEvent::handshake()).unwrap();
        assert_eq!(json, serde_json::json!({"stage": "preparing", "progress": 0.0}));
    }

    #[test]
    fn stage_wire_names_match_serde() {
        for stage in [
            Stage::Preparing,
            Stage::Info,
            Stage::Downloading,
            Stage::DownloadingVideo,
            Stage::DownloadingAudio,
            Stage::Merging,
            Stage::Streaming,
            Stage::BrowserDownload,
            Stage::Complete,
            Stage::Cancelled,
            Stage::Error,
        ] {
            let json = serde_json::to_value(stage).unwrap();
            assert_eq!(json, stage.as_str());
        }
    }

    #[test]
    fn only_complete_cancelled_and_error_are_terminal() {
        assert!(ProgressEvent::complete().is_terminal());
        assert!(ProgressEvent::cancelled().is_terminal());
        assert!(ProgressEvent::failed("boom").is_terminal());
        assert!(!ProgressEvent::with_progress(Stage::Streaming, 50.0).is_terminal());
        assert!(!Stage::BrowserDownload.is_terminal());
    }

    #[test]
    fn error_event_carries_message() {
        let json = serde_json::to_value(ProgressEvent::failed("muxer crashed")).unwrap();
        assert_eq!(json["stage"], "error");
        assert_eq!(json["error"], "muxer crashed");
        assert!(json.get("progress").is_none());
    }

    #[test]
    fn descriptor_id_rejects_unsafe_input() {
        assert!("a1b2c3d4e5f60718".parse::<DescriptorId>().is_ok());
        assert!("../etc/passwd".parse::<DescriptorId>().is_err());
        assert!("".parse::<DescriptorId>().is_err());
        assert!("has space".parse::<DescriptorId>().is_err());
    }

    #[test]
    fn extraction_format_uses_camel_case() {
        let format = ExtractionFormat {
            format_id: "137".into(),
            container: "mp4".into(),
            size_bytes: 10,
            has_video: true,
            has_audio: false,
            is_audio_only: false,
            quality_label: "1080p".into(),
            height: Some(1080),
        };
        let json = serde_json::to_value(&format).unwrap();
        assert_eq!(json["formatId"], "137");
        assert_eq!(json["isAudioOnly"], false);
        assert_eq!(json["qualityLabel"], "1080p");
    }

    #[test]
    fn audio_encoder_args() {
        let he = AudioEncoder::HeAac {
            bitrate: "64k".into(),
        };
        assert_eq!(
            he.muxer_args(),
            ["-c:a", "libfdk_aac", "-profile:a", "aac_he", "-b:a", "64k"]
        );
        let aac = AudioEncoder::Aac {
            bitrate: "128k".into(),
        };
        assert_eq!(aac.muxer_args(), ["-c:a", "aac", "-b:a", "128k"]);
    }
}
