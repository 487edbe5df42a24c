//! Extractor JSON dump types

use serde::{Deserialize, Serialize};

/// Parsed output of the extractor's `--dump-single-json`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    /// Site-specific media id
    #[serde(default)]
    pub id: Option<String>,
    /// Media title
    #[serde(default)]
    pub title: Option<String>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    /// Every track the site offers
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

impl RemoteMetadata {
    /// Title, or a neutral placeholder when the site gave none
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("download")
    }
}

/// One track as listed by the extractor
///
/// Sizes are read as floating point since the extractor emits approximate
/// sizes as either integers or floats.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFormat {
    /// Format id (e.g. "137", "140", "hls-720p")
    pub format_id: String,
    /// File extension (mp4, webm, m4a)
    #[serde(default)]
    pub ext: Option<String>,
    /// Video codec, `"none"` for audio-only tracks
    #[serde(default)]
    pub vcodec: Option<String>,
    /// Audio codec, `"none"` for video-only tracks
    #[serde(default)]
    pub acodec: Option<String>,
    /// Height in pixels
    #[serde(default)]
    pub height: Option<u32>,
    /// Width in pixels
    #[serde(default)]
    pub width: Option<u32>,
    /// Exact size in bytes
    #[serde(default)]
    pub filesize: Option<f64>,
    /// Approximate size in bytes
    #[serde(default)]
    pub filesize_approx: Option<f64>,
    /// Total bitrate in kbps
    #[serde(default)]
    pub tbr: Option<f64>,
    /// Audio bitrate in kbps
    #[serde(default)]
    pub abr: Option<f64>,
    /// Free-form note ("1080p", "medium", ...)
    #[serde(default)]
    pub format_note: Option<String>,
}

impl RawFormat {
    /// Exact size, else approximate size
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize
            .or(self.filesize_approx)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(|s| s.round() as u64)
    }

    /// Whether the track carries video
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    /// Whether the track carries audio
    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    /// Audio without video
    pub fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref() == Some("none") && self.has_audio()
    }

    /// Container extension, defaulting to mp4
    pub fn container(&self) -> &str {
        self.ext.as_deref().unwrap_or("mp4")
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|c| !c.is_empty() && c != "none")
}
