//! Format selector
//!
//! Reduces the extractor's full track list to a short set of presentable
//! options: one video track per quality bucket and the two extreme audio
//! tracks.

mod metadata;

pub use metadata::{RawFormat, RemoteMetadata};

use crate::error::{Error, ExtractionError, Result, ToolError};
use crate::tools::{ToolBinary, translate_extractor_error};
use crate::types::ExtractionFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;
use utoipa::ToSchema;

/// Height thresholds, highest first, each with the bucket it maps to
const HEIGHT_BUCKETS: [u32; 7] = [2160, 1440, 1080, 720, 480, 360, 240];

/// Bucket for anything below the smallest threshold
const LOWEST_BUCKET: u32 = 144;

/// Options presented for one remote source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormatListing {
    /// Media title
    pub title: String,
    /// Duration in seconds, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Video options by descending height, then audio options by ascending size
    pub formats: Vec<ExtractionFormat>,
}

/// Lists and resolves formats through the extractor
#[derive(Clone, Debug)]
pub struct FormatSelector {
    extractor: Arc<ToolBinary>,
    extractor_args: Vec<String>,
}

impl FormatSelector {
    /// Create a selector running `extractor` with `extractor_args` appended
    pub fn new(extractor: Arc<ToolBinary>, extractor_args: Vec<String>) -> Self {
        Self {
            extractor,
            extractor_args,
        }
    }

    /// Fetch and parse the remote metadata for `source_url`
    ///
    /// # Errors
    ///
    /// - [`ExtractionError::Unsupported`] for a URL that is not http(s)
    /// - the translated [`ExtractionError`] when the extractor fails
    /// - [`ExtractionError::InvalidMetadata`] when its output is not valid JSON
    pub async fn fetch_metadata(&self, source_url: &str) -> Result<RemoteMetadata> {
        let url = validate_source_url(source_url)?;

        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.extractor_args.iter().cloned());
        args.push(url.to_string());

        let stdout = self.extractor.execute(&args).await.map_err(|e| match e {
            Error::Tool(ToolError::Execution { message, .. }) => {
                Error::Extraction(translate_extractor_error(&message, None))
            }
            other => other,
        })?;

        let metadata: RemoteMetadata = serde_json::from_slice(&stdout)
            .map_err(|e| ExtractionError::InvalidMetadata(e.to_string()))?;

        tracing::debug!(
            source = %url,
            formats = metadata.formats.len(),
            duration = ?metadata.duration,
            "Fetched remote metadata"
        );
        Ok(metadata)
    }

    /// The presentable formats for `source_url`
    pub async fn list_formats(&self, source_url: &str) -> Result<Vec<ExtractionFormat>> {
        Ok(self.describe(source_url).await?.formats)
    }

    /// Title, duration and presentable formats for `source_url`
    pub async fn describe(&self, source_url: &str) -> Result<FormatListing> {
        let metadata = self.fetch_metadata(source_url).await?;
        Ok(FormatListing {
            title: metadata.display_title().to_string(),
            duration: metadata.duration,
            formats: select_formats(&metadata),
        })
    }
}

/// Accept only absolute http(s) URLs with a host
pub fn validate_source_url(source_url: &str) -> Result<Url> {
    let unsupported = |reason: &str| {
        Error::Extraction(ExtractionError::Unsupported(format!(
            "{reason}: {source_url}"
        )))
    };

    let url = Url::parse(source_url.trim()).map_err(|_| unsupported("not a valid URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(unsupported("only http and https sources are supported"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(unsupported("URL has no host"));
    }
    Ok(url)
}

/// Normalized quality bucket for a video height
pub fn height_bucket(height: u32) -> u32 {
    HEIGHT_BUCKETS
        .iter()
        .copied()
        .find(|&threshold| height >= threshold)
        .unwrap_or(LOWEST_BUCKET)
}

/// Reduce the full track list to the presentable options
///
/// Tracks without any size are discarded. One video track is kept per
/// height bucket, preferring mp4 and then the smallest. Of the audio-only
/// tracks the smallest and the largest are kept.
pub fn select_formats(metadata: &RemoteMetadata) -> Vec<ExtractionFormat> {
    let sized = metadata
        .formats
        .iter()
        .filter_map(|f| f.effective_size().map(|size| (f, size)));

    let mut buckets: BTreeMap<u32, (&RawFormat, u64)> = BTreeMap::new();
    let mut audio: Vec<(&RawFormat, u64)> = Vec::new();

    for (format, size) in sized {
        if format.has_video() {
            let Some(height) = format.height.filter(|h| *h > 0) else {
                continue;
            };
            let bucket = height_bucket(height);
            let replace = match buckets.get(&bucket) {
                None => true,
                Some((best, best_size)) => is_better_video(format, size, best, *best_size),
            };
            if replace {
                buckets.insert(bucket, (format, size));
            }
        } else if format.is_audio_only() {
            audio.push((format, size));
        }
    }

    let mut options: Vec<ExtractionFormat> = buckets
        .into_iter()
        .rev()
        .map(|(bucket, (format, size))| ExtractionFormat {
            format_id: format.format_id.clone(),
            container: format.container().to_string(),
            size_bytes: size,
            has_video: true,
            has_audio: format.has_audio(),
            is_audio_only: false,
            quality_label: format!("{bucket}p"),
            height: format.height,
        })
        .collect();

    audio.sort_by_key(|(_, size)| *size);
    let extremes: Vec<(&RawFormat, u64)> = match audio.as_slice() {
        [] => Vec::new(),
        [only] => vec![*only],
        [smallest, .., largest] => vec![*smallest, *largest],
    };
    options.extend(extremes.into_iter().map(|(format, size)| ExtractionFormat {
        format_id: format.format_id.clone(),
        container: format.container().to_string(),
        size_bytes: size,
        has_video: false,
        has_audio: true,
        is_audio_only: true,
        quality_label: audio_label(format),
        height: None,
    }));

    options
}

/// The audio-only track with the smallest size
///
/// # Errors
///
/// [`ExtractionError::NoAudioTrack`] when no sized audio-only track exists.
pub fn smallest_audio_track(metadata: &RemoteMetadata) -> Result<&RawFormat> {
    metadata
        .formats
        .iter()
        .filter(|f| f.is_audio_only())
        .filter_map(|f| f.effective_size().map(|size| (f, size)))
        .min_by_key(|(_, size)| *size)
        .map(|(f, _)| f)
        .ok_or_else(|| ExtractionError::NoAudioTrack.into())
}

/// Look up a track by id
///
/// # Errors
///
/// [`ExtractionError::FormatNotFound`] when the id is not listed.
pub fn find_format<'a>(metadata: &'a RemoteMetadata, format_id: &str) -> Result<&'a RawFormat> {
    metadata
        .formats
        .iter()
        .find(|f| f.format_id == format_id)
        .ok_or_else(|| {
            ExtractionError::FormatNotFound {
                format_id: format_id.to_string(),
            }
            .into()
        })
}

fn is_better_video(candidate: &RawFormat, size: u64, best: &RawFormat, best_size: u64) -> bool {
    let candidate_mp4 = candidate.container() == "mp4";
    let best_mp4 = best.container() == "mp4";
    match (candidate_mp4, best_mp4) {
        (true, false) => true,
        (false, true) => false,
        _ => size < best_size,
    }
}

/// Label shown for a track: its height bucket, or its audio bitrate
pub fn quality_label(format: &RawFormat) -> String {
    match format.height.filter(|h| *h > 0) {
        Some(height) if format.has_video() => format!("{}p", height_bucket(height)),
        _ => audio_label(format),
    }
}

fn audio_label(format: &RawFormat) -> String {
    match format.abr.or(format.tbr).filter(|r| *r > 0.0) {
        Some(rate) => format!("audio {}k", rate.round() as u64),
        None => "audio".to_string(),
    }
}
