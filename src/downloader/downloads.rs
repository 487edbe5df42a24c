//! Format listing and download descriptor creation.

use crate::error::Result;
use crate::formats::{FormatListing, find_format, quality_label, smallest_audio_track};
use crate::registry::DownloadDescriptor;
use crate::types::DescriptorId;
use crate::utils::build_filename;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::RemuxDownloader;

/// What to download: a remote page and one of its formats
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// Remote page URL
    pub source_url: String,
    /// Extractor format id, as listed by GET /formats
    pub format_id: String,
}

/// Handle returned for a registered download
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTicket {
    /// Id for the progress and stream endpoints
    pub download_id: DescriptorId,
    /// Attachment filename the stream will carry
    pub filename: String,
}

impl RemuxDownloader {
    /// Title, duration and presentable formats of a remote source
    ///
    /// # Errors
    ///
    /// [`crate::error::ExtractionError`] for unsupported URLs or extractor
    /// failures, [`crate::error::ToolError::Unavailable`] when the extractor
    /// cannot be installed.
    pub async fn list_formats(&self, source_url: &str) -> Result<FormatListing> {
        self.pipeline.selector.describe(source_url.trim()).await
    }

    /// Register a download and return its id and filename
    ///
    /// The remote metadata is fetched to check that the format exists and,
    /// for formats without audio, that an audio track to mux with exists.
    /// Formats that need muxing always produce MP4.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::ShuttingDown`] during shutdown
    /// - [`crate::error::ExtractionError::FormatNotFound`] for an unknown format id
    /// - [`crate::error::ExtractionError::NoAudioTrack`] when a video-only
    ///   format has nothing to mux with
    /// - any error of [`list_formats`](Self::list_formats)
    pub async fn create_download(&self, request: &DownloadRequest) -> Result<DownloadTicket> {
        self.ensure_accepting()?;
        let source_url = request.source_url.trim();

        let metadata = self.pipeline.selector.fetch_metadata(source_url).await?;
        let format = find_format(&metadata, &request.format_id)?;
        let has_embedded_audio = format.has_audio();

        let container = if has_embedded_audio {
            format.container()
        } else {
            smallest_audio_track(&metadata)?;
            "mp4"
        };
        let filename = build_filename(metadata.display_title(), &quality_label(format), container);

        let descriptor = self
            .registry
            .create(source_url, &request.format_id, &filename, has_embedded_audio)
            .await;

        tracing::info!(
            download_id = %descriptor.id,
            format_id = %descriptor.format_id,
            filename = %descriptor.filename,
            realtime = descriptor.use_realtime_mux,
            "Download registered"
        );

        Ok(DownloadTicket {
            download_id: descriptor.id,
            filename: descriptor.filename,
        })
    }

    /// Look up a registered, unexpired download
    ///
    /// # Errors
    ///
    /// [`crate::Error::DescriptorExpired`] for an unknown or expired id.
    pub async fn get_download(&self, id: &DescriptorId) -> Result<DownloadDescriptor> {
        self.registry.get(id).await
    }
}
