//! Streaming responder
//!
//! Turns a byte stream into a download response. Headers are fixed before
//! the first byte goes out, so the body must already be known to start.
//! [`legacy`] produces such a body from a fully written temp file.

pub mod legacy;

pub use legacy::{LegacyFallback, LegacyOutput};

use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::utils::{content_type_for, sanitize_filename};
use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

/// Declared size of a response body
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyLength {
    /// The exact size is known (a finished file)
    Exact(u64),
    /// A heuristic size for output still being produced
    Estimated(u64),
    /// No size; the response is sent chunked
    Unknown,
}

/// Everything needed to answer a stream request
pub struct StreamPlan {
    /// Attachment filename
    pub filename: String,
    /// Container of the body ("mp4", "webm", ...)
    pub container: String,
    /// Declared size
    pub length: BodyLength,
    /// The bytes
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
    /// Progress channel of the download, told when the body is cut short
    pub progress: Option<ProgressReporter>,
}

impl std::fmt::Debug for StreamPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPlan")
            .field("filename", &self.filename)
            .field("container", &self.container)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Builds download responses
#[derive(Clone, Copy, Debug)]
pub struct StreamingResponder {
    estimate_content_length: bool,
}

impl StreamingResponder {
    /// `estimate_content_length` decides whether estimated sizes are declared
    pub fn new(estimate_content_length: bool) -> Self {
        Self {
            estimate_content_length,
        }
    }

    /// Build the response for `plan`
    ///
    /// A declared `Content-Length` is never exceeded. Output beyond it ends
    /// the response at the declared length and is published as an `error`
    /// on the plan's progress channel.
    ///
    /// # Errors
    ///
    /// [`Error::Stream`] if the headers cannot be encoded.
    pub fn build(&self, plan: StreamPlan) -> Result<Response> {
        let declared = match plan.length {
            BodyLength::Exact(len) => Some(len),
            BodyLength::Estimated(len) if self.estimate_content_length => Some(len),
            _ => None,
        };

        let body = match declared {
            Some(limit) => cap_body(plan.body, limit, plan.progress),
            None => plan.body,
        };

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type_for(&plan.container))
            .header(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_str(&content_disposition(&plan.filename)).map_err(|e| {
                    Error::Stream {
                        reason: format!("invalid Content-Disposition: {e}"),
                    }
                })?,
            )
            .header(header::CACHE_CONTROL, "no-store")
            .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff");
        if let Some(len) = declared {
            builder = builder.header(header::CONTENT_LENGTH, len);
        }

        builder
            .body(Body::from_stream(body))
            .map_err(|e| Error::Stream {
                reason: format!("failed to build response: {e}"),
            })
    }
}

/// `attachment` disposition with a plain and an RFC 5987 encoded filename
pub fn content_disposition(filename: &str) -> String {
    let safe = sanitize_filename(filename);
    format!(
        "attachment; filename=\"{safe}\"; filename*=UTF-8''{}",
        urlencoding::encode(&safe)
    )
}

/// Limit `body` to `limit` bytes
///
/// Reaching the limit is only fine if the source ends there too. When it
/// has more to give, the download is incomplete: a warning is logged,
/// `progress` gets an `error`, and the source is dropped.
pub fn cap_body(
    body: BoxStream<'static, std::io::Result<Bytes>>,
    limit: u64,
    progress: Option<ProgressReporter>,
) -> BoxStream<'static, std::io::Result<Bytes>> {
    futures::stream::unfold(Some((body, limit)), move |state| {
        let progress = progress.clone();
        async move {
            let (mut body, remaining) = state?;
            loop {
                match body.next().await? {
                    Ok(chunk) if chunk.is_empty() => continue,
                    Ok(chunk) if (chunk.len() as u64) <= remaining => {
                        let remaining = remaining - chunk.len() as u64;
                        return Some((Ok(chunk), Some((body, remaining))));
                    }
                    Ok(mut chunk) => {
                        report_surplus(limit, progress.as_ref());
                        if remaining == 0 {
                            return None;
                        }
                        // remaining < chunk.len(), so it fits in usize
                        chunk.truncate(remaining as usize);
                        return Some((Ok(chunk), None));
                    }
                    Err(e) => return Some((Err(e), None)),
                }
            }
        }
    })
    .boxed()
}

fn report_surplus(limit: u64, progress: Option<&ProgressReporter>) {
    tracing::warn!(limit, "Output exceeded the declared Content-Length, response cut short");
    if let Some(progress) = progress {
        progress.failed(format!(
            "output exceeded the declared length of {limit} bytes"
        ));
    }
}
