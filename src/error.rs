//! Error types for remux-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Tool, Extraction)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for remux-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for remux-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "temp_dir")
        key: Option<String>,
    },

    /// External tool binary problem (missing, corrupt, failed run)
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Remote source could not be resolved into the requested tracks
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// The OS refused to start a subprocess
    #[error("failed to spawn {program}: {source}")]
    ProcessSpawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A subprocess in the process graph failed while producing output
    #[error("stream failed: {reason}")]
    Stream {
        /// Why the stream failed (exit status plus diagnostic tail)
        reason: String,
    },

    /// Download descriptor is missing or past its time-to-live
    #[error("download descriptor {id} expired or not found")]
    DescriptorExpired {
        /// The descriptor id that was requested
        id: String,
    },

    /// Request carried no valid identity
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new streams
    #[error("shutdown in progress: not accepting new streams")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors from the external tool binaries (extractor and muxer)
#[derive(Debug, Error)]
pub enum ToolError {
    /// Binary is missing or corrupt and could not be (re)installed
    #[error("{tool} unavailable: {reason}")]
    Unavailable {
        /// Tool name (e.g. "yt-dlp")
        tool: String,
        /// Why the binary could not be made available
        reason: String,
    },

    /// Binary ran but exited unsuccessfully
    #[error("{tool} failed: {message}")]
    Execution {
        /// Tool name (e.g. "ffmpeg")
        tool: String,
        /// Captured diagnostic output
        message: String,
    },

    /// A single download attempt produced an unusable binary
    #[error("download of {tool} to {path} failed: {reason}")]
    DownloadFailed {
        /// Tool name
        tool: String,
        /// Destination path
        path: PathBuf,
        /// Reason the attempt failed
        reason: String,
    },
}

/// Errors while resolving a remote source into tracks
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Source URL is not something the extractor can handle
    #[error("unsupported source: {0}")]
    Unsupported(String),

    /// Source is gone, geo-blocked, or otherwise unavailable
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Source requires an account the server does not have
    #[error("source is private: {0}")]
    Private(String),

    /// Remote host is throttling requests
    #[error("rate limited by remote host: {0}")]
    RateLimited(String),

    /// Requested format id does not exist on the source
    #[error("format {format_id} not found")]
    FormatNotFound {
        /// The requested format id
        format_id: String,
    },

    /// Source offers no audio-only track to pair with a video-only format
    #[error("no audio-only track available")]
    NoAudioTrack,

    /// Extractor output could not be parsed
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
/// It follows a standard format with machine-readable error codes,
/// human-readable messages, and optional contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "format_not_found",
///     "message": "extraction error: format 137 not found",
///     "details": {
///       "format_id": "137"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "descriptor_expired", "validation_error")
    ///
    /// Clients can use this for programmatic error handling.
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
///
/// This trait maps domain errors to appropriate HTTP status codes.
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - the source itself is unusable
            Error::Extraction(ExtractionError::Unsupported(_)) => 400,
            Error::Extraction(ExtractionError::InvalidMetadata(_)) => 400,

            // 401 Unauthorized
            Error::Unauthorized(_) => 401,

            // 404 Not Found
            Error::DescriptorExpired { .. } => 404,
            Error::Extraction(ExtractionError::Unavailable(_)) => 404,
            Error::Extraction(ExtractionError::Private(_)) => 404,
            Error::Extraction(ExtractionError::FormatNotFound { .. }) => 404,
            Error::Extraction(ExtractionError::NoAudioTrack) => 404,

            // 429 Too Many Requests - upstream throttling
            Error::Extraction(ExtractionError::RateLimited(_)) => 429,

            // 500 Internal Server Error - server-side issues
            Error::Config { .. } => 500,
            Error::Tool(ToolError::Unavailable { .. }) => 500,
            Error::Tool(ToolError::DownloadFailed { .. }) => 500,
            Error::ProcessSpawn { .. } => 500,
            Error::Stream { .. } => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - external tool or service errors
            Error::Tool(ToolError::Execution { .. }) => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Tool(e) => match e {
                ToolError::Unavailable { .. } => "tool_unavailable",
                ToolError::Execution { .. } => "tool_execution_failed",
                ToolError::DownloadFailed { .. } => "tool_download_failed",
            },
            Error::Extraction(e) => match e {
                ExtractionError::Unsupported(_) => "unsupported_source",
                ExtractionError::Unavailable(_) => "source_unavailable",
                ExtractionError::Private(_) => "source_private",
                ExtractionError::RateLimited(_) => "rate_limited",
                ExtractionError::FormatNotFound { .. } => "format_not_found",
                ExtractionError::NoAudioTrack => "no_audio_track",
                ExtractionError::InvalidMetadata(_) => "invalid_metadata",
            },
            Error::ProcessSpawn { .. } => "process_spawn_failed",
            Error::Stream { .. } => "stream_failed",
            Error::DescriptorExpired { .. } => "descriptor_expired",
            Error::Unauthorized(_) => "unauthorized",
            Error::Io(_) => "io_error",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::Tool(ToolError::Unavailable { tool, .. })
            | Error::Tool(ToolError::Execution { tool, .. }) => Some(serde_json::json!({
                "tool": tool,
            })),
            Error::Extraction(ExtractionError::FormatNotFound { format_id }) => {
                Some(serde_json::json!({
                    "format_id": format_id,
                }))
            }
            Error::ProcessSpawn { program, .. } => Some(serde_json::json!({
                "program": program,
            })),
            Error::DescriptorExpired { id } => Some(serde_json::json!({
                "download_id": id,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
