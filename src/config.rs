//! Configuration types for remux-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// External tool binaries (extractor and muxer)
///
/// Groups settings for locating, downloading, and validating the binaries.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ToolsConfig {
    /// Directory where managed binaries are cached (default: "./tools")
    #[serde(default = "default_tool_cache_dir")]
    pub cache_dir: PathBuf,

    /// Explicit path to the extractor (yt-dlp). When unset the binary is
    /// downloaded into `cache_dir` from `extractor_url`.
    #[serde(default)]
    pub extractor_path: Option<PathBuf>,

    /// Release URL for the extractor binary (platform-specific default)
    #[serde(default = "default_extractor_url")]
    pub extractor_url: String,

    /// Minimum size in bytes for a cached extractor to be considered valid (default: 1 MB)
    #[serde(default = "default_extractor_min_size")]
    pub extractor_min_size: u64,

    /// Explicit path to the muxer (ffmpeg). When unset it is searched on PATH.
    #[serde(default)]
    pub muxer_path: Option<PathBuf>,

    /// Whether to search PATH for the muxer if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Timeout for a single binary download (default: 120 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// Retry policy for binary downloads (default: one retry)
    #[serde(default = "default_tool_retry")]
    pub download_retry: RetryConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_tool_cache_dir(),
            extractor_path: None,
            extractor_url: default_extractor_url(),
            extractor_min_size: default_extractor_min_size(),
            muxer_path: None,
            search_path: true,
            download_timeout: default_download_timeout(),
            download_retry: default_tool_retry(),
        }
    }
}

/// Streaming behavior (real-time muxing, legacy fallback, cleanup)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StreamingConfig {
    /// Directory for legacy fallback temp files (default: system temp dir + "remux-dl")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Mux video-only formats in real time (default: true). When disabled every
    /// stream goes through the temp-file fallback.
    #[serde(default = "default_true")]
    pub realtime_mux: bool,

    /// Advertise the heuristic output size as Content-Length (default: true)
    #[serde(default = "default_true")]
    pub estimate_content_length: bool,

    /// How long to wait for killed processes to be reaped (default: 5000 ms)
    #[serde(default = "default_kill_grace_period", with = "millis_serde")]
    pub kill_grace_period: Duration,

    /// Extra arguments passed to every extractor invocation
    #[serde(default = "default_extractor_args")]
    pub extractor_args: Vec<String>,

    /// Bitrate for the preferred HE-AAC encoder (default: "64k")
    #[serde(default = "default_he_aac_bitrate")]
    pub he_aac_bitrate: String,

    /// Bitrate for the fallback AAC encoder (default: "128k")
    #[serde(default = "default_aac_bitrate")]
    pub aac_bitrate: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            realtime_mux: true,
            estimate_content_length: true,
            kill_grace_period: default_kill_grace_period(),
            extractor_args: default_extractor_args(),
            he_aac_bitrate: default_he_aac_bitrate(),
            aac_bitrate: default_aac_bitrate(),
        }
    }
}

/// Download descriptor registry settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RegistryConfig {
    /// Time-to-live for a descriptor (default: 3600 seconds)
    #[serde(default = "default_descriptor_ttl", with = "duration_serde")]
    pub descriptor_ttl: Duration,

    /// Interval of the active expiry sweep (default: 300 seconds)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            descriptor_ttl: default_descriptor_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Progress channel settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressConfig {
    /// Hard maximum lifetime of a progress subscription (default: 1800 seconds)
    #[serde(default = "default_max_lifetime", with = "duration_serde")]
    pub max_lifetime: Duration,

    /// Minimum interval between published percentages (default: 2000 ms)
    #[serde(default = "default_publish_interval", with = "millis_serde")]
    pub publish_interval: Duration,

    /// Buffered events per subscription before new ones are dropped (default: 64)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            max_lifetime: default_max_lifetime(),
            publish_interval: default_publish_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Main configuration for RemuxDownloader
///
/// Fields are organized into logical sub-configs:
/// - [`tools`](ToolsConfig): external binary locations and installation
/// - [`streaming`](StreamingConfig): real-time mux and fallback behavior
/// - [`registry`](RegistryConfig): descriptor expiry
/// - [`progress`](ProgressConfig): progress channel limits
/// - [`server`](ServerIntegrationConfig): REST API
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// External tool binaries
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Streaming behavior
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Descriptor registry
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Progress channel
    #[serde(default)]
    pub progress: ProgressConfig,

    /// API and external server integration
    #[serde(flatten)]
    pub server: ServerIntegrationConfig,
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Server integration configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ServerIntegrationConfig {
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key; when set every request except /health must present it
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

fn default_tool_cache_dir() -> PathBuf {
    PathBuf::from("./tools")
}

fn default_extractor_url() -> String {
    let asset = if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else if cfg!(target_arch = "aarch64") {
        "yt-dlp_linux_aarch64"
    } else {
        "yt-dlp_linux"
    };
    format!("https://github.com/yt-dlp/yt-dlp/releases/latest/download/{asset}")
}

fn default_extractor_min_size() -> u64 {
    1_000_000
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_tool_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("remux-dl")
}

fn default_true() -> bool {
    true
}

fn default_kill_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_extractor_args() -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--no-part".to_string(),
        "--socket-timeout".to_string(),
        "30".to_string(),
    ]
}

fn default_he_aac_bitrate() -> String {
    "64k".to_string()
}

fn default_aac_bitrate() -> String {
    "128k".to_string()
}

fn default_descriptor_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_publish_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Sub-second knobs are expressed in milliseconds
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
