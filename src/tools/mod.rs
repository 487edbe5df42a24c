//! External tool binaries: the extractor (yt-dlp) and the muxer (ffmpeg)
//!
//! [`ToolBinary`] makes sure an executable is present and usable before it is
//! run. Managed binaries are downloaded into a cache directory on first use and
//! re-downloaded when the cached copy is missing or undersized.

mod diagnostics;
mod probe;

pub use diagnostics::translate_extractor_error;
pub use probe::{EncoderProbe, select_audio_encoder};

use crate::config::{RetryConfig, ToolsConfig};
use crate::error::{Error, Result, ToolError};
use crate::retry::with_retry;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Number of bytes of diagnostic output kept in execution errors
const MAX_DIAGNOSTIC_LEN: usize = 4000;

/// Where a tool binary comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolSource {
    /// Downloaded from `url` into the cache directory; valid when at least `min_size` bytes
    Managed {
        /// Release download URL (redirects are followed)
        url: String,
        /// Minimum size of a valid binary
        min_size: u64,
    },
    /// Provided by the system or configuration; only validated, never downloaded
    Fixed {
        /// Minimum size of a valid binary
        min_size: u64,
    },
}

/// One external executable
///
/// # Examples
///
/// ```no_run
/// use remux_dl::tools::ToolBinary;
///
/// # async fn example() -> remux_dl::Result<()> {
/// let muxer = ToolBinary::from_path("ffmpeg").expect("ffmpeg not found in PATH");
/// let listing = muxer.execute(["-hide_banner", "-version"]).await?;
/// println!("{}", String::from_utf8_lossy(&listing));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ToolBinary {
    name: String,
    path: PathBuf,
    source: ToolSource,
    retry: RetryConfig,
    download_timeout: Duration,
    // serializes installation so concurrent callers never race on the cache file
    install_lock: tokio::sync::Mutex<()>,
}

impl ToolBinary {
    /// A binary downloaded from `url` into `cache_dir`
    pub fn managed(
        name: impl Into<String>,
        cache_dir: &Path,
        url: impl Into<String>,
        min_size: u64,
    ) -> Self {
        let name = name.into();
        let file_name = if cfg!(windows) {
            format!("{name}.exe")
        } else {
            name.clone()
        };
        Self {
            path: cache_dir.join(file_name),
            name,
            source: ToolSource::Managed {
                url: url.into(),
                min_size,
            },
            retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            download_timeout: Duration::from_secs(120),
            install_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A binary at an explicit path
    pub fn fixed(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            source: ToolSource::Fixed { min_size: 1 },
            retry: RetryConfig::default(),
            download_timeout: Duration::from_secs(120),
            install_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Attempt to find `name` in PATH
    ///
    /// Uses the `which` crate to search the system PATH.
    pub fn from_path(name: &str) -> Option<Self> {
        which::which(name).ok().map(|path| Self::fixed(name, path))
    }

    /// The extractor as configured: explicit path, or managed download
    pub fn extractor(config: &ToolsConfig) -> Self {
        match &config.extractor_path {
            Some(path) => Self::fixed("yt-dlp", path.clone()),
            None => Self::managed(
                "yt-dlp",
                &config.cache_dir,
                config.extractor_url.clone(),
                config.extractor_min_size,
            )
            .with_retry(config.download_retry.clone())
            .with_download_timeout(config.download_timeout),
        }
    }

    /// The muxer as configured: explicit path, PATH lookup, or bare name
    ///
    /// An unresolved muxer is not an error here; [`ensure`](Self::ensure)
    /// reports it as unavailable on first use.
    pub fn muxer(config: &ToolsConfig) -> Self {
        if let Some(path) = &config.muxer_path {
            return Self::fixed("ffmpeg", path.clone());
        }
        if config.search_path
            && let Some(found) = Self::from_path("ffmpeg")
        {
            return found;
        }
        Self::fixed("ffmpeg", PathBuf::from("ffmpeg"))
    }

    /// Override the retry policy used for downloads
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the per-attempt download timeout
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Tool name used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem path of the binary
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the binary comes from
    pub fn source(&self) -> &ToolSource {
        &self.source
    }

    /// Make sure a valid binary is present
    ///
    /// A managed binary that is missing or smaller than its minimum size is
    /// deleted and downloaded again, with one retry. Safe to call repeatedly;
    /// a valid binary makes this a metadata check only.
    ///
    /// # Errors
    ///
    /// [`ToolError::Unavailable`] when the binary cannot be validated or installed.
    pub async fn ensure(&self) -> Result<()> {
        let _guard = self.install_lock.lock().await;

        match &self.source {
            ToolSource::Fixed { min_size } => {
                self.validate(*min_size)
                    .await
                    .map_err(|reason| self.unavailable(reason))?;
            }
            ToolSource::Managed { url, min_size } => {
                if let Err(reason) = self.validate(*min_size).await {
                    tracing::info!(
                        tool = %self.name,
                        path = %self.path.display(),
                        reason = %reason,
                        "Installing tool binary"
                    );
                    self.remove_stale().await;

                    with_retry(&self.retry, || self.install(url, *min_size))
                        .await
                        .map_err(|e| self.unavailable(e.to_string()))?;
                }
            }
        }

        Ok(())
    }

    /// Run the binary to completion and return its stdout
    ///
    /// # Errors
    ///
    /// - [`ToolError::Unavailable`] if [`ensure`](Self::ensure) fails
    /// - [`Error::ProcessSpawn`] if the OS cannot start the process
    /// - [`ToolError::Execution`] on a nonzero exit, carrying captured stderr
    pub async fn execute<I, S>(&self, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.ensure().await?;

        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|source| Error::ProcessSpawn {
                program: self.name.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = diagnostic_message(&stderr, &output.status.to_string());
            tracing::debug!(tool = %self.name, status = %output.status, "Tool exited unsuccessfully");
            return Err(ToolError::Execution {
                tool: self.name.clone(),
                message,
            }
            .into());
        }

        Ok(output.stdout)
    }

    /// A command for this binary with stdin closed and kill-on-drop enabled
    ///
    /// Callers configure stdout/stderr themselves. Does not call
    /// [`ensure`](Self::ensure).
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.path);
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    async fn validate(&self, min_size: u64) -> std::result::Result<u64, String> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| format!("{}: {}", self.path.display(), e))?;

        if !metadata.is_file() {
            return Err(format!("{} is not a regular file", self.path.display()));
        }
        if metadata.len() < min_size {
            return Err(format!(
                "{} is {} bytes, expected at least {}",
                self.path.display(),
                metadata.len(),
                min_size
            ));
        }
        Ok(metadata.len())
    }

    async fn remove_stale(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::info!(tool = %self.name, "Removed invalid cached binary"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(tool = %self.name, error = %e, "Failed to remove cached binary"),
        }
    }

    async fn install(&self, url: &str, min_size: u64) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(self.download_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.download_failed(format!("HTTP {status} from {url}")));
        }

        let bytes = response.bytes().await?;
        if (bytes.len() as u64) < min_size {
            return Err(self.download_failed(format!(
                "received {} bytes, expected at least {}",
                bytes.len(),
                min_size
            )));
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = self.path.with_extension("partial");
        tokio::fs::write(&partial, &bytes).await?;
        set_executable(&partial).await?;
        tokio::fs::rename(&partial, &self.path).await?;

        let size = self
            .validate(min_size)
            .await
            .map_err(|reason| self.download_failed(reason))?;

        tracing::info!(
            tool = %self.name,
            path = %self.path.display(),
            bytes = size,
            "Tool binary installed"
        );
        Ok(())
    }

    fn unavailable(&self, reason: String) -> Error {
        ToolError::Unavailable {
            tool: self.name.clone(),
            reason,
        }
        .into()
    }

    fn download_failed(&self, reason: String) -> Error {
        ToolError::DownloadFailed {
            tool: self.name.clone(),
            path: self.path.clone(),
            reason,
        }
        .into()
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Trimmed tail of a diagnostic stream, or the exit status when it is empty
pub(crate) fn diagnostic_message(stderr: &str, status: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return format!("exited with {status}");
    }
    if trimmed.len() <= MAX_DIAGNOSTIC_LEN {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_DIAGNOSTIC_LEN;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
