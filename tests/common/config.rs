//! Test configuration helpers and downloader construction

use super::fixtures::{FakeTools, install_fake_tools, install_slow_tools};
use remux_dl::{Config, RemuxDownloader};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Configuration using `tools`, with everything else rooted in `dir`
pub fn fake_tool_config(dir: &TempDir, tools: &FakeTools) -> Config {
    let mut config = Config::default();
    config.tools.cache_dir = dir.path().join("tools");
    config.tools.extractor_path = Some(tools.extractor.clone());
    config.tools.muxer_path = Some(tools.muxer.clone());
    config.streaming.temp_dir = dir.path().join("temp");
    config.streaming.extractor_args = Vec::new();
    config.streaming.kill_grace_period = Duration::from_secs(1);
    config.progress.publish_interval = Duration::ZERO;
    config
}

/// Create a RemuxDownloader backed by the fast fake tools
///
/// Returns the downloader and temp directory (keep temp_dir alive for test duration)
pub async fn create_fake_downloader() -> (Arc<RemuxDownloader>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let tools = install_fake_tools(dir.path());
    let downloader = RemuxDownloader::new(fake_tool_config(&dir, &tools))
        .await
        .unwrap();
    (Arc::new(downloader), dir)
}

/// Create a RemuxDownloader whose muxer streams slowly
pub async fn create_slow_downloader() -> (Arc<RemuxDownloader>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let tools = install_slow_tools(dir.path());
    let downloader = RemuxDownloader::new(fake_tool_config(&dir, &tools))
        .await
        .unwrap();
    (Arc::new(downloader), dir)
}

/// Create a RemuxDownloader using the real yt-dlp and ffmpeg
///
/// Binaries come from PATH when available and are otherwise downloaded into
/// the temp directory.
pub async fn create_live_downloader() -> (Arc<RemuxDownloader>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.tools.cache_dir = dir.path().join("tools");
    config.tools.extractor_path = which::which("yt-dlp").ok();
    config.tools.muxer_path = which::which("ffmpeg").ok();
    config.streaming.temp_dir = dir.path().join("temp");
    let downloader = RemuxDownloader::new(config).await.unwrap();
    (Arc::new(downloader), dir)
}
