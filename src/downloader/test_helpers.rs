//! Shared test helpers for creating RemuxDownloader instances in tests.

use crate::config::Config;
use crate::downloader::RemuxDownloader;
use crate::tools::ToolBinary;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// Remote metadata served by the fake extractor
pub(crate) const TEST_METADATA: &str = r#"{
    "id": "abc",
    "title": "Test Clip",
    "duration": 10.0,
    "formats": [
        {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "filesize": 1000},
        {"format_id": "43", "ext": "webm", "vcodec": "vp8", "acodec": "vorbis", "height": 360, "filesize": 5000},
        {"format_id": "137", "ext": "mp4", "vcodec": "avc1.640028", "acodec": "none", "height": 1080, "filesize": 20000}
    ]
}"#;

/// Bytes the fake muxer writes in real-time mode
pub(crate) const LIVE_OUTPUT: &[u8] = b"fragmented-mp4";

const EXTRACTOR: &str = r#"case "$1" in
  --dump-single-json) cat 'METADATA' ;;
  -f)
    if [ "$4" = "-" ]; then
      printf "track-$2"
    else
      echo "[download]  50.0% of 10.00B at 5.00B/s ETA 00:01"
      printf "track-$2" > "$4"
      echo "[download] 100% of 10.00B"
    fi
    ;;
  *) echo "ERROR: unexpected arguments: $*" >&2; exit 2 ;;
esac"#;

const MUXER: &str = r#"case "$2" in -encoders) echo ' A....D aac                  AAC (Advanced Audio Coding)'; exit 0;; esac
last=""
for a in "$@"; do last="$a"; done
if [ "$last" = "pipe:1" ]; then
  echo "out_time=00:00:05.000000" >&2
  echo "speed=2.0x" >&2
  printf 'fragmented-mp4'
else
  inputs=""
  prev=""
  for a in "$@"; do
    if [ "$prev" = "-i" ]; then inputs="$inputs $a"; fi
    prev="$a"
  done
  cat $inputs > "$last"
fi"#;

/// Write an executable shell script
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> Arc<ToolBinary> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    Arc::new(ToolBinary::fixed(name, path))
}

/// Fake extractor and muxer installed into `dir`
pub(crate) fn fake_tools(dir: &Path) -> (Arc<ToolBinary>, Arc<ToolBinary>) {
    let metadata = dir.join("metadata.json");
    std::fs::write(&metadata, TEST_METADATA).unwrap();

    let extractor = write_script(
        dir,
        "fake-extractor",
        &EXTRACTOR.replace("METADATA", &metadata.display().to_string()),
    );
    let muxer = write_script(dir, "fake-muxer", MUXER);
    (extractor, muxer)
}

/// Configuration rooted in `dir` with unthrottled progress
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.tools.cache_dir = dir.join("tools");
    config.streaming.temp_dir = dir.join("temp");
    config.streaming.extractor_args = Vec::new();
    config.streaming.kill_grace_period = Duration::from_secs(2);
    config.progress.publish_interval = Duration::ZERO;
    config
}

/// Helper to create a test RemuxDownloader backed by fake tools.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader() -> (RemuxDownloader, TempDir) {
    let temp_dir = tempdir().unwrap();
    let (extractor, muxer) = fake_tools(temp_dir.path());
    let downloader = RemuxDownloader::with_tools(test_config(temp_dir.path()), extractor, muxer)
        .await
        .unwrap();
    (downloader, temp_dir)
}
