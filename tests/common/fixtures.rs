//! Fake yt-dlp/ffmpeg scripts and the metadata they serve

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Source URL the fake extractor accepts
pub const SOURCE_URL: &str = "https://media.example.com/watch?v=clip";

/// Metadata of a 60 second clip with two video-only formats, one combined
/// format and two audio tracks
pub const CLIP_METADATA: &str = r#"{
    "id": "clip",
    "title": "Big Buck Bunny: Trailer",
    "duration": 60.0,
    "formats": [
        {"format_id": "139", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.5", "abr": 48.8, "filesize": 400},
        {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "filesize": 1000},
        {"format_id": "18", "ext": "mp4", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360, "filesize": 3000},
        {"format_id": "136", "ext": "mp4", "vcodec": "avc1.4d401f", "acodec": "none", "height": 720, "filesize": 9000},
        {"format_id": "137", "ext": "mp4", "vcodec": "avc1.640028", "acodec": "none", "height": 1080, "filesize": 20000}
    ]
}"#;

/// Number of chunks the slow muxer writes
pub const SLOW_CHUNKS: usize = 40;

const EXTRACTOR: &str = r#"case "$1" in
  --dump-single-json)
    case "$*" in
      *private*) echo "ERROR: [youtube] clip: Private video. Sign in if you've been granted access" >&2; exit 1 ;;
      *) cat 'METADATA' ;;
    esac
    ;;
  -f)
    if [ "$4" = "-" ]; then
      printf "track-$2"
    else
      echo "[download]  25.0% of 10.00KiB at 2.00KiB/s ETA 00:04"
      echo "[download]  75.0% of 10.00KiB at 2.00KiB/s ETA 00:01"
      printf "track-$2" > "$4"
      echo "[download] 100% of 10.00KiB"
    fi
    ;;
  *) echo "ERROR: unexpected arguments: $*" >&2; exit 2 ;;
esac"#;

const MUXER: &str = r#"case "$2" in -encoders) echo ' A....D aac                  AAC (Advanced Audio Coding)'; exit 0;; esac
last=""
for a in "$@"; do last="$a"; done
if [ "$last" = "pipe:1" ]; then
  echo "out_time=00:00:30.000000" >&2
  echo "speed=3.0x" >&2
  printf 'ftyp-isom-moof-mdat'
  echo "out_time=00:01:00.000000" >&2
else
  inputs=""
  prev=""
  for a in "$@"; do
    if [ "$prev" = "-i" ]; then inputs="$inputs $a"; fi
    prev="$a"
  done
  cat $inputs > "$last"
fi"#;

const SLOW_MUXER: &str = r#"case "$2" in -encoders) echo ' A....D aac                  AAC (Advanced Audio Coding)'; exit 0;; esac
i=0
while [ $i -lt CHUNKS ]; do
  printf 'chunk-%02d' $i
  echo "out_time=00:00:0$((i % 10)).000000" >&2
  sleep 0.1
  i=$((i + 1))
done"#;

/// Bytes the fake muxer writes in real-time mode
pub const LIVE_OUTPUT: &[u8] = b"ftyp-isom-moof-mdat";

/// Paths of installed fake tools
pub struct FakeTools {
    /// Fake yt-dlp
    pub extractor: PathBuf,
    /// Fake ffmpeg
    pub muxer: PathBuf,
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Install the fake extractor and muxer into `dir`
pub fn install_fake_tools(dir: &Path) -> FakeTools {
    install(dir, MUXER.to_string())
}

/// Like [`install_fake_tools`], with a muxer that trickles out
/// [`SLOW_CHUNKS`] chunks over a few seconds
pub fn install_slow_tools(dir: &Path) -> FakeTools {
    install(dir, SLOW_MUXER.replace("CHUNKS", &SLOW_CHUNKS.to_string()))
}

fn install(dir: &Path, muxer: String) -> FakeTools {
    let metadata = dir.join("metadata.json");
    std::fs::write(&metadata, CLIP_METADATA).unwrap();

    FakeTools {
        extractor: write_script(
            dir,
            "fake-yt-dlp",
            &EXTRACTOR.replace("METADATA", &metadata.display().to_string()),
        ),
        muxer: write_script(dir, "fake-ffmpeg", &muxer),
    }
}
