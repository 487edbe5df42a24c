//! Muxer capability probe: picks the audio encoder once per process lifetime

use super::ToolBinary;
use crate::config::StreamingConfig;
use crate::types::AudioEncoder;
use tokio::sync::OnceCell;

/// Caches the audio encoder chosen from the muxer's encoder listing
///
/// The preferred HE-AAC encoder (libfdk_aac) is only present in some builds.
/// When it is missing, or the probe itself fails, the native AAC encoder is
/// used at a higher bitrate. The probe runs at most once.
#[derive(Debug)]
pub struct EncoderProbe {
    he_aac_bitrate: String,
    aac_bitrate: String,
    selected: OnceCell<AudioEncoder>,
}

impl EncoderProbe {
    /// Create a probe with bitrates from the streaming config
    pub fn new(config: &StreamingConfig) -> Self {
        Self {
            he_aac_bitrate: config.he_aac_bitrate.clone(),
            aac_bitrate: config.aac_bitrate.clone(),
            selected: OnceCell::new(),
        }
    }

    /// The audio encoder to use, probing the muxer on first call
    pub async fn audio_encoder(&self, muxer: &ToolBinary) -> AudioEncoder {
        self.selected
            .get_or_init(|| async {
                match muxer.execute(["-hide_banner", "-encoders"]).await {
                    Ok(listing) => {
                        let encoder = select_audio_encoder(
                            &String::from_utf8_lossy(&listing),
                            &self.he_aac_bitrate,
                            &self.aac_bitrate,
                        );
                        tracing::info!(encoder = ?encoder, "Selected audio encoder");
                        encoder
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Encoder probe failed, using native AAC");
                        AudioEncoder::Aac {
                            bitrate: self.aac_bitrate.clone(),
                        }
                    }
                }
            })
            .await
            .clone()
    }

    /// The encoder chosen by an earlier probe, if any
    pub fn selected(&self) -> Option<AudioEncoder> {
        self.selected.get().cloned()
    }
}

/// Choose an encoder from `ffmpeg -encoders` output
///
/// Listing lines look like ` A....D libfdk_aac   Fraunhofer FDK AAC (codec aac)`;
/// the encoder name is the second column.
pub fn select_audio_encoder(listing: &str, he_aac_bitrate: &str, aac_bitrate: &str) -> AudioEncoder {
    let has_fdk = listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|name| name == "libfdk_aac");

    if has_fdk {
        AudioEncoder::HeAac {
            bitrate: he_aac_bitrate.to_string(),
        }
    } else {
        AudioEncoder::Aac {
            bitrate: aac_bitrate.to_string(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const LISTING_WITH_FDK: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libfdk_aac           Fraunhofer FDK AAC (codec aac)
";

    const LISTING_WITHOUT_FDK: &str = "Encoders:
 ------
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libopus              libopus Opus (codec opus)
 V....D libx264              mentions libfdk_aac only in a description
";

    #[test]
    fn prefers_he_aac_when_listed() {
        assert_eq!(
            select_audio_encoder(LISTING_WITH_FDK, "64k", "128k"),
            AudioEncoder::HeAac {
                bitrate: "64k".into()
            }
        );
    }

    #[test]
    fn falls_back_to_native_aac() {
        assert_eq!(
            select_audio_encoder(LISTING_WITHOUT_FDK, "64k", "128k"),
            AudioEncoder::Aac {
                bitrate: "128k".into()
            }
        );
    }

    #[tokio::test]
    async fn failed_probe_is_cached_as_fallback() {
        let probe = EncoderProbe::new(&StreamingConfig::default());
        let muxer = ToolBinary::fixed("ffmpeg", PathBuf::from("/nonexistent/ffmpeg-xyz"));

        assert!(probe.selected().is_none());
        let encoder = probe.audio_encoder(&muxer).await;
        assert_eq!(
            encoder,
            AudioEncoder::Aac {
                bitrate: "128k".into()
            }
        );
        assert_eq!(probe.selected(), Some(encoder));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_runs_muxer_once() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");
        let script = dir.path().join("fake-ffmpeg");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho run >> '{}'\necho ' A....D libfdk_aac  Fraunhofer FDK AAC'\n",
                counter.display()
            ),
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let probe = EncoderProbe::new(&StreamingConfig::default());
        let muxer = ToolBinary::fixed("ffmpeg", script);

        let first = probe.audio_encoder(&muxer).await;
        let second = probe.audio_encoder(&muxer).await;

        assert!(matches!(first, AudioEncoder::HeAac { .. }));
        assert_eq!(first, second);
        let runs = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }
}
