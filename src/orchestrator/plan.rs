//! Tool arguments and graph layouts for the two streaming modes

use super::graph::{DiagnosticSink, GraphSpec, InputSlot, NodeSpec, PipeEdge, input_placeholder};
use crate::types::AudioEncoder;
use std::path::Path;

/// Fragmented MP4 flags: playable while it is still being written
pub const FRAGMENTED_MOVFLAGS: &str = "frag_keyframes+empty_moov+default_base_moof";

/// Role names used in logs, failures and diagnostics translation
pub mod roles {
    /// Extractor fetching the video track
    pub const VIDEO: &str = "video";
    /// Extractor fetching the audio track
    pub const AUDIO: &str = "audio";
    /// Muxer combining both
    pub const MUXER: &str = "muxer";
}

/// Extractor arguments writing one format to stdout
pub fn extractor_stdout_args(format_id: &str, source_url: &str, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        format_id.to_string(),
        "-o".to_string(),
        "-".to_string(),
    ];
    args.extend(extra.iter().cloned());
    args.push(source_url.to_string());
    args
}

/// Extractor arguments writing one format to `output`
pub fn extractor_file_args(
    format_id: &str,
    source_url: &str,
    output: &Path,
    extra: &[String],
) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        format_id.to_string(),
        "-o".to_string(),
        output.display().to_string(),
        "--newline".to_string(),
    ];
    args.extend(extra.iter().cloned());
    args.push(source_url.to_string());
    args
}

/// Muxer arguments for the real-time mux
///
/// Inputs are `{input:0}` (video) and `{input:1}` (audio); output is a
/// fragmented MP4 on stdout and machine-readable progress on stderr.
pub fn realtime_muxer_args(encoder: &AudioEncoder) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "error",
        "-progress",
        "pipe:2",
        "-nostats",
        "-i",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(input_placeholder(0));
    args.push("-i".to_string());
    args.push(input_placeholder(1));
    args.extend(
        ["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy"]
            .into_iter()
            .map(String::from),
    );
    args.extend(encoder.muxer_args());
    args.extend(
        ["-movflags", FRAGMENTED_MOVFLAGS, "-f", "mp4", "pipe:1"]
            .into_iter()
            .map(String::from),
    );
    args
}

/// Muxer arguments for the one-shot file mux of the temp-file fallback
pub fn file_muxer_args(video: &Path, audio: &Path, output: &Path, encoder: &AudioEncoder) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"]
        .into_iter()
        .map(String::from)
        .collect();
    args.push(video.display().to_string());
    args.push("-i".to_string());
    args.push(audio.display().to_string());
    args.extend(
        ["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy"]
            .into_iter()
            .map(String::from),
    );
    args.extend(encoder.muxer_args());
    args.extend(["-movflags", "+faststart"].into_iter().map(String::from));
    args.push(output.display().to_string());
    args
}

/// Heuristic size of the muxed output
///
/// The video is copied as is and the audio is re-encoded at a lower
/// bitrate, plus some container overhead.
pub fn estimate_output_size(video_bytes: u64, audio_bytes: u64) -> u64 {
    let video = video_bytes as f64;
    let audio = audio_bytes as f64;
    (video + 0.15 * audio + 0.02 * video).round() as u64
}

/// Inputs of a real-time mux graph
#[derive(Debug)]
pub struct RealtimeInputs<'a> {
    /// Extractor binary
    pub extractor: &'a Path,
    /// Muxer binary
    pub muxer: &'a Path,
    /// Remote page URL
    pub source_url: &'a str,
    /// Video-only format id
    pub video_format: &'a str,
    /// Audio-only format id
    pub audio_format: &'a str,
    /// Extra extractor arguments
    pub extractor_args: &'a [String],
    /// Audio encoder for the muxer
    pub encoder: &'a AudioEncoder,
}

/// Two extractors feeding one muxer whose stdout is the graph output
pub fn realtime_graph(inputs: RealtimeInputs<'_>, muxer_sink: impl DiagnosticSink) -> GraphSpec {
    let video = NodeSpec::new(
        roles::VIDEO,
        inputs.extractor,
        extractor_stdout_args(inputs.video_format, inputs.source_url, inputs.extractor_args),
    );
    let audio = NodeSpec::new(
        roles::AUDIO,
        inputs.extractor,
        extractor_stdout_args(inputs.audio_format, inputs.source_url, inputs.extractor_args),
    );
    let muxer = NodeSpec::new(roles::MUXER, inputs.muxer, realtime_muxer_args(inputs.encoder))
        .with_sink(muxer_sink);

    GraphSpec {
        nodes: vec![video, audio, muxer],
        edges: vec![
            PipeEdge {
                from: 0,
                to: 2,
                slot: InputSlot::Numbered(0),
            },
            PipeEdge {
                from: 1,
                to: 2,
                slot: InputSlot::Numbered(1),
            },
        ],
        output: 2,
    }
}
