//! ffmpeg argument construction.

use std::path::Path;

use super::variant::{FormatKind, OutputVariant};

/// Arguments for one ffmpeg process reading FLV on stdin and writing every
/// variant under `job_dir`.
#[must_use]
pub fn build_ffmpeg_args(job_dir: &Path, variants: &[OutputVariant]) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-nostats",
        "-loglevel",
        "warning",
        // key=value progress lines (frame=, drop_frames=, ...) on stderr
        "-progress",
        "pipe:2",
        "-fflags",
        "+genpts",
        "-f",
        "flv",
        "-i",
        "pipe:0",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    for variant in variants {
        args.extend(variant_args(job_dir, variant));
    }
    args
}

fn variant_args(job_dir: &Path, variant: &OutputVariant) -> Vec<String> {
    let dir = variant.segment_dir(job_dir);
    let video_kbps = variant.video_bitrate_kbps;
    let mut args = vec![
        "-map".to_string(),
        "0:v:0?".to_string(),
        "-map".to_string(),
        "0:a:0?".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-tune".to_string(),
        "zerolatency".to_string(),
        "-b:v".to_string(),
        format!("{video_kbps}k"),
        "-maxrate".to_string(),
        format!("{video_kbps}k"),
        "-bufsize".to_string(),
        format!("{}k", video_kbps * 2),
        // keyframe on every segment boundary
        "-force_key_frames".to_string(),
        format!("expr:gte(t,n_forced*{})", variant.segment_seconds),
    ];
    if let Some(res) = variant.resolution {
        args.push("-vf".to_string());
        args.push(format!("scale={}:{}", res.width, res.height));
    }
    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", variant.audio_bitrate_kbps),
        "-ar".to_string(),
        "44100".to_string(),
    ]);

    match variant.format {
        FormatKind::Hls => {
            args.extend([
                "-f".to_string(),
                "hls".to_string(),
                "-hls_time".to_string(),
                variant.segment_seconds.to_string(),
                "-hls_list_size".to_string(),
                variant.playlist_window.to_string(),
                // append_list keeps sequence numbers continuous across restarts
                "-hls_flags".to_string(),
                "delete_segments+append_list+independent_segments+program_date_time".to_string(),
                "-hls_segment_filename".to_string(),
                dir.join("seg_%05d.ts").to_string_lossy().into_owned(),
            ]);
        }
        FormatKind::Dash => {
            args.extend([
                "-f".to_string(),
                "dash".to_string(),
                "-seg_duration".to_string(),
                variant.segment_seconds.to_string(),
                "-window_size".to_string(),
                variant.playlist_window.to_string(),
                "-extra_window_size".to_string(),
                "2".to_string(),
                "-remove_at_exit".to_string(),
                "0".to_string(),
                "-init_seg_name".to_string(),
                "init-$RepresentationID$.m4s".to_string(),
                "-media_seg_name".to_string(),
                "chunk-$RepresentationID$-$Number%05d$.m4s".to_string(),
            ]);
        }
    }
    args.push(
        variant
            .manifest_path(job_dir)
            .to_string_lossy()
            .into_owned(),
    );
    args
}

/// Parses a `drop_frames=N` line from `-progress` output.
#[must_use]
pub fn parse_drop_frames(line: &str) -> Option<u64> {
    line.trim().strip_prefix("drop_frames=")?.parse().ok()
}
