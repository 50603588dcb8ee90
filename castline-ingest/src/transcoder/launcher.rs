use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::command::build_ffmpeg_args;
use super::variant::OutputVariant;

/// What one encoder process must produce.
#[derive(Debug, Clone)]
pub struct EncoderSpec {
    pub session_id: String,
    pub job_dir: PathBuf,
    pub variants: Vec<OutputVariant>,
}

/// Starts encoder processes.
///
/// The child must read FLV from a piped stdin; a piped stderr, when
/// present, is scanned for progress output.
pub trait EncoderLauncher: Send + Sync {
    fn launch(&self, spec: &EncoderSpec) -> std::io::Result<Child>;
}

pub struct FfmpegLauncher {
    ffmpeg_path: String,
}

impl FfmpegLauncher {
    #[must_use]
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn launch(&self, spec: &EncoderSpec) -> std::io::Result<Child> {
        let args = build_ffmpeg_args(&spec.job_dir, &spec.variants);
        tracing::debug!(
            session_id = %spec.session_id,
            ffmpeg = %self.ffmpeg_path,
            ?args,
            "launching encoder"
        );
        Command::new(&self.ffmpeg_path)
            .args(&args)
            .current_dir(&spec.job_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}
