pub mod command;
pub mod job;
pub mod launcher;
pub mod media;
pub mod retention;
pub mod supervisor;
pub mod variant;

pub use job::{EncoderExit, JobExit, TranscodeJob};
pub use launcher::{EncoderLauncher, EncoderSpec, FfmpegLauncher};
pub use media::{media_channel, MediaReceiver, MediaSender};
pub use retention::OutputRetention;
pub use supervisor::TranscoderSupervisor;
pub use variant::{FormatKind, OutputVariant, Resolution};
