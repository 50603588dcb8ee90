use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Hls,
    Dash,
}

impl FormatKind {
    /// Manifest file name inside the variant directory.
    #[must_use]
    pub const fn manifest_name(self) -> &'static str {
        match self {
            Self::Hls => "index.m3u8",
            Self::Dash => "manifest.mpd",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hls => write!(f, "hls"),
            Self::Dash => write!(f, "dash"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// One rendition produced from the incoming stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputVariant {
    pub name: String,
    pub format: FormatKind,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
    /// Segments kept in the live manifest; older ones are deleted by the encoder.
    #[serde(default = "default_playlist_window")]
    pub playlist_window: u32,
}

const fn default_segment_seconds() -> u32 {
    4
}

const fn default_playlist_window() -> u32 {
    6
}

impl OutputVariant {
    #[must_use]
    pub fn segment_dir(&self, job_dir: &Path) -> PathBuf {
        job_dir.join(&self.name)
    }

    #[must_use]
    pub fn manifest_path(&self, job_dir: &Path) -> PathBuf {
        self.segment_dir(job_dir).join(self.format.manifest_name())
    }

    /// Problems that would make the encoder reject this variant.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_name {
            problems.push(format!(
                "variant name {:?} must be non-empty [A-Za-z0-9_-]",
                self.name
            ));
        }
        if self.video_bitrate_kbps == 0 {
            problems.push(format!("variant {}: video_bitrate_kbps must be > 0", self.name));
        }
        if self.audio_bitrate_kbps == 0 {
            problems.push(format!("variant {}: audio_bitrate_kbps must be > 0", self.name));
        }
        if self.segment_seconds == 0 || self.playlist_window == 0 {
            problems.push(format!(
                "variant {}: segment_seconds and playlist_window must be > 0",
                self.name
            ));
        }
        if let Some(res) = self.resolution {
            if res.width == 0 || res.height == 0 || res.width % 2 != 0 || res.height % 2 != 0 {
                problems.push(format!(
                    "variant {}: resolution {}x{} must be even and non-zero",
                    self.name, res.width, res.height
                ));
            }
        }
        problems
    }
}

/// Ladder used when no variants are configured.
#[must_use]
pub fn default_variants() -> Vec<OutputVariant> {
    vec![
        OutputVariant {
            name: "720p".to_string(),
            format: FormatKind::Hls,
            video_bitrate_kbps: 2500,
            audio_bitrate_kbps: 128,
            resolution: Some(Resolution {
                width: 1280,
                height: 720,
            }),
            segment_seconds: default_segment_seconds(),
            playlist_window: default_playlist_window(),
        },
        OutputVariant {
            name: "480p".to_string(),
            format: FormatKind::Hls,
            video_bitrate_kbps: 1000,
            audio_bitrate_kbps: 96,
            resolution: Some(Resolution {
                width: 854,
                height: 480,
            }),
            segment_seconds: default_segment_seconds(),
            playlist_window: default_playlist_window(),
        },
        OutputVariant {
            name: "dash".to_string(),
            format: FormatKind::Dash,
            video_bitrate_kbps: 2500,
            audio_bitrate_kbps: 128,
            resolution: None,
            segment_seconds: default_segment_seconds(),
            playlist_window: default_playlist_window(),
        },
    ]
}
