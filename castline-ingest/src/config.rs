use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transcoder::variant::{default_variants, OutputVariant};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub transcode: TranscodeConfig,
    pub analytics: AnalyticsConfig,
    pub logging: LoggingConfig,
    /// Keys served by the built-in static key store.
    pub keys: Vec<StaticKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_connections: usize,
    /// How long shutdown waits for sessions to tear down.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:1935".to_string(),
            max_connections: 1000,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub handshake_timeout_ms: u64,
    /// Window between handshake completion and an accepted publish.
    pub auth_timeout_ms: u64,
    /// A publishing session with no audio/video for this long is terminated.
    pub idle_timeout_ms: u64,
    pub out_chunk_size: u32,
    pub window_ack_size: u32,
    /// Media messages buffered towards the encoder before frames are dropped.
    pub media_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            auth_timeout_ms: 10_000,
            idle_timeout_ms: 30_000,
            out_chunk_size: 4096,
            window_ack_size: 2_500_000,
            media_queue_capacity: 1024,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[must_use]
    pub const fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub ffmpeg_path: String,
    pub output_root: PathBuf,
    /// Restarts allowed after an unexpected encoder exit.
    pub restart_budget: u32,
    pub restart_backoff_base_ms: u64,
    pub restart_backoff_max_ms: u64,
    /// Time the encoder gets to flush after stdin closes before it is killed.
    pub stop_grace_ms: u64,
    /// Output directories outlive their job by this long.
    pub retention_seconds: u64,
    pub retention_sweep_interval_seconds: u64,
    pub variants: Vec<OutputVariant>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            output_root: PathBuf::from("./output"),
            restart_budget: 3,
            restart_backoff_base_ms: 500,
            restart_backoff_max_ms: 30_000,
            stop_grace_ms: 5_000,
            retention_seconds: 300,
            retention_sweep_interval_seconds: 10,
            variants: default_variants(),
        }
    }
}

impl TranscodeConfig {
    #[must_use]
    pub const fn restart_backoff_base(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_base_ms)
    }

    #[must_use]
    pub const fn restart_backoff_max(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_max_ms)
    }

    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    #[must_use]
    pub const fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSinkKind {
    /// Samples are emitted as tracing events.
    Tracing,
    /// Samples are appended to `jsonl_path`, one JSON object per line.
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub sample_interval_ms: u64,
    pub sink: MetricSinkKind,
    pub jsonl_path: Option<PathBuf>,
    pub write_retries: usize,
    pub write_retry_base_ms: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 5_000,
            sink: MetricSinkKind::Tracing,
            jsonl_path: None,
            write_retries: 3,
            write_retry_base_ms: 100,
        }
    }
}

impl AnalyticsConfig {
    #[must_use]
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticKeyConfig {
    pub key: String,
    pub owner_id: String,
    #[serde(default)]
    pub revoked: bool,
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Priority (highest first):
    /// 1. Environment variables (`CASTLINE_SESSION__IDLE_TIMEOUT_MS`, ...)
    /// 2. Config file (TOML/YAML/JSON, by extension)
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            } else {
                return Err(ConfigError::NotFound(path.to_string()));
            }
        }

        // Field names contain underscores, so nesting uses a double one.
        builder = builder.add_source(
            Environment::with_prefix("CASTLINE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Returns every problem found; an empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!(
                "server.listen_addr {:?} is not a socket address",
                self.server.listen_addr
            ));
        }
        if self.server.max_connections == 0 {
            problems.push("server.max_connections must be > 0".to_string());
        }
        if self.session.handshake_timeout_ms == 0
            || self.session.auth_timeout_ms == 0
            || self.session.idle_timeout_ms == 0
        {
            problems.push("session timeouts must be > 0".to_string());
        }
        if !(128..=0x7FFF_FFFF).contains(&self.session.out_chunk_size) {
            problems.push("session.out_chunk_size must be within 128..=2147483647".to_string());
        }
        if self.session.media_queue_capacity == 0 {
            problems.push("session.media_queue_capacity must be > 0".to_string());
        }
        if self.transcode.restart_backoff_base_ms == 0 {
            problems.push("transcode.restart_backoff_base_ms must be > 0".to_string());
        }
        if self.transcode.restart_backoff_max_ms < self.transcode.restart_backoff_base_ms {
            problems.push(
                "transcode.restart_backoff_max_ms must be >= restart_backoff_base_ms".to_string(),
            );
        }
        if self.transcode.retention_sweep_interval_seconds == 0 {
            problems.push("transcode.retention_sweep_interval_seconds must be > 0".to_string());
        }
        if self.transcode.variants.is_empty() {
            problems.push("transcode.variants must not be empty".to_string());
        }
        let mut names = std::collections::HashSet::new();
        for variant in &self.transcode.variants {
            problems.extend(variant.problems());
            if !names.insert(variant.name.as_str()) {
                problems.push(format!("duplicate variant name {:?}", variant.name));
            }
        }
        if self.analytics.sample_interval_ms == 0 {
            problems.push("analytics.sample_interval_ms must be > 0".to_string());
        }
        if self.analytics.sink == MetricSinkKind::Jsonl && self.analytics.jsonl_path.is_none() {
            problems.push("analytics.jsonl_path is required for the jsonl sink".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            problems.push(format!(
                "logging.format {:?} must be json or pretty",
                self.logging.format
            ));
        }
        for key in &self.keys {
            if key.key.is_empty() || key.owner_id.is_empty() {
                problems.push("keys entries need a non-empty key and owner_id".to_string());
            }
        }

        problems
    }
}
