//! RTMP ingest service core.
//!
//! Accepts publisher connections, validates stream keys, runs one transcode
//! job per live stream and samples per-session metrics.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod retry;
pub mod server;
pub mod session;
pub mod transcoder;

pub use config::Config;
pub use error::{IngestError, Result};
pub use server::IngestServer;
