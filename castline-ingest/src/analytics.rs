//! Per-session metric sampling.
//!
//! Every publishing session gets its own sampler task. A sample is handed to
//! the [`MetricSink`] in a separate task so a slow or failing sink never
//! delays the next tick, for this session or any other. Each write attempt
//! is bounded by the sample interval; a sink that hangs fails the attempt.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub bitrate_kbps: f64,
    pub dropped_frames: u64,
    pub viewer_count: u64,
}

/// External persistence for samples. Must accept concurrent appends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn record_metric(&self, sample: &MetricSample) -> Result<(), IngestError>;
}

/// Polled viewer counts from the playback side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViewerCountSource: Send + Sync {
    async fn viewer_count(&self, session_id: &str) -> u64;
}

/// Reports zero viewers; used when no playback tracker is wired in.
pub struct NoViewers;

#[async_trait]
impl ViewerCountSource for NoViewers {
    async fn viewer_count(&self, _session_id: &str) -> u64 {
        0
    }
}

/// Running counters of one session, shared with its sampler.
#[derive(Debug, Default)]
pub struct SessionStats {
    bytes_received: AtomicU64,
}

impl SessionStats {
    pub fn add_bytes(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

/// Source of a session's dropped frame count, normally its transcode job.
pub trait DroppedFrames: Send + Sync {
    fn dropped_frames(&self) -> u64;
}

impl DroppedFrames for crate::transcoder::TranscodeJob {
    fn dropped_frames(&self) -> u64 {
        Self::dropped_frames(self)
    }
}

/// Emits samples as tracing events.
pub struct TracingMetricSink;

#[async_trait]
impl MetricSink for TracingMetricSink {
    async fn record_metric(&self, sample: &MetricSample) -> Result<(), IngestError> {
        tracing::info!(
            target: "castline::metrics",
            session_id = %sample.session_id,
            bitrate_kbps = sample.bitrate_kbps,
            dropped_frames = sample.dropped_frames,
            viewer_count = sample.viewer_count,
            "metric sample"
        );
        Ok(())
    }
}

/// Appends samples to a file, one JSON object per line.
pub struct JsonLinesMetricSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonLinesMetricSink {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl MetricSink for JsonLinesMetricSink {
    async fn record_metric(&self, sample: &MetricSample) -> Result<(), IngestError> {
        let mut line = serde_json::to_vec(sample)
            .map_err(|e| IngestError::Persistence(format!("failed to encode sample: {e}")))?;
        line.push(b'\n');

        // one line per write call, never interleaved
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| IngestError::Persistence(format!("{}: {e}", self.path.display())))?;
        file.write_all(&line)
            .await
            .map_err(|e| IngestError::Persistence(format!("{}: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| IngestError::Persistence(e.to_string()))?;
        Ok(())
    }
}

pub struct AnalyticsCollector {
    sink: Arc<dyn MetricSink>,
    viewers: Arc<dyn ViewerCountSource>,
    interval: Duration,
    retry: RetryPolicy,
    samplers: DashMap<String, CancellationToken>,
}

impl AnalyticsCollector {
    pub fn new(
        sink: Arc<dyn MetricSink>,
        viewers: Arc<dyn ViewerCountSource>,
        interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            viewers,
            interval,
            retry,
            samplers: DashMap::new(),
        }
    }

    /// Starts sampling `session_id` until [`Self::stop_sampling`].
    pub fn start_sampling(
        &self,
        session_id: &str,
        stats: Arc<SessionStats>,
        drops: Arc<dyn DroppedFrames>,
    ) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self
            .samplers
            .insert(session_id.to_string(), cancel.clone())
        {
            previous.cancel();
        }

        let sampler = Sampler {
            session_id: session_id.to_string(),
            baseline: (stats.bytes_received(), Instant::now()),
            stats,
            drops,
            sink: Arc::clone(&self.sink),
            viewers: Arc::clone(&self.viewers),
            retry: self.retry,
        };
        let interval = self.interval;
        tokio::spawn(async move { sampler.run(interval, cancel).await });
    }

    pub fn stop_sampling(&self, session_id: &str) {
        if let Some((_, cancel)) = self.samplers.remove(session_id) {
            cancel.cancel();
        }
    }

    #[must_use]
    pub fn active_samplers(&self) -> usize {
        self.samplers.len()
    }
}

struct Sampler {
    session_id: String,
    baseline: (u64, Instant),
    stats: Arc<SessionStats>,
    drops: Arc<dyn DroppedFrames>,
    sink: Arc<dyn MetricSink>,
    viewers: Arc<dyn ViewerCountSource>,
    retry: RetryPolicy,
}

impl Sampler {
    async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let (mut last_bytes, mut last_at) = self.baseline;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let bytes = self.stats.bytes_received();
            let elapsed = now.duration_since(last_at).as_secs_f64();
            let bitrate_kbps = if elapsed > 0.0 {
                bytes.saturating_sub(last_bytes) as f64 * 8.0 / 1000.0 / elapsed
            } else {
                0.0
            };
            last_bytes = bytes;
            last_at = now;

            let viewer_count = tokio::select! {
                () = cancel.cancelled() => break,
                count = self.viewers.viewer_count(&self.session_id) => count,
            };
            let sample = MetricSample {
                session_id: self.session_id.clone(),
                timestamp: Utc::now(),
                bitrate_kbps,
                dropped_frames: self.drops.dropped_frames(),
                viewer_count,
            };

            let sink = Arc::clone(&self.sink);
            let retry = self.retry;
            tokio::spawn(async move {
                let (sink, pending) = (&sink, &sample);
                let result = retry
                    .run("metric write", |_: &IngestError| true, move || async move {
                        match time::timeout(period, sink.record_metric(pending)).await {
                            Ok(written) => written,
                            Err(_) => Err(IngestError::Timeout("metric write")),
                        }
                    })
                    .await;
                if let Err(e) = result {
                    tracing::warn!(
                        session_id = %sample.session_id,
                        error = %e,
                        "dropping metric sample after retries"
                    );
                }
            });
        }
        tracing::debug!(session_id = %self.session_id, "sampler stopped");
    }
}
