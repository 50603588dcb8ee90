//! Deferred removal of finished jobs' output directories.
//!
//! Viewers may still be fetching the last segments after a stream ends, so
//! a job's directory is scheduled for deletion `retention` after the job
//! stops and removed by a periodic sweep.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

pub struct OutputRetention {
    retention: Duration,
    sweep_interval: Duration,
    pending: Mutex<HashMap<PathBuf, Instant>>,
}

impl OutputRetention {
    #[must_use]
    pub fn new(retention: Duration, sweep_interval: Duration) -> Self {
        Self {
            retention,
            sweep_interval,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn schedule(&self, dir: &Path) {
        let deadline = Instant::now() + self.retention;
        tracing::debug!(dir = %dir.display(), retention = ?self.retention, "output scheduled for removal");
        self.pending.lock().insert(dir.to_path_buf(), deadline);
    }

    /// Keeps `dir` alive, e.g. when a new job reuses it.
    pub fn cancel(&self, dir: &Path) -> bool {
        self.pending.lock().remove(dir).is_some()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Removes every directory whose retention has elapsed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let due: Vec<PathBuf> = {
            let mut pending = self.pending.lock();
            let due: Vec<PathBuf> = pending
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(dir, _)| dir.clone())
                .collect();
            for dir in &due {
                pending.remove(dir);
            }
            due
        };

        let mut removed = 0;
        for dir in due {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(dir = %dir.display(), error = %e, "failed to remove output directory");
                }
            }
        }
        removed
    }

    /// Start periodic cleanup task
    pub fn start_cleanup_task(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_cleanup_loop(cancel).await;
        })
    }

    async fn run_cleanup_loop(&self, cancel: CancellationToken) {
        let mut interval = time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        tracing::info!(
            interval = ?self.sweep_interval,
            retention = ?self.retention,
            "output retention task started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let removed = self.sweep().await;
            if removed > 0 {
                tracing::info!(removed, "removed expired output directories");
            } else {
                tracing::trace!("no expired output directories");
            }
        }
    }
}
