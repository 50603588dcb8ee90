use std::sync::Arc;

use dashmap::DashMap;

use super::job::{self, ExitCallback, JobExit, RestartPolicy, TranscodeJob};
use super::launcher::EncoderLauncher;
use super::media::MediaReceiver;
use super::retention::OutputRetention;
use super::variant::OutputVariant;
use crate::config::TranscodeConfig;
use crate::error::{IngestError, Result};

/// Owns every running [`TranscodeJob`].
///
/// Each job gets one monitor task that feeds the encoder, restarts it with
/// exponential backoff after unexpected exits and reports the final
/// outcome through the job's exit callbacks.
pub struct TranscoderSupervisor {
    config: TranscodeConfig,
    launcher: Arc<dyn EncoderLauncher>,
    jobs: Arc<DashMap<String, Arc<TranscodeJob>>>,
    retention: Arc<OutputRetention>,
}

impl TranscoderSupervisor {
    pub fn new(
        config: TranscodeConfig,
        launcher: Arc<dyn EncoderLauncher>,
        retention: Arc<OutputRetention>,
    ) -> Self {
        Self {
            config,
            launcher,
            jobs: Arc::new(DashMap::new()),
            retention,
        }
    }

    fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            budget: self.config.restart_budget,
            backoff_base: self.config.restart_backoff_base(),
            backoff_max: self.config.restart_backoff_max(),
            stop_grace: self.config.stop_grace(),
        }
    }

    /// Creates the session's output tree and launches its encoder.
    ///
    /// Fails when the directories cannot be created or the first encoder
    /// process cannot be spawned; later failures go through restarts.
    pub async fn start(
        &self,
        session_id: &str,
        media: MediaReceiver,
        variants: &[OutputVariant],
    ) -> Result<Arc<TranscodeJob>> {
        if self.jobs.contains_key(session_id) {
            return Err(IngestError::EncodeFailure(format!(
                "session {session_id} already has a transcode job"
            )));
        }

        let job_dir = self.config.output_root.join(session_id);
        for variant in variants {
            tokio::fs::create_dir_all(variant.segment_dir(&job_dir)).await?;
        }
        self.retention.cancel(&job_dir);

        let job = Arc::new(TranscodeJob::new(
            session_id.to_string(),
            job_dir,
            variants.to_vec(),
            media.dropped_counter(),
        ));
        let first = self.launcher.launch(&job.spec()).map_err(|e| {
            IngestError::EncodeFailure(format!("failed to launch encoder: {e}"))
        })?;

        self.jobs.insert(session_id.to_string(), Arc::clone(&job));
        {
            let jobs = Arc::clone(&self.jobs);
            let retention = Arc::clone(&self.retention);
            let finished = Arc::clone(&job);
            job.on_exit(Box::new(move |_| {
                jobs.remove_if(finished.session_id(), |_, current| {
                    Arc::ptr_eq(current, &finished)
                });
                retention.schedule(finished.job_dir());
            }));
        }

        tracing::info!(
            session_id,
            job_dir = %job.job_dir().display(),
            variants = ?variants.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(),
            "transcode job started"
        );
        tokio::spawn(job::monitor(
            Arc::clone(&job),
            Arc::clone(&self.launcher),
            first,
            media,
            self.restart_policy(),
        ));
        Ok(job)
    }

    /// Stops the job and waits for its encoder to exit. Safe to call more
    /// than once and after the job already failed.
    pub async fn stop(&self, job: &TranscodeJob) -> Option<JobExit> {
        job.request_stop();
        job.finished().await;
        job.outcome()
    }

    pub fn on_exit(&self, job: &TranscodeJob, callback: ExitCallback) {
        job.on_exit(callback);
    }

    #[must_use]
    pub fn job(&self, session_id: &str) -> Option<Arc<TranscodeJob>> {
        self.jobs.get(session_id).map(|job| Arc::clone(job.value()))
    }

    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Stops every running job.
    pub async fn shutdown(&self) {
        let jobs: Vec<Arc<TranscodeJob>> =
            self.jobs.iter().map(|job| Arc::clone(job.value())).collect();
        for job in &jobs {
            job.request_stop();
        }
        for job in jobs {
            job.finished().await;
        }
    }
}
