use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use castline_rtmp::flv::{FlvMuxer, FlvTag, MediaKind};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin};
use tokio_util::sync::CancellationToken;

use super::command::parse_drop_frames;
use super::launcher::{EncoderLauncher, EncoderSpec};
use super::media::MediaReceiver;
use super::variant::OutputVariant;

/// How one encoder process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderExit {
    /// Exited with status 0 without being asked to.
    Normal,
    Error(i32),
    /// Terminated by a signal.
    Killed,
    SpawnFailed(String),
}

impl From<ExitStatus> for EncoderExit {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Self::Normal,
            Some(code) => Self::Error(code),
            None => Self::Killed,
        }
    }
}

/// Final outcome of a job, reported once through the exit callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobExit {
    Stopped,
    Failed {
        restarts: u32,
        last_exit: EncoderExit,
    },
}

pub type ExitCallback = Box<dyn FnOnce(&JobExit) + Send>;

const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub budget: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub stop_grace: Duration,
}

impl RestartPolicy {
    /// Delay before each restart: base, 2*base, 4*base ... capped at max.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.backoff_base)
            .with_max_delay(self.backoff_max)
            .with_factor(2.0)
            .with_max_times(self.budget as usize)
            .build()
            .collect()
    }
}

#[derive(Default)]
struct ExitState {
    outcome: Option<JobExit>,
    callbacks: Vec<ExitCallback>,
}

/// Frames the encoder itself reported as dropped, summed across restarts.
#[derive(Default)]
struct EncoderDrops {
    previous_processes: AtomicU64,
    current_process: AtomicU64,
}

impl EncoderDrops {
    fn begin_process(&self) {
        let last = self.current_process.swap(0, Ordering::Relaxed);
        self.previous_processes.fetch_add(last, Ordering::Relaxed);
    }

    fn report(&self, dropped: u64) {
        self.current_process.fetch_max(dropped, Ordering::Relaxed);
    }

    fn total(&self) -> u64 {
        self.previous_processes.load(Ordering::Relaxed)
            + self.current_process.load(Ordering::Relaxed)
    }
}

/// One supervised encoder bound to a publishing session.
pub struct TranscodeJob {
    session_id: String,
    job_dir: PathBuf,
    variants: Vec<OutputVariant>,
    restarts: AtomicU32,
    last_exit: Mutex<Option<EncoderExit>>,
    pipeline_drops: Arc<AtomicU64>,
    encoder_drops: Arc<EncoderDrops>,
    exit: Mutex<ExitState>,
    stop: CancellationToken,
    done: CancellationToken,
}

impl TranscodeJob {
    pub(crate) fn new(
        session_id: String,
        job_dir: PathBuf,
        variants: Vec<OutputVariant>,
        pipeline_drops: Arc<AtomicU64>,
    ) -> Self {
        Self {
            session_id,
            job_dir,
            variants,
            restarts: AtomicU32::new(0),
            last_exit: Mutex::new(None),
            pipeline_drops,
            encoder_drops: Arc::new(EncoderDrops::default()),
            exit: Mutex::new(ExitState::default()),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    #[must_use]
    pub fn variants(&self) -> &[OutputVariant] {
        &self.variants
    }

    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_exit(&self) -> Option<EncoderExit> {
        self.last_exit.lock().clone()
    }

    /// Media the pipeline could not queue plus frames the encoder dropped.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.pipeline_drops.load(Ordering::Relaxed) + self.encoder_drops.total()
    }

    #[must_use]
    pub fn outcome(&self) -> Option<JobExit> {
        self.exit.lock().outcome.clone()
    }

    pub(crate) fn spec(&self) -> EncoderSpec {
        EncoderSpec {
            session_id: self.session_id.clone(),
            job_dir: self.job_dir.clone(),
            variants: self.variants.clone(),
        }
    }

    /// Registers `callback` for the job's final outcome. Runs immediately
    /// when the job has already finished.
    pub fn on_exit(&self, callback: ExitCallback) {
        let mut state = self.exit.lock();
        match state.outcome.clone() {
            Some(outcome) => {
                drop(state);
                callback(&outcome);
            }
            None => state.callbacks.push(callback),
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Resolves once the monitor has recorded the outcome.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }

    fn finish(&self, outcome: JobExit) {
        let callbacks = {
            let mut state = self.exit.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(&outcome);
        }
        self.done.cancel();
    }
}

/// Codec configuration seen so far, replayed into restarted encoders.
#[derive(Default)]
struct SequenceHeaders {
    metadata: Option<FlvTag>,
    video: Option<FlvTag>,
    audio: Option<FlvTag>,
}

impl SequenceHeaders {
    fn observe(&mut self, tag: &FlvTag) {
        if !tag.is_sequence_header() {
            return;
        }
        let slot = match tag.kind {
            MediaKind::Script => &mut self.metadata,
            MediaKind::Video => &mut self.video,
            MediaKind::Audio => &mut self.audio,
        };
        *slot = Some(FlvTag::new(tag.kind, 0, tag.data.clone()));
    }

    fn iter(&self) -> impl Iterator<Item = &FlvTag> {
        [&self.metadata, &self.video, &self.audio]
            .into_iter()
            .flatten()
    }
}

enum EncoderRun {
    Stopped,
    Exited(EncoderExit),
}

/// Drives the job until it is stopped or its restart budget runs out.
pub(crate) async fn monitor(
    job: Arc<TranscodeJob>,
    launcher: Arc<dyn EncoderLauncher>,
    first: Child,
    mut media: MediaReceiver,
    policy: RestartPolicy,
) {
    let spec = job.spec();
    let mut headers = SequenceHeaders::default();
    let mut delays = policy.delays().into_iter();
    let mut next_child = Some(first);

    let outcome = loop {
        let child = match next_child.take() {
            Some(child) => Ok(child),
            None => launcher.launch(&spec),
        };
        let exit = match child {
            Ok(child) => {
                match run_encoder(&job, child, &mut media, &mut headers, policy.stop_grace).await {
                    EncoderRun::Stopped => break JobExit::Stopped,
                    EncoderRun::Exited(exit) => exit,
                }
            }
            Err(e) => EncoderExit::SpawnFailed(e.to_string()),
        };

        *job.last_exit.lock() = Some(exit.clone());
        let restarts = job.restart_count();
        let Some(delay) = delays.next().filter(|_| restarts < policy.budget) else {
            tracing::error!(
                session_id = %job.session_id,
                restarts,
                ?exit,
                "encoder restart budget exhausted"
            );
            break JobExit::Failed {
                restarts,
                last_exit: exit,
            };
        };

        job.restarts.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            session_id = %job.session_id,
            ?exit,
            attempt = restarts + 1,
            budget = policy.budget,
            ?delay,
            "encoder exited unexpectedly, restarting"
        );
        if !wait_backoff(&job, &mut media, &mut headers, delay).await {
            break JobExit::Stopped;
        }
    };

    tracing::info!(session_id = %job.session_id, ?outcome, "transcode job finished");
    job.finish(outcome);
}

async fn run_encoder(
    job: &TranscodeJob,
    mut child: Child,
    media: &mut MediaReceiver,
    headers: &mut SequenceHeaders,
    stop_grace: Duration,
) -> EncoderRun {
    job.encoder_drops.begin_process();
    let scanner = child.stderr.take().map(|stderr| {
        tokio::spawn(scan_progress(
            stderr,
            job.session_id.clone(),
            Arc::clone(&job.encoder_drops),
        ))
    });

    let run = feed_encoder(job, child, media, headers, stop_grace).await;

    // Let the last progress lines land before the next process resets the count.
    if let Some(scanner) = scanner {
        if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, scanner).await.is_err() {
            tracing::debug!(session_id = %job.session_id, "encoder stderr still open after exit");
        }
    }
    run
}

async fn feed_encoder(
    job: &TranscodeJob,
    mut child: Child,
    media: &mut MediaReceiver,
    headers: &mut SequenceHeaders,
    stop_grace: Duration,
) -> EncoderRun {
    let Some(mut stdin) = child.stdin.take() else {
        let _ = child.kill().await;
        return EncoderRun::Exited(EncoderExit::SpawnFailed("stdin not piped".to_string()));
    };

    let mut muxer = FlvMuxer::new();
    let preamble = muxer
        .write_flv_header()
        .and_then(|()| headers.iter().try_for_each(|tag| muxer.write_tag(tag)));
    if let Err(e) = preamble {
        tracing::error!(session_id = %job.session_id, error = %e, "failed to build flv preamble");
    }
    let mut pending = muxer.extract_current_bytes();

    loop {
        if !pending.is_empty() {
            tokio::select! {
                biased;
                () = job.stop.cancelled() => {
                    graceful_stop(&job.session_id, child, stdin, stop_grace).await;
                    return EncoderRun::Stopped;
                }
                written = stdin.write_all(&pending) => {
                    pending.clear();
                    if let Err(e) = written {
                        tracing::debug!(session_id = %job.session_id, error = %e, "encoder stdin closed");
                        media.record_drop();
                        return EncoderRun::Exited(wait_exit(&mut child).await);
                    }
                }
            }
        }

        tokio::select! {
            biased;
            () = job.stop.cancelled() => {
                graceful_stop(&job.session_id, child, stdin, stop_grace).await;
                return EncoderRun::Stopped;
            }
            status = child.wait() => {
                return EncoderRun::Exited(match status {
                    Ok(status) => status.into(),
                    Err(e) => EncoderExit::SpawnFailed(e.to_string()),
                });
            }
            tag = media.recv() => {
                let Some(tag) = tag else {
                    // publisher side is gone
                    graceful_stop(&job.session_id, child, stdin, stop_grace).await;
                    return EncoderRun::Stopped;
                };
                headers.observe(&tag);
                match muxer.write_tag(&tag) {
                    Ok(()) => pending = muxer.extract_current_bytes(),
                    Err(e) => {
                        tracing::warn!(session_id = %job.session_id, error = %e, "dropping unmuxable tag");
                        media.record_drop();
                    }
                }
            }
        }
    }
}

async fn wait_exit(child: &mut Child) -> EncoderExit {
    match child.wait().await {
        Ok(status) => status.into(),
        Err(e) => EncoderExit::SpawnFailed(e.to_string()),
    }
}

/// Closes stdin so the encoder finalises its manifests, then kills it if
/// it is still running after `grace`.
async fn graceful_stop(session_id: &str, mut child: Child, stdin: ChildStdin, grace: Duration) {
    drop(stdin);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(session_id, %status, "encoder exited after stdin closed");
        }
        Ok(Err(e)) => {
            tracing::warn!(session_id, error = %e, "failed to wait for encoder");
        }
        Err(_) => {
            tracing::warn!(session_id, ?grace, "encoder did not exit in time, killing");
            if let Err(e) = child.kill().await {
                tracing::error!(session_id, error = %e, "failed to kill encoder");
            }
        }
    }
}

/// Waits out a restart delay. Media keeps draining so the session never
/// blocks; frames are counted as dropped, sequence headers are cached.
async fn wait_backoff(
    job: &TranscodeJob,
    media: &mut MediaReceiver,
    headers: &mut SequenceHeaders,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            biased;
            () = job.stop.cancelled() => return false,
            () = &mut sleep => return true,
            tag = media.recv() => match tag {
                Some(tag) if tag.is_sequence_header() => headers.observe(&tag),
                Some(_) => media.record_drop(),
                None => return false,
            },
        }
    }
}

async fn scan_progress(stderr: ChildStderr, session_id: String, drops: Arc<EncoderDrops>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(dropped) = parse_drop_frames(&line) {
                    drops.report(dropped);
                } else if !is_progress_line(&line) {
                    tracing::debug!(session_id = %session_id, "encoder: {line}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "encoder stderr read failed");
                break;
            }
        }
    }
}

fn is_progress_line(line: &str) -> bool {
    line.split_once('=')
        .is_some_and(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
}
