use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use castline_rtmp::{
    amf0::{amf0_writer::Amf0Writer, Amf0ValueType},
    chunk::ChunkUnpacketizer,
    flv::{FlvTag, MediaKind},
    handshake,
    messages::{define::peer_bandwidth_limit_type, MessageParser, RtmpMessage},
    netconnection::{
        define::{status_code, status_level, PUBLISH_STREAM_ID},
        ResponseWriter,
    },
};
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::state::{SessionState, StreamSession};
use super::IngestContext;
use crate::analytics::{DroppedFrames, SessionStats};
use crate::auth::extract_stream_key;
use crate::error::{IngestError, Result};
use crate::events::EndReason;
use crate::transcoder::{media_channel, JobExit, MediaSender, TranscodeJob};

const READ_BUF_SIZE: usize = 4096;

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

/// Notifications from other tasks, delivered into the session's own loop.
#[derive(Debug)]
enum SessionEvent {
    JobExited(JobExit),
}

/// Resources held while publishing. Dropped by teardown.
struct ActivePublish {
    key: String,
    job: Arc<TranscodeJob>,
    media: MediaSender,
}

/// Drives one RTMP publisher connection from handshake to close.
///
/// All session state lives in this task. The transcode monitor and the
/// timers only reach it through the event channel and the deadline branch
/// of the read loop.
pub struct ServerSession<S> {
    io: S,
    ctx: Arc<IngestContext>,
    session: StreamSession,
    cancel: CancellationToken,

    unpacketizer: ChunkUnpacketizer,
    writer: ResponseWriter,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,

    stats: Arc<SessionStats>,
    active: Option<ActivePublish>,
    auth_deadline: Instant,
    last_media: Instant,

    ack_window: u32,
    bytes_total: u64,
    bytes_acked: u64,
}

impl<S> ServerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        io: S,
        remote_addr: SocketAddr,
        ctx: Arc<IngestContext>,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let ack_window = ctx.session.window_ack_size;
        Self {
            io,
            session: StreamSession::new(nanoid::nanoid!(12), remote_addr),
            ctx,
            cancel,
            unpacketizer: ChunkUnpacketizer::new(),
            writer: ResponseWriter::new(),
            events_tx,
            events_rx,
            stats: Arc::new(SessionStats::default()),
            active: None,
            auth_deadline: now,
            last_media: now,
            ack_window,
            bytes_total: 0,
            bytes_acked: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Runs the connection to completion and returns its final state,
    /// `Closed` or `Failed`.
    pub async fn run(mut self) -> SessionState {
        let span = tracing::info_span!(
            "rtmp_session",
            session_id = %self.session.id,
            remote_addr = %self.session.remote_addr
        );
        async move {
            tracing::info!("rtmp connection accepted");
            let outcome = self.serve().await;
            self.finish(outcome).await
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self) -> Result<EndReason> {
        self.session.transition(SessionState::Handshaking)?;
        let leftover = handshake::accept(&mut self.io, self.ctx.session.handshake_timeout()).await?;

        self.session.transition(SessionState::Authenticating)?;
        self.auth_deadline = Instant::now() + self.ctx.session.auth_timeout();

        if !leftover.is_empty() {
            self.record_received(leftover.len()).await?;
            if let Some(reason) = self.process_incoming(&leftover).await? {
                return Ok(reason);
            }
        }

        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let deadline = match self.session.state() {
                SessionState::Publishing => self.last_media + self.ctx.session.idle_timeout(),
                _ => self.auth_deadline,
            };

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(EndReason::Shutdown),
                Some(event) = self.events_rx.recv() => match event {
                    SessionEvent::JobExited(JobExit::Failed { restarts, last_exit }) => {
                        return Err(IngestError::EncodeFailure(format!(
                            "encoder gave up after {restarts} restarts, last exit {last_exit:?}"
                        )));
                    }
                    SessionEvent::JobExited(JobExit::Stopped) => return Ok(EndReason::Shutdown),
                },
                read = self.io.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => return Ok(EndReason::PeerDisconnected),
                        Ok(n) => n,
                        Err(e) if is_disconnect(&e) => {
                            tracing::debug!(session_id = %self.session.id, error = %e, "peer dropped the connection");
                            return Ok(EndReason::PeerDisconnected);
                        }
                        Err(e) => return Err(e.into()),
                    };
                    self.record_received(n).await?;
                    if let Some(reason) = self.process_incoming(&buf[..n]).await? {
                        return Ok(reason);
                    }
                }
                () = time::sleep_until(deadline) => {
                    return match self.session.state() {
                        SessionState::Publishing => Ok(EndReason::IdleTimeout),
                        _ => Err(IngestError::Timeout("no accepted publish before auth deadline")),
                    };
                }
            }
        }
    }

    /// Counts inbound bytes and acknowledges each full client window.
    async fn record_received(&mut self, n: usize) -> Result<()> {
        self.stats.add_bytes(n);
        self.bytes_total += n as u64;
        if self.ack_window > 0 && self.bytes_total - self.bytes_acked >= u64::from(self.ack_window) {
            self.bytes_acked = self.bytes_total;
            // sequence number wraps at 32 bits
            self.writer.write_acknowledgement(self.bytes_total as u32)?;
            self.flush().await?;
        }
        Ok(())
    }

    async fn process_incoming(&mut self, data: &[u8]) -> Result<Option<EndReason>> {
        self.unpacketizer.extend_data(data)?;
        let outcome = self.drain_messages().await;
        // rejections are written before the error surfaces
        let flushed = self.flush().await;
        let outcome = outcome?;
        flushed?;
        Ok(outcome)
    }

    async fn drain_messages(&mut self) -> Result<Option<EndReason>> {
        while let Some(chunk) = self.unpacketizer.read_message()? {
            let message = MessageParser::new(chunk).parse()?;
            if let Some(reason) = self.handle_message(message).await? {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    async fn flush(&mut self) -> Result<()> {
        if self.writer.has_output() {
            let output = self.writer.extract_output();
            self.io.write_all(&output).await?;
            self.io.flush().await?;
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: RtmpMessage) -> Result<Option<EndReason>> {
        match message {
            RtmpMessage::SetChunkSize { chunk_size } => {
                self.unpacketizer.update_max_chunk_size(chunk_size)?;
            }
            RtmpMessage::AbortMessage { chunk_stream_id } => {
                self.unpacketizer.abort_chunk_stream(chunk_stream_id);
            }
            RtmpMessage::WindowAcknowledgementSize { size } => {
                self.ack_window = size;
            }
            RtmpMessage::Command {
                command_name,
                transaction_id,
                command_object,
                others,
            } => {
                return self
                    .handle_command(&command_name, transaction_id, &command_object, &others)
                    .await;
            }
            RtmpMessage::Amf0Data { values } => self.forward_metadata(values)?,
            RtmpMessage::Audio { data, timestamp } => {
                self.forward_media(MediaKind::Audio, timestamp, data.freeze());
            }
            RtmpMessage::Video { data, timestamp } => {
                self.forward_media(MediaKind::Video, timestamp, data.freeze());
            }
            other => {
                tracing::trace!(session_id = %self.session.id, message = ?other, "ignored message");
            }
        }
        Ok(None)
    }

    async fn handle_command(
        &mut self,
        name: &str,
        transaction_id: f64,
        command_object: &Amf0ValueType,
        others: &[Amf0ValueType],
    ) -> Result<Option<EndReason>> {
        tracing::debug!(session_id = %self.session.id, command = name, transaction_id, "command");
        match name {
            "connect" => self.on_connect(transaction_id, command_object)?,
            "releaseStream" => self.writer.write_empty_result(transaction_id)?,
            "FCPublish" => {
                self.writer.write_empty_result(transaction_id)?;
                let stream = others.first().and_then(Amf0ValueType::as_str).unwrap_or_default();
                self.writer.write_on_fc_publish(
                    status_code::PUBLISH_START,
                    &format!("FCPublish to stream {stream}."),
                )?;
            }
            "createStream" => self
                .writer
                .write_create_stream_result(transaction_id, PUBLISH_STREAM_ID)?,
            "publish" => {
                let name = others.first().and_then(Amf0ValueType::as_str).unwrap_or_default();
                self.on_publish(name.to_string()).await?;
            }
            "deleteStream" | "FCUnpublish" | "closeStream" => {
                if self.session.state() == SessionState::Publishing {
                    self.writer.write_on_status(
                        PUBLISH_STREAM_ID,
                        status_level::STATUS,
                        status_code::UNPUBLISH_SUCCESS,
                        "Stream unpublished.",
                    )?;
                    return Ok(Some(EndReason::Unpublished));
                }
            }
            _ => {
                tracing::debug!(session_id = %self.session.id, command = name, "unhandled command");
            }
        }
        Ok(None)
    }

    fn on_connect(&mut self, transaction_id: f64, command_object: &Amf0ValueType) -> Result<()> {
        let properties = command_object.as_properties();
        let app = properties
            .and_then(|p| p.get("app"))
            .and_then(Amf0ValueType::as_str)
            .unwrap_or_default();
        let object_encoding = properties
            .and_then(|p| p.get("objectEncoding"))
            .and_then(Amf0ValueType::as_number)
            .unwrap_or(0.0);
        tracing::info!(session_id = %self.session.id, app, "rtmp connect");

        let config = &self.ctx.session;
        self.writer
            .write_window_acknowledgement_size(config.window_ack_size)?;
        self.writer
            .write_set_peer_bandwidth(config.window_ack_size, peer_bandwidth_limit_type::DYNAMIC)?;
        self.writer.write_set_chunk_size(config.out_chunk_size)?;
        self.writer
            .write_connect_result(transaction_id, object_encoding)?;
        Ok(())
    }

    async fn on_publish(&mut self, publish_name: String) -> Result<()> {
        if self.session.state() != SessionState::Authenticating {
            tracing::warn!(session_id = %self.session.id, state = %self.session.state(), "publish ignored");
            return Ok(());
        }
        let key = extract_stream_key(&publish_name).to_string();
        if key.is_empty() {
            self.reject(status_code::PUBLISH_BAD_NAME, "Missing stream key.")?;
            return Err(IngestError::Protocol("publish without a stream name".to_string()));
        }

        let owner_id = match time::timeout_at(
            self.auth_deadline,
            self.ctx.authenticator.authenticate(&key),
        )
        .await
        {
            Ok(Ok(owner_id)) => owner_id,
            Ok(Err(e)) => {
                tracing::warn!(session_id = %self.session.id, error = %e, "publish rejected");
                self.reject(status_code::PUBLISH_REJECTED, "Invalid stream key.")?;
                return Err(e.into());
            }
            Err(_) => {
                self.reject(status_code::PUBLISH_REJECTED, "Authentication timed out.")?;
                return Err(IngestError::Timeout("key lookup"));
            }
        };

        if let Err(e) = self.ctx.authenticator.acquire(&key, &self.session.id) {
            tracing::warn!(session_id = %self.session.id, holder = %e.holder, "stream key already in use");
            self.reject(status_code::PUBLISH_BAD_NAME, "Stream key is already publishing.")?;
            return Err(e.into());
        }

        let (media, media_rx) = media_channel(self.ctx.session.media_queue_capacity);
        let job = match self
            .ctx
            .supervisor
            .start(&self.session.id, media_rx, &self.ctx.variants)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                self.ctx.authenticator.release(&key, &self.session.id);
                self.reject(status_code::PUBLISH_REJECTED, "Transcoder unavailable.")?;
                return Err(e);
            }
        };

        let events = self.events_tx.clone();
        self.ctx.supervisor.on_exit(
            &job,
            Box::new(move |exit| {
                // the session may already be gone
                let _ = events.send(SessionEvent::JobExited(exit.clone()));
            }),
        );

        self.session.key = Some(key.clone());
        self.session.owner_id = Some(owner_id.clone());
        self.active = Some(ActivePublish {
            key,
            job: Arc::clone(&job),
            media,
        });
        self.session.transition(SessionState::Publishing)?;
        self.last_media = Instant::now();

        self.writer.write_stream_begin(PUBLISH_STREAM_ID)?;
        self.writer.write_on_status(
            PUBLISH_STREAM_ID,
            status_level::STATUS,
            status_code::PUBLISH_START,
            &format!("{publish_name} is now published."),
        )?;

        self.ctx.analytics.start_sampling(
            &self.session.id,
            Arc::clone(&self.stats),
            job as Arc<dyn DroppedFrames>,
        );
        self.ctx.events.session_started(&self.session.id, &owner_id);
        tracing::info!(session_id = %self.session.id, owner_id = %owner_id, "publishing");
        Ok(())
    }

    fn reject(&mut self, code: &str, description: &str) -> Result<()> {
        self.writer
            .write_on_status(PUBLISH_STREAM_ID, status_level::ERROR, code, description)?;
        Ok(())
    }

    fn forward_metadata(&mut self, values: Vec<Amf0ValueType>) -> Result<()> {
        let Some(active) = &self.active else {
            return Ok(());
        };
        let body = match values.first().and_then(Amf0ValueType::as_str) {
            Some("@setDataFrame") => &values[1..],
            Some("onMetaData") => &values[..],
            _ => return Ok(()),
        };
        let mut writer = Amf0Writer::new();
        writer.write_anys(body)?;
        let tag = FlvTag::new(MediaKind::Script, 0, writer.extract_current_bytes().freeze());
        active.media.send(tag);
        Ok(())
    }

    fn forward_media(&mut self, kind: MediaKind, timestamp: u32, data: bytes::Bytes) {
        let Some(active) = &self.active else {
            tracing::trace!(session_id = %self.session.id, "media before publish dropped");
            return;
        };
        self.last_media = Instant::now();
        self.session.last_media_at = Some(Utc::now());
        if !active.media.send(FlvTag::new(kind, timestamp, data)) {
            tracing::debug!(session_id = %self.session.id, "transcode job gone, media discarded");
        }
    }

    /// Releases everything acquired on entering `Publishing`. Safe to call
    /// more than once.
    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.ctx.analytics.stop_sampling(&self.session.id);
        drop(active.media);
        if let Some(exit) = self.ctx.supervisor.stop(&active.job).await {
            tracing::debug!(session_id = %self.session.id, ?exit, "transcode job finished");
        }
        self.ctx
            .authenticator
            .release(&active.key, &self.session.id);
    }

    async fn finish(&mut self, outcome: Result<EndReason>) -> SessionState {
        let was_publishing = self.session.state() == SessionState::Publishing;
        let (next, reason) = match outcome {
            Ok(reason) if was_publishing => (SessionState::Terminating, reason),
            Ok(reason) => (SessionState::Failed, reason),
            Err(IngestError::EncodeFailure(msg)) => {
                tracing::error!(session_id = %self.session.id, error = %msg, "transcoding failed");
                (SessionState::Failed, EndReason::EncodeFailed)
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session.id, state = %self.session.state(), error = %e, "session failed");
                (SessionState::Failed, EndReason::ProtocolError(e.to_string()))
            }
        };

        // only fails if already terminal, which cannot happen here
        let _ = self.session.transition(next);
        self.teardown().await;
        if next == SessionState::Terminating {
            let _ = self.session.transition(SessionState::Closed);
        }
        if was_publishing {
            self.ctx.events.session_ended(&self.session.id, &reason);
        }

        let _ = self.io.shutdown().await;
        tracing::info!(
            session_id = %self.session.id,
            state = %self.session.state(),
            %reason,
            bytes_received = self.stats.bytes_received(),
            "rtmp connection closed"
        );
        self.session.state()
    }
}
