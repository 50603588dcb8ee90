// Shared harness for the ingest integration tests: an in-process server
// plus a minimal RTMP publisher client.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use castline_ingest::analytics::{AnalyticsCollector, NoViewers, TracingMetricSink};
use castline_ingest::auth::{KeyAuthenticator, StaticKeyStore};
use castline_ingest::config::{ServerConfig, SessionConfig, StaticKeyConfig, TranscodeConfig};
use castline_ingest::events::{BroadcastSessionEvents, EndReason, StreamLifecycleEvent};
use castline_ingest::retry::RetryPolicy;
use castline_ingest::session::IngestContext;
use castline_ingest::transcoder::variant::default_variants;
use castline_ingest::transcoder::{
    EncoderLauncher, EncoderSpec, OutputRetention, TranscoderSupervisor,
};
use castline_ingest::IngestServer;
use castline_rtmp::amf0::{amf0_writer::Amf0Writer, Amf0ValueType};
use castline_rtmp::chunk::define::csid_type;
use castline_rtmp::chunk::{ChunkInfo, ChunkPacketizer, ChunkUnpacketizer};
use castline_rtmp::messages::define::msg_type_id;
use castline_rtmp::messages::{MessageParser, RtmpMessage};
use indexmap::IndexMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

pub const PUBLISH_START: &str = "NetStream.Publish.Start";

/// Runs `sh -c <script>` as the encoder, inside the job directory.
pub struct ShellLauncher(pub &'static str);

impl EncoderLauncher for ShellLauncher {
    fn launch(&self, spec: &EncoderSpec) -> std::io::Result<Child> {
        Command::new("sh")
            .arg("-c")
            .arg(self.0)
            .current_dir(&spec.job_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

pub struct HarnessOptions {
    pub encoder: &'static str,
    pub restart_budget: u32,
    pub session: SessionConfig,
    pub max_connections: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            encoder: "cat > /dev/null",
            restart_budget: 3,
            session: SessionConfig {
                handshake_timeout_ms: 2_000,
                auth_timeout_ms: 2_000,
                idle_timeout_ms: 5_000,
                ..SessionConfig::default()
            },
            max_connections: 16,
        }
    }
}

pub struct Harness {
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
    pub events: broadcast::Receiver<StreamLifecycleEvent>,
    pub authenticator: Arc<KeyAuthenticator>,
    pub supervisor: Arc<TranscoderSupervisor>,
    pub output_root: tempfile::TempDir,
    server: JoinHandle<()>,
}

impl Harness {
    pub async fn start(options: HarnessOptions) -> Self {
        let output_root = tempfile::tempdir().unwrap();

        let store = StaticKeyStore::from_config(&[
            StaticKeyConfig {
                key: "key123".to_string(),
                owner_id: "U1".to_string(),
                revoked: false,
            },
            StaticKeyConfig {
                key: "oldkey".to_string(),
                owner_id: "U2".to_string(),
                revoked: true,
            },
        ]);
        let authenticator = Arc::new(KeyAuthenticator::new(Arc::new(store)));

        let transcode = TranscodeConfig {
            output_root: output_root.path().to_path_buf(),
            restart_budget: options.restart_budget,
            restart_backoff_base_ms: 5,
            restart_backoff_max_ms: 50,
            stop_grace_ms: 1_000,
            ..TranscodeConfig::default()
        };
        let retention = Arc::new(OutputRetention::new(
            Duration::from_secs(60),
            Duration::from_secs(10),
        ));
        let supervisor = Arc::new(TranscoderSupervisor::new(
            transcode,
            Arc::new(ShellLauncher(options.encoder)),
            retention,
        ));

        let analytics = Arc::new(AnalyticsCollector::new(
            Arc::new(TracingMetricSink),
            Arc::new(NoViewers),
            Duration::from_millis(100),
            RetryPolicy::default(),
        ));
        let broadcast_events = BroadcastSessionEvents::new(64);
        let events = broadcast_events.subscribe();

        let ctx = Arc::new(IngestContext {
            authenticator: Arc::clone(&authenticator),
            supervisor: Arc::clone(&supervisor),
            analytics,
            events: Arc::new(broadcast_events),
            session: options.session,
            variants: default_variants(),
        });
        let server_config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            max_connections: options.max_connections,
            shutdown_grace_ms: 2_000,
        };

        let listener = IngestServer::bind(&server_config.listen_addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = IngestServer::new(ctx, &server_config);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let server = tokio::spawn(async move {
            server.serve(listener, token).await.unwrap();
        });

        Self {
            addr,
            cancel,
            events,
            authenticator,
            supervisor,
            output_root,
            server,
        }
    }

    pub async fn next_event(&mut self) -> StreamLifecycleEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a lifecycle event")
            .unwrap()
    }

    pub fn job_dir(&self, session_id: &str) -> PathBuf {
        self.output_root.path().join(session_id)
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.server).await.unwrap().unwrap();
    }
}

/// Minimal RTMP publisher.
pub struct TestClient {
    stream: TcpStream,
    packetizer: ChunkPacketizer,
    unpacketizer: ChunkUnpacketizer,
    next_transaction: f64,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::connect_raw(addr).await;
        client.handshake().await;
        client
    }

    pub async fn connect_raw(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            packetizer: ChunkPacketizer::new(),
            unpacketizer: ChunkUnpacketizer::new(),
            next_transaction: 1.0,
        }
    }

    pub async fn handshake(&mut self) {
        let mut c0c1 = vec![0u8; 1 + 1536];
        c0c1[0] = 3;
        for (i, b) in c0c1[9..].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        self.stream.write_all(&c0c1).await.unwrap();

        let mut s0s1s2 = vec![0u8; 1 + 2 * 1536];
        tokio::time::timeout(WAIT, self.stream.read_exact(&mut s0s1s2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s0s1s2[0], 3);
        let s1 = s0s1s2[1..1537].to_vec();
        self.stream.write_all(&s1).await.unwrap();
    }

    async fn send(&mut self, csid: u32, type_id: u8, stream_id: u32, timestamp: u32, payload: BytesMut) {
        let info = ChunkInfo::new(
            csid,
            0,
            timestamp,
            payload.len() as u32,
            type_id,
            stream_id,
            payload,
        );
        let bytes = self.packetizer.write_chunk(&info).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn send_command(&mut self, name: &str, command_object: Amf0ValueType, args: Vec<Amf0ValueType>) {
        let mut values = vec![
            Amf0ValueType::UTF8String(name.to_string()),
            Amf0ValueType::Number(self.next_transaction),
            command_object,
        ];
        values.extend(args);
        self.next_transaction += 1.0;

        let mut writer = Amf0Writer::new();
        writer.write_anys(&values).unwrap();
        let stream_id = u32::from(matches!(name, "publish" | "deleteStream" | "closeStream"));
        self.send(
            csid_type::COMMAND_AMF0_AMF3,
            msg_type_id::COMMAND_AMF0,
            stream_id,
            0,
            writer.extract_current_bytes(),
        )
        .await;
    }

    pub async fn rtmp_connect(&mut self) {
        let mut props = IndexMap::new();
        props.insert("app".to_string(), Amf0ValueType::UTF8String("live".to_string()));
        props.insert(
            "tcUrl".to_string(),
            Amf0ValueType::UTF8String("rtmp://localhost/live".to_string()),
        );
        self.send_command("connect", Amf0ValueType::Object(props), Vec::new())
            .await;
        let result = self.expect_command("_result").await;
        assert!(matches!(result, RtmpMessage::Command { .. }));
    }

    /// connect, releaseStream, FCPublish, createStream and publish, the
    /// way OBS sends them. Returns the onStatus code.
    pub async fn publish(&mut self, name: &str) -> String {
        self.rtmp_connect().await;
        let stream = Amf0ValueType::UTF8String(name.to_string());
        self.send_command("releaseStream", Amf0ValueType::Null, vec![stream.clone()])
            .await;
        self.send_command("FCPublish", Amf0ValueType::Null, vec![stream.clone()])
            .await;
        self.send_command("createStream", Amf0ValueType::Null, Vec::new())
            .await;
        self.send_command(
            "publish",
            Amf0ValueType::Null,
            vec![stream, Amf0ValueType::UTF8String("live".to_string())],
        )
        .await;
        self.expect_status().await
    }

    pub async fn send_metadata(&mut self) {
        let mut meta = IndexMap::new();
        meta.insert("width".to_string(), Amf0ValueType::Number(1280.0));
        meta.insert("height".to_string(), Amf0ValueType::Number(720.0));
        let mut writer = Amf0Writer::new();
        writer
            .write_anys(&[
                Amf0ValueType::UTF8String("@setDataFrame".to_string()),
                Amf0ValueType::UTF8String("onMetaData".to_string()),
                Amf0ValueType::EcmaArray(meta),
            ])
            .unwrap();
        self.send(csid_type::DATA_AMF0_AMF3, msg_type_id::DATA_AMF0, 1, 0, writer.extract_current_bytes())
            .await;
    }

    pub async fn send_video(&mut self, timestamp: u32, body: &[u8]) {
        self.send(csid_type::VIDEO, msg_type_id::VIDEO, 1, timestamp, BytesMut::from(body))
            .await;
    }

    pub async fn send_audio(&mut self, timestamp: u32, body: &[u8]) {
        self.send(csid_type::AUDIO, msg_type_id::AUDIO, 1, timestamp, BytesMut::from(body))
            .await;
    }

    /// Next message from the server, or None once the connection closes.
    pub async fn read_message(&mut self) -> Option<RtmpMessage> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(chunk) = self.unpacketizer.read_message().unwrap() {
                let message = MessageParser::new(chunk).parse().unwrap();
                if let RtmpMessage::SetChunkSize { chunk_size } = message {
                    self.unpacketizer.update_max_chunk_size(chunk_size).unwrap();
                }
                return Some(message);
            }
            let n = match tokio::time::timeout(WAIT, self.stream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(_)) => return None,
                Err(_) => panic!("timed out waiting for a server message"),
            };
            if n == 0 {
                return None;
            }
            self.unpacketizer.extend_data(&buf[..n]).unwrap();
        }
    }

    pub async fn expect_command(&mut self, name: &str) -> RtmpMessage {
        loop {
            match self.read_message().await {
                Some(message @ RtmpMessage::Command { .. }) => {
                    if let RtmpMessage::Command { command_name, .. } = &message {
                        if command_name == name {
                            return message;
                        }
                    }
                }
                Some(_) => {}
                None => panic!("connection closed before {name}"),
            }
        }
    }

    /// Code of the next onStatus message.
    pub async fn expect_status(&mut self) -> String {
        match self.expect_command("onStatus").await {
            RtmpMessage::Command { others, .. } => others
                .first()
                .and_then(Amf0ValueType::as_properties)
                .and_then(|info| info.get("code"))
                .and_then(Amf0ValueType::as_str)
                .unwrap()
                .to_string(),
            _ => unreachable!(),
        }
    }

    /// Drops the connection with a TCP reset instead of a FIN.
    #[allow(deprecated)]
    pub fn reset(self) {
        self.stream.set_linger(Some(Duration::ZERO)).unwrap();
    }

    /// Waits for the server to close the connection.
    pub async fn expect_closed(&mut self) {
        while self.read_message().await.is_some() {}
    }
}

/// AVC sequence header followed by a keyframe body.
pub const AVC_SEQUENCE_HEADER: &[u8] = &[0x17, 0x00, 0x00, 0x00, 0x00, 0x01, 0x64, 0x00, 0x1f];
pub const AVC_KEY_FRAME: &[u8] = &[0x17, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x65];
pub const AVC_INTER_FRAME: &[u8] = &[0x27, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x41];
pub const AAC_SEQUENCE_HEADER: &[u8] = &[0xaf, 0x00, 0x12, 0x10];
pub const AAC_RAW_FRAME: &[u8] = &[0xaf, 0x01, 0x21, 0x10, 0x04];

pub fn started(event: StreamLifecycleEvent) -> (String, String) {
    match event {
        StreamLifecycleEvent::Started {
            session_id,
            owner_id,
        } => (session_id, owner_id),
        other => panic!("expected Started, got {other:?}"),
    }
}

pub fn stopped(event: StreamLifecycleEvent) -> (String, EndReason) {
    match event {
        StreamLifecycleEvent::Stopped { session_id, reason } => (session_id, reason),
        other => panic!("expected Stopped, got {other:?}"),
    }
}

/// One tag read back from an encoder's captured stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedTag {
    pub tag_type: u8,
    pub timestamp: u32,
    pub data: Vec<u8>,
}

/// Splits an FLV stream into tags, ignoring a trailing partial tag.
pub fn parse_flv(bytes: &[u8]) -> Vec<CapturedTag> {
    assert_eq!(&bytes[..3], b"FLV");
    let mut tags = Vec::new();
    let mut pos = 13;
    while bytes.len() >= pos + 11 {
        let size = u32::from_be_bytes([0, bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        let end = pos + 11 + size + 4;
        if bytes.len() < end {
            break;
        }
        let timestamp =
            u32::from_be_bytes([bytes[pos + 7], bytes[pos + 4], bytes[pos + 5], bytes[pos + 6]]);
        let previous = u32::from_be_bytes(bytes[end - 4..end].try_into().unwrap()) as usize;
        assert_eq!(previous, size + 11, "bad PreviousTagSize after tag {}", tags.len());
        tags.push(CapturedTag {
            tag_type: bytes[pos],
            timestamp,
            data: bytes[pos + 11..pos + 11 + size].to_vec(),
        });
        pos = end;
    }
    tags
}

/// Polls `path` until it holds at least `count` complete tags.
pub async fn wait_for_tags(path: &Path, count: usize) -> Vec<CapturedTag> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Ok(bytes) = tokio::fs::read(path).await {
            if bytes.len() >= 13 {
                let tags = parse_flv(&bytes);
                if tags.len() >= count {
                    return tags;
                }
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} tags in {}",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
