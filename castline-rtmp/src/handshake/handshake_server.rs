use {
    super::{
        define::{
            ServerHandshakeState, RTMP_HANDSHAKE_RANDOM_OFFSET, RTMP_HANDSHAKE_SIZE, RTMP_VERSION,
        },
        errors::{HandshakeError, HandshakeErrorValue},
    },
    crate::bytesio::{bytes_reader::BytesReader, bytes_writer::BytesWriter},
    bytes::BytesMut,
    rand::Rng,
    std::time::{Duration, SystemTime, UNIX_EPOCH},
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
        time,
    },
};

/// Server side of the simple RTMP handshake, free of IO.
///
/// Feed received bytes with [`extend_data`](Self::extend_data), call
/// [`handshake`](Self::handshake) to advance, and flush whatever
/// [`extract_pending_output`](Self::extract_pending_output) returns.
///
/// ```text
///  client                      server
///    | ---- C0 + C1 ------------> |
///    | <--- S0 + S1 + S2 -------- |   S2 echoes C1 verbatim
///    | ---- C2 -----------------> |   C2 must echo S1
/// ```
pub struct HandshakeServer {
    reader: BytesReader,
    writer: BytesWriter,
    s1: Vec<u8>,
    c1: BytesMut,
    state: ServerHandshakeState,
}

impl Default for HandshakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeServer {
    #[must_use]
    pub fn new() -> Self {
        let mut s1 = vec![0u8; RTMP_HANDSHAKE_SIZE];
        let uptime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u32)
            .unwrap_or_default();
        s1[..4].copy_from_slice(&uptime.to_be_bytes());
        rand::thread_rng().fill(&mut s1[RTMP_HANDSHAKE_RANDOM_OFFSET..]);

        Self {
            reader: BytesReader::default(),
            writer: BytesWriter::with_capacity(1 + 2 * RTMP_HANDSHAKE_SIZE),
            s1,
            c1: BytesMut::new(),
            state: ServerHandshakeState::ReadC0C1,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ServerHandshakeState {
        self.state
    }

    pub fn extend_data(&mut self, data: &[u8]) -> Result<(), HandshakeError> {
        self.reader.extend_from_slice(data)?;
        Ok(())
    }

    /// Bytes that must be sent to the client.
    pub fn extract_pending_output(&mut self) -> BytesMut {
        self.writer.extract_current_bytes()
    }

    /// Bytes received after C2; they belong to the chunk stream.
    pub fn extract_remaining_bytes(&mut self) -> BytesMut {
        self.reader.extract_remaining_bytes()
    }

    /// Advance as far as the buffered input allows.
    pub fn handshake(&mut self) -> Result<ServerHandshakeState, HandshakeError> {
        loop {
            match self.state {
                ServerHandshakeState::ReadC0C1 => {
                    // Reject a bad C0 without waiting for C1.
                    if !self.reader.is_empty() {
                        self.check_c0()?;
                    }
                    if self.reader.len() < 1 + RTMP_HANDSHAKE_SIZE {
                        break;
                    }
                    self.reader.advance_bytes(1)?;
                    self.c1 = self.reader.read_bytes(RTMP_HANDSHAKE_SIZE)?;
                    self.state = ServerHandshakeState::WriteS0S1S2;
                }
                ServerHandshakeState::WriteS0S1S2 => {
                    self.writer.write_u8(RTMP_VERSION)?;
                    self.writer.write(&self.s1)?;
                    self.write_s2()?;
                    self.state = ServerHandshakeState::ReadC2;
                }
                ServerHandshakeState::ReadC2 => {
                    if self.reader.len() < RTMP_HANDSHAKE_SIZE {
                        break;
                    }
                    let c2 = self.reader.read_bytes(RTMP_HANDSHAKE_SIZE)?;
                    self.check_c2(&c2)?;
                    self.state = ServerHandshakeState::Finish;
                }
                ServerHandshakeState::Finish => break,
            }
        }

        Ok(self.state)
    }

    fn check_c0(&self) -> Result<(), HandshakeError> {
        let version = self.reader.peek_u8()?;
        if version != RTMP_VERSION {
            return Err(HandshakeErrorValue::UnsupportedVersion(version).into());
        }
        Ok(())
    }

    fn write_s2(&mut self) -> Result<(), HandshakeError> {
        self.writer.write(&self.c1)?;
        Ok(())
    }

    /// C2 must be a byte-exact echo of S1.
    fn check_c2(&self, c2: &[u8]) -> Result<(), HandshakeError> {
        if c2 != self.s1.as_slice() {
            return Err(HandshakeErrorValue::EchoMismatch.into());
        }
        Ok(())
    }
}

/// Run the server handshake on `io`, bounded by `timeout`.
///
/// Returns any bytes the client sent past C2 so the caller can feed them to
/// the chunk layer.
pub async fn accept<S>(io: &mut S, timeout: Duration) -> Result<BytesMut, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match time::timeout(timeout, drive(io)).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeErrorValue::Timeout.into()),
    }
}

async fn drive<S>(io: &mut S) -> Result<BytesMut, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshaker = HandshakeServer::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = io.read(&mut buf).await?;
        if n == 0 {
            return Err(HandshakeErrorValue::PeerClosed.into());
        }
        handshaker.extend_data(&buf[..n])?;
        let state = handshaker.handshake()?;

        let output = handshaker.extract_pending_output();
        if !output.is_empty() {
            io.write_all(&output).await?;
            io.flush().await?;
        }

        if state == ServerHandshakeState::Finish {
            tracing::trace!("rtmp handshake finished");
            return Ok(handshaker.extract_remaining_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c0c1() -> Vec<u8> {
        let mut data = vec![RTMP_VERSION];
        data.extend((0..RTMP_HANDSHAKE_SIZE).map(|i| (i % 251) as u8));
        data
    }

    /// C2 echoes S1.
    fn c2_for(s0s1s2: &[u8]) -> Vec<u8> {
        s0s1s2[1..=RTMP_HANDSHAKE_SIZE].to_vec()
    }

    #[test]
    fn test_valid_handshake_leaves_no_bytes() {
        let mut server = HandshakeServer::new();
        server.extend_data(&c0c1()).unwrap();
        assert_eq!(server.handshake().unwrap(), ServerHandshakeState::ReadC2);

        let out = server.extract_pending_output();
        assert_eq!(out.len(), 1 + 2 * RTMP_HANDSHAKE_SIZE);
        assert_eq!(out[0], RTMP_VERSION);
        assert_eq!(&out[1 + RTMP_HANDSHAKE_SIZE..], &c0c1()[1..]);

        server.extend_data(&c2_for(&out)).unwrap();
        assert_eq!(server.handshake().unwrap(), ServerHandshakeState::Finish);
        assert!(server.extract_remaining_bytes().is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut server = HandshakeServer::new();
        let mut out = BytesMut::new();
        for byte in c0c1() {
            server.extend_data(&[byte]).unwrap();
            server.handshake().unwrap();
            out.extend_from_slice(&server.extract_pending_output());
        }
        assert_eq!(server.state(), ServerHandshakeState::ReadC2);
        for byte in c2_for(&out) {
            server.extend_data(&[byte]).unwrap();
            server.handshake().unwrap();
        }
        assert_eq!(server.state(), ServerHandshakeState::Finish);
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut data = c0c1();
        data[0] = 6;
        let mut server = HandshakeServer::new();
        server.extend_data(&data).unwrap();
        let err = server.handshake().unwrap_err();
        assert!(matches!(err.value, HandshakeErrorValue::UnsupportedVersion(6)));
    }

    #[test]
    fn test_mismatched_echo_rejected() {
        let mut server = HandshakeServer::new();
        server.extend_data(&c0c1()).unwrap();
        server.handshake().unwrap();
        let out = server.extract_pending_output();

        let mut c2 = c2_for(&out);
        c2[RTMP_HANDSHAKE_SIZE - 1] ^= 0xFF;
        server.extend_data(&c2).unwrap();
        let err = server.handshake().unwrap_err();
        assert!(matches!(err.value, HandshakeErrorValue::EchoMismatch));
    }

    #[test]
    fn test_echo_with_altered_time2_rejected() {
        let mut server = HandshakeServer::new();
        server.extend_data(&c0c1()).unwrap();
        server.handshake().unwrap();
        let out = server.extract_pending_output();

        let mut c2 = c2_for(&out);
        c2[4..8].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        server.extend_data(&c2).unwrap();
        let err = server.handshake().unwrap_err();
        assert!(matches!(err.value, HandshakeErrorValue::EchoMismatch));
    }

    #[test]
    fn test_bytes_after_c2_are_kept() {
        let mut server = HandshakeServer::new();
        server.extend_data(&c0c1()).unwrap();
        server.handshake().unwrap();
        let out = server.extract_pending_output();

        let mut c2 = c2_for(&out);
        c2.extend_from_slice(&[0x03, 0xAA]);
        server.extend_data(&c2).unwrap();
        server.handshake().unwrap();
        assert_eq!(&server.extract_remaining_bytes()[..], &[0x03, 0xAA]);
    }

    #[tokio::test]
    async fn test_accept_times_out_on_truncated_c1() {
        let (mut client, mut server) = tokio::io::duplex(8192);
        client.write_all(&c0c1()[..100]).await.unwrap();

        let err = accept(&mut server, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err.value, HandshakeErrorValue::Timeout));
    }

    #[tokio::test]
    async fn test_accept_full_exchange() {
        let (mut client, mut server) = tokio::io::duplex(16384);

        let server_task =
            tokio::spawn(async move { accept(&mut server, Duration::from_secs(5)).await });

        client.write_all(&c0c1()).await.unwrap();
        let mut s0s1s2 = vec![0u8; 1 + 2 * RTMP_HANDSHAKE_SIZE];
        client.read_exact(&mut s0s1s2).await.unwrap();
        client.write_all(&c2_for(&s0s1s2)).await.unwrap();

        let leftover = server_task.await.unwrap().unwrap();
        assert!(leftover.is_empty());
    }
}
