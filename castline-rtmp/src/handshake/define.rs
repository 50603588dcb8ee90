pub const RTMP_VERSION: u8 = 3;
pub const RTMP_HANDSHAKE_SIZE: usize = 1536;

/// Offset of the random block inside C1/S1/C2/S2: 4 bytes time, 4 bytes zero/time2.
pub const RTMP_HANDSHAKE_RANDOM_OFFSET: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServerHandshakeState {
    ReadC0C1,
    WriteS0S1S2,
    ReadC2,
    Finish,
}
