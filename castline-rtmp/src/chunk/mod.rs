pub mod define;
pub mod errors;
pub mod packetizer;
pub mod unpacketizer;

use bytes::BytesMut;

pub use packetizer::ChunkPacketizer;
pub use unpacketizer::ChunkUnpacketizer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkBasicHeader {
    pub format: u8,
    pub chunk_stream_id: u32,
}

impl ChunkBasicHeader {
    #[must_use]
    pub const fn new(format: u8, chunk_stream_id: u32) -> Self {
        Self {
            format,
            chunk_stream_id,
        }
    }
}

/// Which header field the extended timestamp replaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtendTimestampType {
    #[default]
    NONE,
    /// Absolute timestamp of a type-0 header.
    FORMAT0,
    /// Timestamp delta of a type-1 or type-2 header.
    FORMAT12,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkMessageHeader {
    /// Absolute timestamp of the message, already resolved from deltas.
    pub timestamp: u32,
    pub timestamp_delta: u32,
    pub msg_length: u32,
    pub msg_type_id: u8,
    pub msg_stream_id: u32,
    pub extended_timestamp_type: ExtendTimestampType,
}

/// One logical RTMP message, reassembled from its chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkInfo {
    pub basic_header: ChunkBasicHeader,
    pub message_header: ChunkMessageHeader,
    pub payload: BytesMut,
}

impl ChunkInfo {
    #[must_use]
    pub fn new(
        csid: u32,
        format: u8,
        timestamp: u32,
        msg_length: u32,
        msg_type_id: u8,
        msg_stream_id: u32,
        payload: BytesMut,
    ) -> Self {
        Self {
            basic_header: ChunkBasicHeader::new(format, csid),
            message_header: ChunkMessageHeader {
                timestamp,
                timestamp_delta: 0,
                msg_length,
                msg_type_id,
                msg_stream_id,
                extended_timestamp_type: ExtendTimestampType::NONE,
            },
            payload,
        }
    }
}
