pub const INIT_CHUNK_SIZE: u32 = 128;
/// Chunk size the server announces after `connect`.
pub const DEFAULT_OUT_CHUNK_SIZE: u32 = 4096;
/// The top bit of a SetChunkSize payload must be zero.
pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

/// Largest value the 24-bit timestamp field carries before switching to
/// the extended field.
pub const EXTENDED_TIMESTAMP_SENTINEL: u32 = 0x00FF_FFFF;

pub const MIN_CHUNK_STREAM_ID: u32 = 2;
pub const MAX_CHUNK_STREAM_ID: u32 = 65599;

pub mod csid_type {
    pub const PROTOCOL_USER_CONTROL: u32 = 2;
    pub const COMMAND_AMF0_AMF3: u32 = 3;
    pub const AUDIO: u32 = 4;
    pub const DATA_AMF0_AMF3: u32 = 5;
    pub const VIDEO: u32 = 6;
}

pub mod chunk_type {
    pub const TYPE_0: u8 = 0;
    pub const TYPE_1: u8 = 1;
    pub const TYPE_2: u8 = 2;
    pub const TYPE_3: u8 = 3;
}
