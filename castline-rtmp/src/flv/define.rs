pub mod tag_type {
    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;
    pub const SCRIPT_DATA_AMF: u8 = 18;
}

/// `FLV`, version 1, audio and video present, 9-byte header.
pub const FLV_HEADER: [u8; 9] = [0x46, 0x4c, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x09];
pub const TAG_HEADER_LENGTH: usize = 11;

pub mod codec_id {
    pub const AVC: u8 = 7;
    pub const HEVC: u8 = 12;
    pub const AAC: u8 = 10;
}

pub mod frame_type {
    pub const KEY_FRAME: u8 = 1;
    pub const INTER_FRAME: u8 = 2;
}

/// Packet type byte that marks an AVC/AAC sequence header.
pub const SEQUENCE_HEADER: u8 = 0;
