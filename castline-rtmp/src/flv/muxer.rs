use {
    super::{
        define::{self, codec_id, frame_type, tag_type},
        errors::{FlvMuxerError, FlvMuxerErrorValue},
    },
    crate::bytesio::bytes_writer::BytesWriter,
    byteorder::BigEndian,
    bytes::{Bytes, BytesMut},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
    Script,
}

impl MediaKind {
    #[must_use]
    pub const fn tag_type(self) -> u8 {
        match self {
            Self::Audio => tag_type::AUDIO,
            Self::Video => tag_type::VIDEO,
            Self::Script => tag_type::SCRIPT_DATA_AMF,
        }
    }
}

/// One FLV tag body with its kind and timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    pub kind: MediaKind,
    pub timestamp: u32,
    pub data: Bytes,
}

impl FlvTag {
    #[must_use]
    pub const fn new(kind: MediaKind, timestamp: u32, data: Bytes) -> Self {
        Self {
            kind,
            timestamp,
            data,
        }
    }

    /// Codec configuration a decoder needs before any frame: AVC/HEVC
    /// decoder configuration record, AAC audio specific config, or script
    /// metadata.
    #[must_use]
    pub fn is_sequence_header(&self) -> bool {
        match self.kind {
            MediaKind::Video => {
                self.data.len() >= 2
                    && matches!(self.data[0] & 0x0f, codec_id::AVC | codec_id::HEVC)
                    && self.data[1] == define::SEQUENCE_HEADER
            }
            MediaKind::Audio => {
                self.data.len() >= 2
                    && self.data[0] >> 4 == codec_id::AAC
                    && self.data[1] == define::SEQUENCE_HEADER
            }
            MediaKind::Script => true,
        }
    }

    #[must_use]
    pub fn is_key_frame(&self) -> bool {
        self.kind == MediaKind::Video
            && self
                .data
                .first()
                .is_some_and(|b| b >> 4 == frame_type::KEY_FRAME)
    }
}

/// Serialises tags into an FLV byte stream.
#[derive(Default)]
pub struct FlvMuxer {
    writer: BytesWriter,
}

impl FlvMuxer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// File header followed by the zero PreviousTagSize0.
    pub fn write_flv_header(&mut self) -> Result<(), FlvMuxerError> {
        self.writer.write(&define::FLV_HEADER)?;
        self.writer.write_u32::<BigEndian>(0)?;
        Ok(())
    }

    pub fn write_tag(&mut self, tag: &FlvTag) -> Result<(), FlvMuxerError> {
        let data_size = u32::try_from(tag.data.len())
            .ok()
            .filter(|size| *size <= 0x00FF_FFFF)
            .ok_or(FlvMuxerErrorValue::TagTooLarge(tag.data.len()))?;

        self.writer.write_u8(tag.kind.tag_type())?;
        self.writer.write_u24::<BigEndian>(data_size)?;
        self.writer
            .write_u24::<BigEndian>(tag.timestamp & 0x00FF_FFFF)?;
        self.writer.write_u8((tag.timestamp >> 24) as u8)?;
        // stream id, always zero
        self.writer.write_u24::<BigEndian>(0)?;
        self.writer.write(&tag.data)?;
        self.writer
            .write_u32::<BigEndian>(data_size + define::TAG_HEADER_LENGTH as u32)?;
        Ok(())
    }

    pub fn extract_current_bytes(&mut self) -> BytesMut {
        self.writer.extract_current_bytes()
    }
}
