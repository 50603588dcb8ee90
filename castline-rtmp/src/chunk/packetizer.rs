use {
    super::{
        define::{self, chunk_type},
        errors::{PackError, PackErrorValue},
        ChunkInfo,
    },
    crate::bytesio::bytes_writer::BytesWriter,
    byteorder::{BigEndian, LittleEndian},
    bytes::BytesMut,
};

/// Splits outbound messages into chunks.
///
/// Every message is written as one type-0 chunk followed by type-3
/// continuations, which keeps the server side free of per-stream
/// compression state.
pub struct ChunkPacketizer {
    max_chunk_size: usize,
    writer: BytesWriter,
}

impl Default for ChunkPacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkPacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_chunk_size: define::INIT_CHUNK_SIZE as usize,
            writer: BytesWriter::new(),
        }
    }

    pub fn update_max_chunk_size(&mut self, chunk_size: u32) {
        self.max_chunk_size = chunk_size.max(1) as usize;
    }

    fn write_basic_header(&mut self, format: u8, csid: u32) -> Result<(), PackError> {
        match csid {
            2..=63 => self.writer.write_u8((format << 6) | csid as u8)?,
            64..=319 => {
                self.writer.write_u8(format << 6)?;
                self.writer.write_u8((csid - 64) as u8)?;
            }
            320..=define::MAX_CHUNK_STREAM_ID => {
                let id = csid - 64;
                self.writer.write_u8((format << 6) | 1)?;
                self.writer.write_u8((id & 0xff) as u8)?;
                self.writer.write_u8((id >> 8) as u8)?;
            }
            _ => return Err(PackErrorValue::InvalidChunkStreamId(csid).into()),
        }
        Ok(())
    }

    /// Serialises one complete message into wire chunks.
    pub fn write_chunk(&mut self, chunk_info: &ChunkInfo) -> Result<BytesMut, PackError> {
        let csid = chunk_info.basic_header.chunk_stream_id;
        let header = &chunk_info.message_header;
        let payload = &chunk_info.payload[..];
        if payload.len() > define::EXTENDED_TIMESTAMP_SENTINEL as usize {
            return Err(PackErrorValue::MessageTooLong(payload.len()).into());
        }

        let extended = header.timestamp >= define::EXTENDED_TIMESTAMP_SENTINEL;

        self.write_basic_header(chunk_type::TYPE_0, csid)?;
        self.writer.write_u24::<BigEndian>(if extended {
            define::EXTENDED_TIMESTAMP_SENTINEL
        } else {
            header.timestamp
        })?;
        self.writer.write_u24::<BigEndian>(payload.len() as u32)?;
        self.writer.write_u8(header.msg_type_id)?;
        self.writer.write_u32::<LittleEndian>(header.msg_stream_id)?;
        if extended {
            self.writer.write_u32::<BigEndian>(header.timestamp)?;
        }

        let mut pieces = payload.chunks(self.max_chunk_size);
        if let Some(first) = pieces.next() {
            self.writer.write(first)?;
        }
        for piece in pieces {
            self.write_basic_header(chunk_type::TYPE_3, csid)?;
            if extended {
                self.writer.write_u32::<BigEndian>(header.timestamp)?;
            }
            self.writer.write(piece)?;
        }

        Ok(self.writer.extract_current_bytes())
    }
}
