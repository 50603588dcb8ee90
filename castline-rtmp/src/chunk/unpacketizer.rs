use {
    super::{
        define::{self, chunk_type},
        errors::{UnpackError, UnpackErrorValue},
        ChunkBasicHeader, ChunkInfo, ChunkMessageHeader, ExtendTimestampType,
    },
    crate::bytesio::bytes_reader::BytesReader,
    byteorder::{BigEndian, ByteOrder, LittleEndian},
    bytes::BytesMut,
    std::{cmp::min, collections::HashMap},
};

/// Upper bound on a single reassembled message.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
/// Chunk streams tracked at once before idle ones are dropped.
const MAX_CACHED_CHUNK_STREAMS: usize = 256;

#[derive(Eq, PartialEq, Debug)]
pub enum UnpackResult {
    /// A complete message was reassembled.
    ChunkInfo(ChunkInfo),
    /// One chunk was consumed; its message is still incomplete.
    Success,
    /// The buffer does not yet hold a whole chunk. Nothing was consumed.
    NotEnoughBytes,
}

#[derive(Debug, Default)]
struct ChunkStreamState {
    header: ChunkMessageHeader,
    /// Bytes of the message currently being reassembled.
    payload: BytesMut,
}

/// Header fields decoded from the buffer but not yet committed.
struct ParsedChunk {
    basic_header: ChunkBasicHeader,
    header: ChunkMessageHeader,
    starts_message: bool,
    header_len: usize,
}

/// Reassembles RTMP messages out of an inbound chunk stream.
///
/// Chunks are decoded only once fully buffered, so a short read never
/// leaves the per-stream state half updated.
pub struct ChunkUnpacketizer {
    reader: BytesReader,
    chunk_streams: HashMap<u32, ChunkStreamState>,
    max_chunk_size: usize,
}

impl Default for ChunkUnpacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkUnpacketizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reader: BytesReader::new(BytesMut::new()),
            chunk_streams: HashMap::new(),
            max_chunk_size: define::INIT_CHUNK_SIZE as usize,
        }
    }

    pub fn extend_data(&mut self, data: &[u8]) -> Result<(), UnpackError> {
        self.reader.extend_from_slice(data)?;
        Ok(())
    }

    /// Bytes buffered but not yet decoded.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.reader.len()
    }

    #[must_use]
    pub const fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Applies a peer SetChunkSize. Takes effect from the next chunk.
    pub fn update_max_chunk_size(&mut self, chunk_size: u32) -> Result<(), UnpackError> {
        if chunk_size == 0 || chunk_size > define::MAX_CHUNK_SIZE {
            return Err(UnpackErrorValue::InvalidChunkSize(chunk_size).into());
        }
        tracing::debug!(chunk_size, "inbound chunk size updated");
        self.max_chunk_size = chunk_size as usize;
        Ok(())
    }

    /// Drops the partial message on `csid` (Abort message).
    pub fn abort_chunk_stream(&mut self, csid: u32) {
        if let Some(state) = self.chunk_streams.get_mut(&csid) {
            state.payload.clear();
        }
    }

    /// Decodes chunks until one message completes or the buffer runs dry.
    ///
    /// Callers must handle each returned message before asking for the
    /// next one, so a SetChunkSize applies to the chunks that follow it.
    pub fn read_message(&mut self) -> Result<Option<ChunkInfo>, UnpackError> {
        loop {
            match self.read_chunk()? {
                UnpackResult::ChunkInfo(info) => return Ok(Some(info)),
                UnpackResult::Success => continue,
                UnpackResult::NotEnoughBytes => return Ok(None),
            }
        }
    }

    /// Decodes at most one chunk.
    pub fn read_chunk(&mut self) -> Result<UnpackResult, UnpackError> {
        let Some(parsed) = self.parse_headers()? else {
            return Ok(UnpackResult::NotEnoughBytes);
        };

        let csid = parsed.basic_header.chunk_stream_id;
        let msg_length = parsed.header.msg_length as usize;
        if msg_length > MAX_MESSAGE_SIZE {
            return Err(UnpackErrorValue::MessageTooLarge(msg_length, MAX_MESSAGE_SIZE).into());
        }

        let already = if parsed.starts_message {
            0
        } else {
            self.chunk_streams
                .get(&csid)
                .map_or(0, |state| state.payload.len())
        };
        let body_len = min(self.max_chunk_size, msg_length.saturating_sub(already));

        if self.reader.len() < parsed.header_len + body_len {
            return Ok(UnpackResult::NotEnoughBytes);
        }

        self.reader.advance_bytes(parsed.header_len)?;
        let body = self.reader.read_bytes(body_len)?;

        if !self.chunk_streams.contains_key(&csid) {
            self.prune_idle_streams();
        }
        let state = self.chunk_streams.entry(csid).or_default();
        if parsed.starts_message {
            if !state.payload.is_empty() {
                tracing::warn!(
                    csid,
                    discarded = state.payload.len(),
                    "new message header interrupted a partial message"
                );
                state.payload.clear();
            }
            state.payload.reserve(msg_length);
        }
        state.header = parsed.header;
        state.payload.extend_from_slice(&body);

        if state.payload.len() < msg_length {
            return Ok(UnpackResult::Success);
        }

        let payload = state.payload.split();
        Ok(UnpackResult::ChunkInfo(ChunkInfo {
            basic_header: parsed.basic_header,
            message_header: state.header.clone(),
            payload,
        }))
    }

    /// Decodes the basic header, message header and extended timestamp of
    /// the next chunk without consuming anything.
    fn parse_headers(&self) -> Result<Option<ParsedChunk>, UnpackError> {
        let buf = self.reader.remaining();
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        let format = first >> 6;
        let (csid, mut pos) = match first & 0x3f {
            0 => match buf.get(1) {
                Some(&b1) => (64 + u32::from(b1), 2),
                None => return Ok(None),
            },
            1 => match (buf.get(1), buf.get(2)) {
                (Some(&b1), Some(&b2)) => (64 + u32::from(b1) + u32::from(b2) * 256, 3),
                _ => return Ok(None),
            },
            id => (u32::from(id), 1),
        };

        let previous = self.chunk_streams.get(&csid).map(|state| &state.header);
        let mut header = match (format, previous) {
            (chunk_type::TYPE_0, _) => ChunkMessageHeader::default(),
            (_, Some(previous)) => previous.clone(),
            (_, None) => {
                return Err(UnpackErrorValue::MissingPreviousHeader { csid, format }.into());
            }
        };
        let in_progress = self
            .chunk_streams
            .get(&csid)
            .is_some_and(|state| !state.payload.is_empty());

        let header_size = match format {
            chunk_type::TYPE_0 => 11,
            chunk_type::TYPE_1 => 7,
            chunk_type::TYPE_2 => 3,
            _ => 0,
        };
        let Some(fields) = buf.get(pos..pos + header_size) else {
            return Ok(None);
        };
        pos += header_size;

        let mut time_field = 0;
        if format <= chunk_type::TYPE_2 {
            time_field = BigEndian::read_u24(&fields[0..3]);
            header.extended_timestamp_type = if time_field == define::EXTENDED_TIMESTAMP_SENTINEL {
                if format == chunk_type::TYPE_0 {
                    ExtendTimestampType::FORMAT0
                } else {
                    ExtendTimestampType::FORMAT12
                }
            } else {
                ExtendTimestampType::NONE
            };
        }
        if format <= chunk_type::TYPE_1 {
            header.msg_length = BigEndian::read_u24(&fields[3..6]);
            header.msg_type_id = fields[6];
        }
        if format == chunk_type::TYPE_0 {
            header.msg_stream_id = LittleEndian::read_u32(&fields[7..11]);
        }

        if header.extended_timestamp_type != ExtendTimestampType::NONE {
            let Some(extended) = buf.get(pos..pos + 4) else {
                return Ok(None);
            };
            pos += 4;
            // Type-3 chunks repeat the value of the header they inherit from.
            if format != chunk_type::TYPE_3 {
                time_field = BigEndian::read_u32(extended);
            }
        }

        let starts_message = format != chunk_type::TYPE_3 || !in_progress;
        match format {
            chunk_type::TYPE_0 => {
                header.timestamp = time_field;
                header.timestamp_delta = 0;
            }
            chunk_type::TYPE_1 | chunk_type::TYPE_2 => {
                header.timestamp_delta = time_field;
                header.timestamp = header.timestamp.wrapping_add(time_field);
            }
            _ => {
                if starts_message {
                    header.timestamp = header.timestamp.wrapping_add(header.timestamp_delta);
                }
            }
        }

        Ok(Some(ParsedChunk {
            basic_header: ChunkBasicHeader::new(format, csid),
            header,
            starts_message,
            header_len: pos,
        }))
    }

    fn prune_idle_streams(&mut self) {
        if self.chunk_streams.len() < MAX_CACHED_CHUNK_STREAMS {
            return;
        }
        let before = self.chunk_streams.len();
        self.chunk_streams.retain(|_, state| !state.payload.is_empty());
        tracing::debug!(
            before,
            after = self.chunk_streams.len(),
            "pruned idle chunk streams"
        );
    }
}
