use {
    super::{
        define::{msg_type_id, RtmpMessage},
        errors::{MessageError, MessageErrorValue},
    },
    crate::{
        amf0::{amf0_reader::Amf0Reader, Amf0ValueType},
        bytesio::bytes_reader::BytesReader,
        chunk::ChunkInfo,
    },
    byteorder::BigEndian,
    bytes::BytesMut,
};

pub struct MessageParser {
    chunk_info: ChunkInfo,
}

impl MessageParser {
    #[must_use]
    pub const fn new(chunk_info: ChunkInfo) -> Self {
        Self { chunk_info }
    }

    pub fn parse(self) -> Result<RtmpMessage, MessageError> {
        let header = self.chunk_info.message_header;
        let mut reader = BytesReader::new(self.chunk_info.payload);

        let message = match header.msg_type_id {
            msg_type_id::SET_CHUNK_SIZE => RtmpMessage::SetChunkSize {
                // The top bit is reserved and must be ignored.
                chunk_size: reader.read_u32::<BigEndian>()? & 0x7FFF_FFFF,
            },
            msg_type_id::ABORT => RtmpMessage::AbortMessage {
                chunk_stream_id: reader.read_u32::<BigEndian>()?,
            },
            msg_type_id::ACKNOWLEDGEMENT => RtmpMessage::Acknowledgement {
                sequence_number: reader.read_u32::<BigEndian>()?,
            },
            msg_type_id::USER_CONTROL_EVENT => RtmpMessage::UserControl {
                event_type: reader.read_u16::<BigEndian>()?,
                event_data: reader.extract_remaining_bytes(),
            },
            msg_type_id::WIN_ACK_SIZE => RtmpMessage::WindowAcknowledgementSize {
                size: reader.read_u32::<BigEndian>()?,
            },
            msg_type_id::SET_PEER_BANDWIDTH => RtmpMessage::SetPeerBandwidth {
                size: reader.read_u32::<BigEndian>()?,
                limit_type: reader.read_u8()?,
            },
            msg_type_id::AUDIO => RtmpMessage::Audio {
                data: reader.extract_remaining_bytes(),
                timestamp: header.timestamp,
            },
            msg_type_id::VIDEO => RtmpMessage::Video {
                data: reader.extract_remaining_bytes(),
                timestamp: header.timestamp,
            },
            msg_type_id::COMMAND_AMF3 => {
                // AMF3 command bodies lead with a format byte, then AMF0.
                reader.advance_bytes(1)?;
                parse_command(reader.extract_remaining_bytes())?
            }
            msg_type_id::COMMAND_AMF0 => parse_command(reader.extract_remaining_bytes())?,
            msg_type_id::DATA_AMF3 => {
                reader.advance_bytes(1)?;
                RtmpMessage::Amf0Data {
                    values: Amf0Reader::new(reader).read_all()?,
                }
            }
            msg_type_id::DATA_AMF0 => RtmpMessage::Amf0Data {
                values: Amf0Reader::new(reader).read_all()?,
            },
            other => RtmpMessage::Unknown { msg_type_id: other },
        };

        Ok(message)
    }
}

fn parse_command(payload: BytesMut) -> Result<RtmpMessage, MessageError> {
    let mut values = Amf0Reader::new(BytesReader::new(payload))
        .read_all()?
        .into_iter();

    let command_name = match values.next() {
        Some(Amf0ValueType::UTF8String(name) | Amf0ValueType::LongUTF8String(name)) => name,
        _ => return Err(MessageErrorValue::MissingCommandName.into()),
    };
    let Some(Amf0ValueType::Number(transaction_id)) = values.next() else {
        return Err(MessageErrorValue::MissingTransactionId(command_name).into());
    };
    let command_object = values.next().unwrap_or(Amf0ValueType::Null);

    Ok(RtmpMessage::Command {
        command_name,
        transaction_id,
        command_object,
        others: values.collect(),
    })
}
