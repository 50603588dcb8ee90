use {
    super::{
        define::{self, status_code, status_level},
        errors::NetConnectionError,
    },
    crate::{
        amf0::{amf0_writer::Amf0Writer, Amf0ValueType},
        bytesio::bytes_writer::BytesWriter,
        chunk::{define::csid_type, ChunkInfo, ChunkPacketizer},
        messages::define::{msg_type_id, user_control_event_type},
    },
    byteorder::BigEndian,
    bytes::BytesMut,
    indexmap::IndexMap,
};

/// Builds server-to-client control and command messages and chunks them
/// into a single outbound buffer.
#[derive(Default)]
pub struct ResponseWriter {
    packetizer: ChunkPacketizer,
    output: BytesMut,
}

impl ResponseWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes everything written so far.
    pub fn extract_output(&mut self) -> BytesMut {
        self.output.split()
    }

    #[must_use]
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    fn push(
        &mut self,
        csid: u32,
        msg_type_id: u8,
        msg_stream_id: u32,
        payload: BytesMut,
    ) -> Result<(), NetConnectionError> {
        let info = ChunkInfo::new(
            csid,
            0,
            0,
            payload.len() as u32,
            msg_type_id,
            msg_stream_id,
            payload,
        );
        let chunks = self.packetizer.write_chunk(&info)?;
        self.output.extend_from_slice(&chunks);
        Ok(())
    }

    fn push_control(&mut self, msg_type_id: u8, value: u32) -> Result<(), NetConnectionError> {
        let mut writer = BytesWriter::with_capacity(4);
        writer.write_u32::<BigEndian>(value)?;
        self.push(
            csid_type::PROTOCOL_USER_CONTROL,
            msg_type_id,
            0,
            writer.extract_current_bytes(),
        )
    }

    /// Announces our chunk size and switches the packetizer to it.
    pub fn write_set_chunk_size(&mut self, chunk_size: u32) -> Result<(), NetConnectionError> {
        self.push_control(msg_type_id::SET_CHUNK_SIZE, chunk_size)?;
        self.packetizer.update_max_chunk_size(chunk_size);
        Ok(())
    }

    pub fn write_window_acknowledgement_size(&mut self, size: u32) -> Result<(), NetConnectionError> {
        self.push_control(msg_type_id::WIN_ACK_SIZE, size)
    }

    pub fn write_acknowledgement(&mut self, sequence_number: u32) -> Result<(), NetConnectionError> {
        self.push_control(msg_type_id::ACKNOWLEDGEMENT, sequence_number)
    }

    pub fn write_set_peer_bandwidth(
        &mut self,
        size: u32,
        limit_type: u8,
    ) -> Result<(), NetConnectionError> {
        let mut writer = BytesWriter::with_capacity(5);
        writer.write_u32::<BigEndian>(size)?;
        writer.write_u8(limit_type)?;
        self.push(
            csid_type::PROTOCOL_USER_CONTROL,
            msg_type_id::SET_PEER_BANDWIDTH,
            0,
            writer.extract_current_bytes(),
        )
    }

    pub fn write_stream_begin(&mut self, stream_id: u32) -> Result<(), NetConnectionError> {
        let mut writer = BytesWriter::with_capacity(6);
        writer.write_u16::<BigEndian>(user_control_event_type::STREAM_BEGIN)?;
        writer.write_u32::<BigEndian>(stream_id)?;
        self.push(
            csid_type::PROTOCOL_USER_CONTROL,
            msg_type_id::USER_CONTROL_EVENT,
            0,
            writer.extract_current_bytes(),
        )
    }

    fn push_command(
        &mut self,
        msg_stream_id: u32,
        values: &[Amf0ValueType],
    ) -> Result<(), NetConnectionError> {
        let mut writer = Amf0Writer::new();
        writer.write_anys(values)?;
        self.push(
            csid_type::COMMAND_AMF0_AMF3,
            msg_type_id::COMMAND_AMF0,
            msg_stream_id,
            writer.extract_current_bytes(),
        )
    }

    pub fn write_connect_result(
        &mut self,
        transaction_id: f64,
        object_encoding: f64,
    ) -> Result<(), NetConnectionError> {
        let mut properties = IndexMap::new();
        properties.insert(
            "fmsVer".to_string(),
            Amf0ValueType::UTF8String(define::FMS_VERSION.to_string()),
        );
        properties.insert(
            "capabilities".to_string(),
            Amf0ValueType::Number(define::CAPABILITIES),
        );

        let mut information = status_object(
            status_level::STATUS,
            status_code::CONNECT_SUCCESS,
            "Connection succeeded.",
        );
        information.insert(
            "objectEncoding".to_string(),
            Amf0ValueType::Number(object_encoding),
        );

        self.push_command(
            0,
            &[
                Amf0ValueType::UTF8String("_result".to_string()),
                Amf0ValueType::Number(transaction_id),
                Amf0ValueType::Object(properties),
                Amf0ValueType::Object(information),
            ],
        )
    }

    pub fn write_create_stream_result(
        &mut self,
        transaction_id: f64,
        stream_id: u32,
    ) -> Result<(), NetConnectionError> {
        self.push_command(
            0,
            &[
                Amf0ValueType::UTF8String("_result".to_string()),
                Amf0ValueType::Number(transaction_id),
                Amf0ValueType::Null,
                Amf0ValueType::Number(f64::from(stream_id)),
            ],
        )
    }

    /// Bare `_result` used to acknowledge `releaseStream` and `FCPublish`.
    pub fn write_empty_result(&mut self, transaction_id: f64) -> Result<(), NetConnectionError> {
        self.push_command(
            0,
            &[
                Amf0ValueType::UTF8String("_result".to_string()),
                Amf0ValueType::Number(transaction_id),
                Amf0ValueType::Null,
                Amf0ValueType::Undefined,
            ],
        )
    }

    pub fn write_on_fc_publish(
        &mut self,
        code: &str,
        description: &str,
    ) -> Result<(), NetConnectionError> {
        self.push_command(
            0,
            &[
                Amf0ValueType::UTF8String("onFCPublish".to_string()),
                Amf0ValueType::Number(0.0),
                Amf0ValueType::Null,
                Amf0ValueType::Object(status_object(status_level::STATUS, code, description)),
            ],
        )
    }

    pub fn write_on_status(
        &mut self,
        stream_id: u32,
        level: &str,
        code: &str,
        description: &str,
    ) -> Result<(), NetConnectionError> {
        self.push_command(
            stream_id,
            &[
                Amf0ValueType::UTF8String("onStatus".to_string()),
                Amf0ValueType::Number(0.0),
                Amf0ValueType::Null,
                Amf0ValueType::Object(status_object(level, code, description)),
            ],
        )
    }
}

fn status_object(level: &str, code: &str, description: &str) -> IndexMap<String, Amf0ValueType> {
    let mut properties = IndexMap::new();
    properties.insert(
        "level".to_string(),
        Amf0ValueType::UTF8String(level.to_string()),
    );
    properties.insert("code".to_string(), Amf0ValueType::UTF8String(code.to_string()));
    properties.insert(
        "description".to_string(),
        Amf0ValueType::UTF8String(description.to_string()),
    );
    properties
}
