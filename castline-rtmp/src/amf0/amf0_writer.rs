use {
    super::{
        define::{amf0_markers, Amf0ValueType},
        errors::{Amf0WriteError, Amf0WriteErrorValue},
    },
    crate::bytesio::bytes_writer::BytesWriter,
    byteorder::BigEndian,
    bytes::BytesMut,
    indexmap::IndexMap,
};

#[derive(Default)]
pub struct Amf0Writer {
    writer: BytesWriter,
}

impl Amf0Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_anys(&mut self, values: &[Amf0ValueType]) -> Result<(), Amf0WriteError> {
        for val in values {
            self.write_any(val)?;
        }
        Ok(())
    }

    pub fn write_any(&mut self, value: &Amf0ValueType) -> Result<(), Amf0WriteError> {
        match value {
            Amf0ValueType::Number(val) => self.write_number(*val),
            Amf0ValueType::Boolean(val) => self.write_bool(*val),
            Amf0ValueType::UTF8String(val) | Amf0ValueType::LongUTF8String(val) => {
                self.write_string(val)
            }
            Amf0ValueType::Object(props) => self.write_object(props),
            Amf0ValueType::Null => self.write_null(),
            Amf0ValueType::Undefined => {
                self.writer.write_u8(amf0_markers::UNDEFINED)?;
                Ok(())
            }
            Amf0ValueType::EcmaArray(props) => {
                self.writer.write_u8(amf0_markers::ECMA_ARRAY)?;
                self.writer.write_u32::<BigEndian>(props.len() as u32)?;
                self.write_properties(props)
            }
            Amf0ValueType::StrictArray(values) => {
                self.writer.write_u8(amf0_markers::STRICT_ARRAY)?;
                self.writer.write_u32::<BigEndian>(values.len() as u32)?;
                self.write_anys(values)
            }
            Amf0ValueType::Date {
                unix_time_ms,
                time_zone,
            } => {
                self.writer.write_u8(amf0_markers::DATE)?;
                self.writer.write_f64::<BigEndian>(*unix_time_ms)?;
                self.writer.write_u16::<BigEndian>(*time_zone as u16)?;
                Ok(())
            }
            Amf0ValueType::END => self.write_eof(),
        }
    }

    pub fn write_number(&mut self, value: f64) -> Result<(), Amf0WriteError> {
        self.writer.write_u8(amf0_markers::NUMBER)?;
        self.writer.write_f64::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), Amf0WriteError> {
        self.writer.write_u8(amf0_markers::BOOLEAN)?;
        self.writer.write_u8(u8::from(value))?;
        Ok(())
    }

    /// Strings over 65535 bytes are written with the long-string marker.
    pub fn write_string(&mut self, value: &str) -> Result<(), Amf0WriteError> {
        if let Ok(len) = u16::try_from(value.len()) {
            self.writer.write_u8(amf0_markers::STRING)?;
            self.writer.write_u16::<BigEndian>(len)?;
        } else {
            self.writer.write_u8(amf0_markers::LONG_STRING)?;
            self.writer.write_u32::<BigEndian>(value.len() as u32)?;
        }
        self.writer.write(value.as_bytes())?;
        Ok(())
    }

    pub fn write_null(&mut self) -> Result<(), Amf0WriteError> {
        self.writer.write_u8(amf0_markers::NULL)?;
        Ok(())
    }

    pub fn write_object(
        &mut self,
        properties: &IndexMap<String, Amf0ValueType>,
    ) -> Result<(), Amf0WriteError> {
        self.writer.write_u8(amf0_markers::OBJECT)?;
        self.write_properties(properties)
    }

    fn write_properties(
        &mut self,
        properties: &IndexMap<String, Amf0ValueType>,
    ) -> Result<(), Amf0WriteError> {
        for (key, value) in properties {
            let len = u16::try_from(key.len())
                .map_err(|_| Amf0WriteError::from(Amf0WriteErrorValue::NormalStringTooLong))?;
            self.writer.write_u16::<BigEndian>(len)?;
            self.writer.write(key.as_bytes())?;
            self.write_any(value)?;
        }
        self.write_eof()
    }

    pub fn write_eof(&mut self) -> Result<(), Amf0WriteError> {
        self.writer.write_u24::<BigEndian>(u32::from(amf0_markers::OBJECT_END))?;
        Ok(())
    }

    pub fn extract_current_bytes(&mut self) -> BytesMut {
        self.writer.extract_current_bytes()
    }
}
