use {
    super::{
        define::{amf0_markers, Amf0ValueType},
        errors::{Amf0ReadError, Amf0ReadErrorValue},
    },
    crate::bytesio::bytes_reader::BytesReader,
    byteorder::BigEndian,
    indexmap::IndexMap,
};

const MAX_NESTING_DEPTH: usize = 32;

pub struct Amf0Reader {
    reader: BytesReader,
}

impl Amf0Reader {
    #[must_use]
    pub const fn new(reader: BytesReader) -> Self {
        Self { reader }
    }

    /// Decode values until the input is exhausted.
    pub fn read_all(&mut self) -> Result<Vec<Amf0ValueType>, Amf0ReadError> {
        let mut results = vec![];

        while !self.reader.is_empty() {
            results.push(self.read_any()?);
        }

        Ok(results)
    }

    pub fn read_any(&mut self) -> Result<Amf0ValueType, Amf0ReadError> {
        self.read_value(0)
    }

    fn read_value(&mut self, depth: usize) -> Result<Amf0ValueType, Amf0ReadError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Amf0ReadErrorValue::NestingTooDeep {
                max: MAX_NESTING_DEPTH,
            }
            .into());
        }

        let markers = self.reader.read_u8()?;

        match markers {
            amf0_markers::NUMBER => self.read_number(),
            amf0_markers::BOOLEAN => self.read_bool(),
            amf0_markers::STRING => self.read_string(),
            amf0_markers::OBJECT => Ok(Amf0ValueType::Object(self.read_properties(depth)?)),
            amf0_markers::NULL => Ok(Amf0ValueType::Null),
            amf0_markers::UNDEFINED => Ok(Amf0ValueType::Undefined),
            amf0_markers::ECMA_ARRAY => {
                // The declared count is advisory; the object-end marker terminates.
                self.reader.read_u32::<BigEndian>()?;
                Ok(Amf0ValueType::EcmaArray(self.read_properties(depth)?))
            }
            amf0_markers::STRICT_ARRAY => self.read_strict_array(depth),
            amf0_markers::DATE => self.read_date(),
            amf0_markers::LONG_STRING => self.read_long_string(),
            amf0_markers::OBJECT_END => Ok(Amf0ValueType::END),
            _ => Err(Amf0ReadErrorValue::UnknownMarker { marker: markers }.into()),
        }
    }

    pub fn read_number(&mut self) -> Result<Amf0ValueType, Amf0ReadError> {
        let number = self.reader.read_f64::<BigEndian>()?;
        Ok(Amf0ValueType::Number(number))
    }

    pub fn read_bool(&mut self) -> Result<Amf0ValueType, Amf0ReadError> {
        let value = self.reader.read_u8()?;
        Ok(Amf0ValueType::Boolean(value != 0))
    }

    fn read_raw_string(&mut self) -> Result<String, Amf0ReadError> {
        let l = self.reader.read_u16::<BigEndian>()?;
        let bytes = self.reader.read_bytes(l as usize)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn read_string(&mut self) -> Result<Amf0ValueType, Amf0ReadError> {
        Ok(Amf0ValueType::UTF8String(self.read_raw_string()?))
    }

    pub fn read_long_string(&mut self) -> Result<Amf0ValueType, Amf0ReadError> {
        let l = self.reader.read_u32::<BigEndian>()?;
        let bytes = self.reader.read_bytes(l as usize)?;
        Ok(Amf0ValueType::LongUTF8String(String::from_utf8(
            bytes.to_vec(),
        )?))
    }

    fn read_properties(
        &mut self,
        depth: usize,
    ) -> Result<IndexMap<String, Amf0ValueType>, Amf0ReadError> {
        let mut properties = IndexMap::new();

        loop {
            let key = self.read_raw_string()?;
            let val = self.read_value(depth + 1)?;

            if key.is_empty() && val == Amf0ValueType::END {
                break;
            }
            properties.insert(key, val);
        }

        Ok(properties)
    }

    fn read_strict_array(&mut self, depth: usize) -> Result<Amf0ValueType, Amf0ReadError> {
        let count = self.reader.read_u32::<BigEndian>()? as usize;
        // Every element is at least one byte; refuse counts the buffer cannot hold.
        if count > self.reader.len() {
            return Err(Amf0ReadErrorValue::WrongType.into());
        }

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_value(depth + 1)?);
        }
        Ok(Amf0ValueType::StrictArray(values))
    }

    pub fn read_date(&mut self) -> Result<Amf0ValueType, Amf0ReadError> {
        let unix_time_ms = self.reader.read_f64::<BigEndian>()?;
        let time_zone = self.reader.read_i16::<BigEndian>()?;
        Ok(Amf0ValueType::Date {
            unix_time_ms,
            time_zone,
        })
    }
}
