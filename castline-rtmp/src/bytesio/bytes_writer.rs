use {
    super::bytes_errors::{BytesWriteError, BytesWriteErrorValue},
    byteorder::{ByteOrder, WriteBytesExt},
    bytes::BytesMut,
};

/// Append-only byte sink used by every encoder in this crate.
#[derive(Debug, Default)]
pub struct BytesWriter {
    bytes: Vec<u8>,
}

impl BytesWriter {
    #[must_use]
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, byte: u8) -> Result<(), BytesWriteError> {
        self.bytes.write_u8(byte)?;
        Ok(())
    }

    pub fn write_u16<T: ByteOrder>(&mut self, value: u16) -> Result<(), BytesWriteError> {
        self.bytes.write_u16::<T>(value)?;
        Ok(())
    }

    pub fn write_u24<T: ByteOrder>(&mut self, value: u32) -> Result<(), BytesWriteError> {
        if value > 0x00FF_FFFF {
            return Err(BytesWriteErrorValue::ValueOutOfRange {
                value: u64::from(value),
                bits: 24,
            }
            .into());
        }
        self.bytes.write_u24::<T>(value)?;
        Ok(())
    }

    pub fn write_u32<T: ByteOrder>(&mut self, value: u32) -> Result<(), BytesWriteError> {
        self.bytes.write_u32::<T>(value)?;
        Ok(())
    }

    pub fn write_f64<T: ByteOrder>(&mut self, value: f64) -> Result<(), BytesWriteError> {
        self.bytes.write_f64::<T>(value)?;
        Ok(())
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<(), BytesWriteError> {
        self.bytes.extend_from_slice(buf);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn get_current_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hand the written bytes to the caller and reset the writer.
    pub fn extract_current_bytes(&mut self) -> BytesMut {
        BytesMut::from(&std::mem::take(&mut self.bytes)[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::BigEndian;

    #[test]
    fn test_u24_range_checked() {
        let mut writer = BytesWriter::new();
        writer.write_u24::<BigEndian>(0x00AB_CDEF).unwrap();
        assert_eq!(writer.get_current_bytes(), &[0xAB, 0xCD, 0xEF]);
        assert!(writer.write_u24::<BigEndian>(0x0100_0000).is_err());
    }

    #[test]
    fn test_extract_resets() {
        let mut writer = BytesWriter::new();
        writer.write(b"abc").unwrap();
        let out = writer.extract_current_bytes();
        assert_eq!(&out[..], b"abc");
        assert!(writer.is_empty());
    }
}
