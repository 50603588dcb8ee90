use {
    super::bytes_errors::{BytesReadError, BytesReadErrorValue},
    byteorder::ByteOrder,
    bytes::{Buf, BytesMut},
};

/// Upper bound on buffered, unparsed input. A peer that outruns the parser
/// by this much is either broken or hostile.
pub const MAX_BUFFERED_BYTES: usize = 16 * 1024 * 1024;

/// Cursor over a growable byte buffer. Reads consume from the front.
#[derive(Debug, Default)]
pub struct BytesReader {
    buffer: BytesMut,
}

impl BytesReader {
    #[must_use]
    pub const fn new(input: BytesMut) -> Self {
        Self { buffer: input }
    }

    pub fn extend_from_slice(&mut self, extend: &[u8]) -> Result<(), BytesReadError> {
        if self.buffer.len() + extend.len() > MAX_BUFFERED_BYTES {
            return Err(BytesReadErrorValue::BufferOverflow {
                current: self.buffer.len(),
                additional: extend.len(),
                max: MAX_BUFFERED_BYTES,
            }
            .into());
        }
        self.buffer.extend_from_slice(extend);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Unread bytes, without consuming them.
    #[must_use]
    pub fn remaining(&self) -> &[u8] {
        &self.buffer[..]
    }

    fn ensure(&self, need: usize) -> Result<(), BytesReadError> {
        if self.buffer.len() < need {
            return Err(BytesReadErrorValue::NotEnoughBytes {
                need,
                have: self.buffer.len(),
            }
            .into());
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, bytes_num: usize) -> Result<BytesMut, BytesReadError> {
        self.ensure(bytes_num)?;
        Ok(self.buffer.split_to(bytes_num))
    }

    pub fn advance_bytes(&mut self, bytes_num: usize) -> Result<(), BytesReadError> {
        self.ensure(bytes_num)?;
        self.buffer.advance(bytes_num);
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8, BytesReadError> {
        self.ensure(1)?;
        Ok(self.buffer[0])
    }

    pub fn read_u8(&mut self) -> Result<u8, BytesReadError> {
        self.ensure(1)?;
        Ok(self.buffer.get_u8())
    }

    pub fn read_u16<T: ByteOrder>(&mut self) -> Result<u16, BytesReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(T::read_u16(&bytes))
    }

    pub fn read_u24<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        let bytes = self.read_bytes(3)?;
        Ok(T::read_u24(&bytes))
    }

    pub fn read_u32<T: ByteOrder>(&mut self) -> Result<u32, BytesReadError> {
        let bytes = self.read_bytes(4)?;
        Ok(T::read_u32(&bytes))
    }

    pub fn read_i16<T: ByteOrder>(&mut self) -> Result<i16, BytesReadError> {
        let bytes = self.read_bytes(2)?;
        Ok(T::read_i16(&bytes))
    }

    pub fn read_f64<T: ByteOrder>(&mut self) -> Result<f64, BytesReadError> {
        let bytes = self.read_bytes(8)?;
        Ok(T::read_f64(&bytes))
    }

    /// Take every unread byte, leaving the reader empty.
    pub fn extract_remaining_bytes(&mut self) -> BytesMut {
        self.buffer.split()
    }
}
