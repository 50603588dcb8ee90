use std::io;

#[derive(Debug, thiserror::Error)]
pub enum BytesReadErrorValue {
    #[error("not enough bytes to read: need {need}, have {have}")]
    NotEnoughBytes { need: usize, have: usize },
    #[error("empty stream")]
    EmptyStream,
    #[error("io error: {0}")]
    IO(#[source] io::Error),
    #[error("index out of range")]
    IndexOutofRange,
    #[error("buffer overflow: {current} + {additional} > {max} max")]
    BufferOverflow {
        current: usize,
        additional: usize,
        max: usize,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct BytesReadError {
    pub value: BytesReadErrorValue,
}

impl BytesReadError {
    /// True when the reader simply ran dry; callers parsing incrementally
    /// treat this as "wait for more data" rather than a malformed stream.
    #[must_use]
    pub const fn is_not_enough_bytes(&self) -> bool {
        matches!(
            self.value,
            BytesReadErrorValue::NotEnoughBytes { .. } | BytesReadErrorValue::EmptyStream
        )
    }
}

impl From<BytesReadErrorValue> for BytesReadError {
    fn from(val: BytesReadErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<io::Error> for BytesReadError {
    fn from(error: io::Error) -> Self {
        Self {
            value: BytesReadErrorValue::IO(error),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct BytesWriteError {
    pub value: BytesWriteErrorValue,
}

#[derive(Debug, thiserror::Error)]
pub enum BytesWriteErrorValue {
    #[error("io error: {0}")]
    IO(#[source] io::Error),
    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: u64, bits: u8 },
}

impl From<BytesWriteErrorValue> for BytesWriteError {
    fn from(val: BytesWriteErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<io::Error> for BytesWriteError {
    fn from(error: io::Error) -> Self {
        Self {
            value: BytesWriteErrorValue::IO(error),
        }
    }
}
