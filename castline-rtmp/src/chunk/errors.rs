use crate::bytesio::bytes_errors::{BytesReadError, BytesWriteError};

#[derive(Debug, thiserror::Error)]
pub enum UnpackErrorValue {
    #[error("bytes read error: {0}")]
    BytesReadError(BytesReadError),
    #[error("chunk stream {csid} opened with format {format}, no previous header to inherit")]
    MissingPreviousHeader { csid: u32, format: u8 },
    #[error("message size {0} exceeds maximum {1}")]
    MessageTooLarge(usize, usize),
    #[error("invalid chunk size {0}")]
    InvalidChunkSize(u32),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct UnpackError {
    pub value: UnpackErrorValue,
}

impl From<UnpackErrorValue> for UnpackError {
    fn from(val: UnpackErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<BytesReadError> for UnpackError {
    fn from(error: BytesReadError) -> Self {
        Self {
            value: UnpackErrorValue::BytesReadError(error),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PackErrorValue {
    #[error("chunk stream id {0} out of range")]
    InvalidChunkStreamId(u32),
    #[error("message length {0} does not fit in 24 bits")]
    MessageTooLong(usize),
    #[error("bytes writer error: {0}")]
    BytesWriteError(BytesWriteError),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct PackError {
    pub value: PackErrorValue,
}

impl From<PackErrorValue> for PackError {
    fn from(val: PackErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<BytesWriteError> for PackError {
    fn from(error: BytesWriteError) -> Self {
        Self {
            value: PackErrorValue::BytesWriteError(error),
        }
    }
}
