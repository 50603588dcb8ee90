use crate::bytesio::bytes_errors::BytesWriteError;

#[derive(Debug, thiserror::Error)]
pub enum FlvMuxerErrorValue {
    #[error("bytes write error: {0}")]
    BytesWriteError(BytesWriteError),
    #[error("tag data of {0} bytes does not fit in 24 bits")]
    TagTooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct FlvMuxerError {
    pub value: FlvMuxerErrorValue,
}

impl From<FlvMuxerErrorValue> for FlvMuxerError {
    fn from(val: FlvMuxerErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<BytesWriteError> for FlvMuxerError {
    fn from(error: BytesWriteError) -> Self {
        Self {
            value: FlvMuxerErrorValue::BytesWriteError(error),
        }
    }
}
