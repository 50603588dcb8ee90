use crate::{
    amf0::errors::Amf0WriteError, bytesio::bytes_errors::BytesWriteError,
    chunk::errors::PackError,
};

#[derive(Debug, thiserror::Error)]
pub enum NetConnectionErrorValue {
    #[error("amf0 write error: {0}")]
    Amf0WriteError(Amf0WriteError),
    #[error("bytes write error: {0}")]
    BytesWriteError(BytesWriteError),
    #[error("chunk pack error: {0}")]
    PackError(PackError),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct NetConnectionError {
    pub value: NetConnectionErrorValue,
}

impl From<Amf0WriteError> for NetConnectionError {
    fn from(error: Amf0WriteError) -> Self {
        Self {
            value: NetConnectionErrorValue::Amf0WriteError(error),
        }
    }
}

impl From<BytesWriteError> for NetConnectionError {
    fn from(error: BytesWriteError) -> Self {
        Self {
            value: NetConnectionErrorValue::BytesWriteError(error),
        }
    }
}

impl From<PackError> for NetConnectionError {
    fn from(error: PackError) -> Self {
        Self {
            value: NetConnectionErrorValue::PackError(error),
        }
    }
}
