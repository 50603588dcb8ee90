use castline_rtmp::{
    amf0::errors::Amf0WriteError, chunk::errors::UnpackError, flv::errors::FlvMuxerError,
    handshake::errors::HandshakeError, messages::errors::MessageError,
    netconnection::errors::NetConnectionError,
};
use thiserror::Error;

use crate::auth::{AlreadyPublishing, AuthError};
use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    AlreadyPublishing(#[from] AlreadyPublishing),

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("Encode failure: {0}")]
    EncodeFailure(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Illegal session transition {from} -> {to}")]
    InvalidState { from: SessionState, to: SessionState },
}

pub type Result<T> = std::result::Result<T, IngestError>;

macro_rules! protocol_error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for IngestError {
                fn from(err: $source) -> Self {
                    Self::Protocol(err.to_string())
                }
            }
        )*
    };
}

protocol_error_from!(
    Amf0WriteError,
    HandshakeError,
    UnpackError,
    MessageError,
    NetConnectionError,
    FlvMuxerError,
);

impl From<config::ConfigError> for IngestError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
