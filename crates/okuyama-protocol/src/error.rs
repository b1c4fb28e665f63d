//! Error types for the wire codec

use std::time::Duration;

use okuyama_compression::CompressionError;
use thiserror::Error;

use crate::value::ObjectCodecError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Format(String),

    #[error("unexpected opcode in response: expected {expected}, got {actual}")]
    UnexpectedOpcode { expected: u16, actual: u64 },

    #[error("unexpected status field: {0:?}")]
    UnexpectedStatus(String),

    #[error("invalid Base64 field: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid UTF-8 field: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("payload compression: {0}")]
    Compression(#[from] CompressionError),

    #[error("object codec: {0}")]
    ObjectCodec(#[from] ObjectCodecError),
}

impl ProtocolError {
    /// Transport-level failures that a fresh connection may not repeat
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
