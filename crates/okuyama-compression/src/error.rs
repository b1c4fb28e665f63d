//! Compression framing error types

use thiserror::Error;

/// Errors raised while compressing or decompressing framed payloads
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Payload does not start with the compression magic bytes
    #[error("payload is not compressed (missing [AC EE] magic)")]
    NotCompressed,

    /// Frame names a compressor id that is out of range or not registered
    #[error("unknown compressor id: {0}")]
    UnknownCompressor(u8),

    /// Frame ends before the compressor's own header or stream end
    #[error("truncated frame: {0}")]
    Truncated(String),

    /// Declared or produced size is larger than we are willing to allocate
    #[error("decompressed size {size} exceeds limit of {limit} bytes")]
    SizeLimitExceeded {
        /// Size that was requested or reached
        size: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// Decompressed output does not match the size declared in the frame
    #[error("size mismatch: frame declares {expected} bytes, stream produced {actual}")]
    SizeMismatch {
        /// Declared size
        expected: usize,
        /// Produced size
        actual: usize,
    },

    /// The algorithm failed to compress
    #[error("compression failed: {0}")]
    Compression(String),

    /// The algorithm rejected the compressed stream
    #[error("decompression failed: {0}")]
    Decompression(String),
}

/// Result type for compression operations
pub type Result<T> = std::result::Result<T, CompressionError>;
