//! Deflate (zlib stream) compressor
//!
//! Frame body layout after the 3-byte header:
//!
//! ```text
//! [original length: u32 big-endian][zlib stream]
//! ```

use flate2::{Compress, Decompress, FlushCompress, FlushDecompress, Status};

use crate::engine_pool::{DEFAULT_MAX_IDLE_ENGINES, EnginePool};
use crate::error::{CompressionError, Result};
use crate::framing::{BLOCK_INCREMENT, MAX_DECOMPRESSED_SIZE};

/// Length of the original-size prefix that precedes the zlib stream
pub const LENGTH_PREFIX: usize = 4;

/// Deflate compressor with pooled engines
#[derive(Debug)]
pub struct DeflateCompressor {
    compressors: EnginePool<Compress>,
    decompressors: EnginePool<Decompress>,
}

impl DeflateCompressor {
    /// Create a compressor keeping up to `max_idle` engines of each kind
    pub fn new(max_idle: usize) -> Self {
        Self {
            compressors: EnginePool::new(max_idle),
            decompressors: EnginePool::new(max_idle),
        }
    }

    /// Append the frame body for `data` to `out`
    pub(crate) fn compress_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let length = u32::try_from(data.len()).map_err(|_| CompressionError::SizeLimitExceeded {
            size: data.len(),
            limit: u32::MAX as usize,
        })?;
        out.extend_from_slice(&length.to_be_bytes());
        out.reserve_exact(data.len().max(BLOCK_INCREMENT));

        self.compressors.with_engine(|engine| {
            loop {
                let consumed = engine.total_in() as usize;
                let produced = engine.total_out();
                let status = engine
                    .compress_vec(&data[consumed..], out, FlushCompress::Finish)
                    .map_err(|e| CompressionError::Compression(e.to_string()))?;

                match status {
                    Status::StreamEnd => return Ok(()),
                    Status::Ok | Status::BufError => {
                        if out.len() == out.capacity() {
                            out.reserve_exact(BLOCK_INCREMENT);
                        } else if engine.total_out() == produced
                            && engine.total_in() as usize == consumed
                        {
                            return Err(CompressionError::Compression(
                                "deflate made no progress".to_string(),
                            ));
                        }
                    }
                }
            }
        })
    }

    /// Decode a frame body (everything after the 3-byte header)
    pub(crate) fn decompress_body(&self, body: &[u8]) -> Result<Vec<u8>> {
        let Some((prefix, stream)) = body.split_first_chunk::<LENGTH_PREFIX>() else {
            return Err(CompressionError::Truncated(format!(
                "deflate frame needs a {LENGTH_PREFIX}-byte length prefix, got {} bytes",
                body.len()
            )));
        };
        let expected = u32::from_be_bytes(*prefix) as usize;
        if expected > MAX_DECOMPRESSED_SIZE {
            return Err(CompressionError::SizeLimitExceeded {
                size: expected,
                limit: MAX_DECOMPRESSED_SIZE,
            });
        }

        let mut out = Vec::with_capacity(expected.max(BLOCK_INCREMENT));
        self.decompressors.with_engine(|engine| {
            loop {
                let consumed = engine.total_in() as usize;
                let produced = engine.total_out();
                let status = engine
                    .decompress_vec(&stream[consumed..], &mut out, FlushDecompress::Finish)
                    .map_err(|e| CompressionError::Decompression(e.to_string()))?;

                match status {
                    Status::StreamEnd => break,
                    Status::Ok | Status::BufError => {
                        if out.len() == out.capacity() {
                            if out.len() >= MAX_DECOMPRESSED_SIZE {
                                return Err(CompressionError::SizeLimitExceeded {
                                    size: out.len(),
                                    limit: MAX_DECOMPRESSED_SIZE,
                                });
                            }
                            out.reserve_exact(BLOCK_INCREMENT);
                        } else if engine.total_out() == produced
                            && engine.total_in() as usize == consumed
                        {
                            return Err(CompressionError::Truncated(
                                "deflate stream ended early".to_string(),
                            ));
                        }
                    }
                }
            }
            Ok(())
        })?;

        if out.len() != expected {
            return Err(CompressionError::SizeMismatch {
                expected,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_ENGINES)
    }
}
