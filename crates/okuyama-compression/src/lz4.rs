//! LZ4 block compressor
//!
//! Frame body: 4-byte little-endian original length followed by a single
//! LZ4 block. The block decoder needs the exact output size up front, so
//! the output buffer is allocated once from the declared length.

use crate::error::{CompressionError, Result};
use crate::framing::MAX_DECOMPRESSED_SIZE;

const SIZE_PREFIX: usize = 4;

/// Stateless LZ4 block compressor
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Compressor;

impl Lz4Compressor {
    pub(crate) fn compress_into(self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let length = u32::try_from(data.len()).map_err(|_| CompressionError::SizeLimitExceeded {
            size: data.len(),
            limit: u32::MAX as usize,
        })?;

        let start = out.len();
        let max_block = lz4_flex::block::get_maximum_output_size(data.len());
        out.resize(start + SIZE_PREFIX + max_block, 0);
        out[start..start + SIZE_PREFIX].copy_from_slice(&length.to_le_bytes());

        let written = lz4_flex::block::compress_into(data, &mut out[start + SIZE_PREFIX..])
            .map_err(|e| CompressionError::Compression(format!("LZ4 compression failed: {e}")))?;
        out.truncate(start + SIZE_PREFIX + written);
        Ok(())
    }

    pub(crate) fn decompress_body(self, body: &[u8]) -> Result<Vec<u8>> {
        let Some((prefix, block)) = body.split_first_chunk::<SIZE_PREFIX>() else {
            return Err(CompressionError::Truncated(
                "LZ4 frame missing size prefix".to_string(),
            ));
        };
        let expected = u32::from_le_bytes(*prefix) as usize;
        if expected > MAX_DECOMPRESSED_SIZE {
            return Err(CompressionError::SizeLimitExceeded {
                size: expected,
                limit: MAX_DECOMPRESSED_SIZE,
            });
        }

        let restored = lz4_flex::block::decompress(block, expected).map_err(|e| {
            CompressionError::Decompression(format!("LZ4 decompression failed: {e}"))
        })?;
        if restored.len() != expected {
            return Err(CompressionError::SizeMismatch {
                expected,
                actual: restored.len(),
            });
        }
        Ok(restored)
    }
}
