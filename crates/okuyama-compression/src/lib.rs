//! # okuyama-compression
//!
//! Transparent value compression for the okuyama client family.
//!
//! Values are compressed before they are Base64-encoded onto the wire and
//! carry a small private header so a reader can tell compressed payloads
//! from raw ones:
//!
//! ```text
//! [0xAC][0xEE][compressor id][compressor body]
//! ```
//!
//! | Id | Compressor | Body |
//! |----|------------|------|
//! | 0 | Deflate (zlib stream) | `u32` BE original length + stream |
//! | 1 | LZF (not registered; reserved for compatibility) | - |
//! | 2 | LZ4 block | `u32` LE original length + block |
//!
//! Peers that do not know about this framing see the header as ordinary
//! payload bytes.
//!
//! ```rust
//! use okuyama_compression::{CompressorId, CompressorRegistry};
//!
//! let registry = CompressorRegistry::with_defaults();
//! let framed = registry.compress(CompressorId::DEFLATE, &[b'a'; 128])?;
//! assert_eq!(&framed[..3], &[0xAC, 0xEE, 0x00]);
//!
//! let raw = registry.decode_payload(&framed)?;
//! assert_eq!(&raw[..], &[b'a'; 128]);
//! # Ok::<(), okuyama_compression::CompressionError>(())
//! ```

pub mod deflate;
pub mod engine_pool;
pub mod error;
pub mod framing;
pub mod lz4;
pub mod strategy;

pub use deflate::DeflateCompressor;
pub use error::{CompressionError, Result};
pub use framing::{
    BLOCK_INCREMENT, Compressor, CompressorId, CompressorRegistry, HEADER_LEN, MAGIC,
    MAX_COMPRESSORS, MAX_DECOMPRESSED_SIZE, is_compressed,
};
pub use lz4::Lz4Compressor;
pub use strategy::{CompressionStrategy, DEFAULT_MIN_LENGTH, NoCompression, ThresholdStrategy};
