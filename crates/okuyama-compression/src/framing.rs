//! Compression frame header and compressor registry
//!
//! A compressed payload is laid out as:
//!
//! ```text
//! [0xAC][0xEE][compressor id: u8][compressor-specific body]
//! ```
//!
//! Anything that does not start with the two magic bytes is raw data and
//! passes through untouched.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::deflate::DeflateCompressor;
use crate::error::{CompressionError, Result};
use crate::lz4::Lz4Compressor;

/// Magic prefix of a compressed payload
pub const MAGIC: [u8; 2] = [0xAC, 0xEE];

/// Magic prefix plus compressor id
pub const HEADER_LEN: usize = 3;

/// Number of compressor slots; ids at or above this are invalid
pub const MAX_COMPRESSORS: usize = 4;

/// Fixed increment by which output buffers grow
pub const BLOCK_INCREMENT: usize = 4096;

/// Largest decompressed payload accepted (256 MiB)
pub const MAX_DECOMPRESSED_SIZE: usize = 256 * 1024 * 1024;

/// Identifier carried in the third byte of a compressed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CompressorId(u8);

impl CompressorId {
    /// Deflate, the default compressor
    pub const DEFLATE: Self = Self(0);
    /// Id 1 belongs to LZF in other okuyama clients; nothing is registered
    /// there by default, so LZF frames decode as unknown
    pub const LZF: Self = Self(1);
    /// LZ4 block compressor
    pub const LZ4: Self = Self(2);

    /// Validate a raw id against the slot table size
    pub fn new(id: u8) -> Option<Self> {
        ((id as usize) < MAX_COMPRESSORS).then_some(Self(id))
    }

    /// Raw byte value
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for CompressorId {
    type Error = CompressionError;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id).ok_or(CompressionError::UnknownCompressor(id))
    }
}

impl From<CompressorId> for u8 {
    fn from(id: CompressorId) -> Self {
        id.0
    }
}

impl Default for CompressorId {
    fn default() -> Self {
        Self::DEFLATE
    }
}

impl fmt::Display for CompressorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of compressor implementations
#[derive(Debug)]
pub enum Compressor {
    /// zlib stream with a big-endian length prefix
    Deflate(DeflateCompressor),
    /// LZ4 block with a little-endian length prefix
    Lz4(Lz4Compressor),
}

impl Compressor {
    /// Wire id of this compressor
    pub const fn id(&self) -> CompressorId {
        match self {
            Self::Deflate(_) => CompressorId::DEFLATE,
            Self::Lz4(_) => CompressorId::LZ4,
        }
    }

    /// Produce a complete frame (header included) for `data`
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + BLOCK_INCREMENT.min(data.len() + 16));
        out.extend_from_slice(&MAGIC);
        out.push(self.id().as_byte());
        match self {
            Self::Deflate(deflate) => deflate.compress_into(data, &mut out)?,
            Self::Lz4(lz4) => lz4.compress_into(data, &mut out)?,
        }
        Ok(out)
    }

    fn decompress_body(&self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Deflate(deflate) => deflate.decompress_body(body),
            Self::Lz4(lz4) => lz4.decompress_body(body),
        }
    }
}

/// Check for the compression magic prefix
pub fn is_compressed(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

/// Fixed table of compressors indexed by wire id
///
/// Built once per client and shared by reference with the codec.
#[derive(Debug)]
pub struct CompressorRegistry {
    slots: [Option<Compressor>; MAX_COMPRESSORS],
}

impl CompressorRegistry {
    /// Registry with no compressors; every frame decodes as unknown
    pub fn empty() -> Self {
        Self {
            slots: [None, None, None, None],
        }
    }

    /// Registry with deflate at id 0 and LZ4 at id 2
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Compressor::Deflate(DeflateCompressor::default()));
        registry.register(Compressor::Lz4(Lz4Compressor));
        registry
    }

    /// Install a compressor in its slot, returning the one it replaced
    pub fn register(&mut self, compressor: Compressor) -> Option<Compressor> {
        let slot = compressor.id().slot();
        self.slots[slot].replace(compressor)
    }

    /// Look up a compressor by id
    pub fn get(&self, id: CompressorId) -> Option<&Compressor> {
        self.slots.get(id.slot()).and_then(Option::as_ref)
    }

    /// Compress `data` with the compressor registered under `id`
    pub fn compress(&self, id: CompressorId, data: &[u8]) -> Result<Vec<u8>> {
        let compressor = self
            .get(id)
            .ok_or(CompressionError::UnknownCompressor(id.as_byte()))?;
        compressor.compress(data)
    }

    /// Decompress a framed payload
    ///
    /// Fails with [`CompressionError::NotCompressed`] when the magic is
    /// absent and [`CompressionError::UnknownCompressor`] when the id is out
    /// of range or its slot is empty.
    pub fn decompress(&self, framed: &[u8]) -> Result<Vec<u8>> {
        if !is_compressed(framed) {
            return Err(CompressionError::NotCompressed);
        }
        let Some(&raw_id) = framed.get(MAGIC.len()) else {
            return Err(CompressionError::Truncated(
                "frame ends before compressor id".to_string(),
            ));
        };
        let compressor = CompressorId::new(raw_id)
            .and_then(|id| self.get(id))
            .ok_or(CompressionError::UnknownCompressor(raw_id))?;

        trace!(
            compressor = raw_id,
            framed_len = framed.len(),
            "decompressing payload"
        );
        compressor.decompress_body(&framed[HEADER_LEN..])
    }

    /// Decompress if framed, otherwise hand the bytes back unchanged
    pub fn decode_payload<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if is_compressed(bytes) {
            self.decompress(bytes).map(Cow::Owned)
        } else {
            Ok(Cow::Borrowed(bytes))
        }
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
