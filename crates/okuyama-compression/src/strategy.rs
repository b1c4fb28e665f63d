//! Encode-time compression policy

use std::fmt;

use crate::framing::CompressorId;

/// Default minimum length; values of this size or shorter stay raw
pub const DEFAULT_MIN_LENGTH: usize = 32;

/// Decides whether and how a value is compressed before it is stored
pub trait CompressionStrategy: Send + Sync + fmt::Debug {
    /// Pick a compressor for a value of `len` bytes stored under `key`,
    /// or `None` to store it raw
    fn select(&self, key: &str, len: usize) -> Option<CompressorId>;
}

/// Compress every value longer than a threshold with one compressor
#[derive(Debug, Clone, Copy)]
pub struct ThresholdStrategy {
    min_length: usize,
    compressor: CompressorId,
}

impl ThresholdStrategy {
    pub const fn new(min_length: usize, compressor: CompressorId) -> Self {
        Self {
            min_length,
            compressor,
        }
    }
}

impl Default for ThresholdStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LENGTH, CompressorId::DEFLATE)
    }
}

impl CompressionStrategy for ThresholdStrategy {
    fn select(&self, _key: &str, len: usize) -> Option<CompressorId> {
        (len > self.min_length).then_some(self.compressor)
    }
}

/// Never compress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl CompressionStrategy for NoCompression {
    fn select(&self, _key: &str, _len: usize) -> Option<CompressorId> {
        None
    }
}
