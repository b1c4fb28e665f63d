//! Byte-level constants of the line protocol

/// Separates fields within a line
pub const FIELD_SEPARATOR: u8 = b',';

/// Separates entries within a list field
pub const LIST_SEPARATOR: u8 = b':';

/// Ends every request and response line
pub const LINE_TERMINATOR: u8 = b'\n';

/// Field literal meaning "no value"
pub const ABSENT: &[u8] = b"(B)";

/// Line that closes a streamed multi-block response
pub const END_MARKER: &[u8] = b"END";

pub const STATUS_OK: &[u8] = b"true";
pub const STATUS_FAILED: &[u8] = b"false";

/// Size of the per-connection read buffer
pub const READ_BLOCK_SIZE: usize = 8192;

/// Longest single field a response may carry (512 MiB)
pub const MAX_FIELD_SIZE: usize = 512 * 1024 * 1024;
