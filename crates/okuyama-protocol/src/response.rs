//! Streaming response decoding
//!
//! Responses are read field by field from a per-connection [`ReadBuffer`].
//! Each primitive consumes bytes up to the next terminator and refills the
//! buffer from the stream when it runs dry; nothing is ever pushed back.

use std::io;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::{ProtocolError, Result};
use crate::opcode::Opcode;
use crate::payload::PayloadCodec;
use crate::request::FieldEncoding;
use crate::tap::TapContext;
use crate::value::Value;
use crate::wire::{
    ABSENT, END_MARKER, FIELD_SEPARATOR, LINE_TERMINATOR, LIST_SEPARATOR, MAX_FIELD_SIZE,
    READ_BLOCK_SIZE, STATUS_FAILED, STATUS_OK,
};

/// Fixed-size read buffer owned by one connection
#[derive(Debug)]
pub struct ReadBuffer {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::with_capacity(READ_BLOCK_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity.max(1)].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// No unread bytes remain
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.end - self.start
    }

    /// Drop any unread bytes
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    fn unread(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of the status field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Field,
    List,
    Line,
}

/// Decoder for one response, borrowing a connection's stream and buffer
pub struct ResponseReader<'a, R> {
    stream: &'a mut R,
    buffer: &'a mut ReadBuffer,
    read_timeout: Option<Duration>,
    tap: Option<TapContext<'a>>,
    field: Vec<u8>,
    at_line_end: bool,
}

impl<'a, R> ResponseReader<'a, R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(stream: &'a mut R, buffer: &'a mut ReadBuffer) -> Self {
        Self {
            stream,
            buffer,
            read_timeout: None,
            tap: None,
            field: Vec::new(),
            at_line_end: true,
        }
    }

    /// Bound every refill by `limit`
    #[must_use]
    pub fn with_read_timeout(mut self, limit: Duration) -> Self {
        self.read_timeout = Some(limit);
        self
    }

    #[must_use]
    pub fn with_tap(mut self, tap: Option<TapContext<'a>>) -> Self {
        self.tap = tap;
        self
    }

    /// Read the leading opcode field and check it answers `opcode`
    pub async fn expect_opcode(&mut self, opcode: Opcode) -> Result<()> {
        let actual = self.next_number().await?;
        let expected = opcode.reply_code();
        if actual != u64::from(expected) {
            return Err(ProtocolError::UnexpectedOpcode { expected, actual });
        }
        Ok(())
    }

    /// Start of the next block in a streamed response
    ///
    /// Returns `false` on the `END` line, `true` when a block for `opcode`
    /// begins.
    pub async fn next_block(&mut self, opcode: Opcode) -> Result<bool> {
        self.read_field(false).await?;
        if self.field == END_MARKER {
            return Ok(false);
        }
        let actual = parse_number(&self.field)?;
        let expected = opcode.reply_code();
        if actual != u64::from(expected) {
            return Err(ProtocolError::UnexpectedOpcode { expected, actual });
        }
        Ok(true)
    }

    pub async fn next_status(&mut self) -> Result<Status> {
        self.read_field(false).await?;
        match self.field.as_slice() {
            STATUS_OK => Ok(Status::Ok),
            STATUS_FAILED => Ok(Status::Failed),
            other => Err(ProtocolError::UnexpectedStatus(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// Decimal number; an empty field reads as zero
    pub async fn next_number(&mut self) -> Result<u64> {
        self.read_field(false).await?;
        parse_number(&self.field)
    }

    /// String field: `None` for the absent sentinel, `Some("")` when empty
    pub async fn next_string(&mut self, encoding: FieldEncoding) -> Result<Option<String>> {
        self.read_field(false).await?;
        if self.field == ABSENT {
            return Ok(None);
        }
        decode_text(&self.field, encoding).map(Some)
    }

    /// `:`-separated list; absent and empty entries are dropped
    pub async fn next_string_list(&mut self, encoding: FieldEncoding) -> Result<Vec<String>> {
        let mut items = Vec::new();
        loop {
            let terminator = self.read_field(true).await?;
            if !self.field.is_empty() && self.field != ABSENT {
                items.push(decode_text(&self.field, encoding)?);
            }
            if terminator != Terminator::List {
                return Ok(items);
            }
        }
    }

    /// Stored value field
    ///
    /// Empty field is an empty string, the absent sentinel is `None`,
    /// anything else is Base64 handed to `codec`.
    pub async fn next_value(&mut self, codec: &PayloadCodec) -> Result<Option<Value>> {
        self.read_field(false).await?;
        if self.field.is_empty() {
            return Ok(Some(Value::Text(String::new())));
        }
        if self.field == ABSENT {
            return Ok(None);
        }
        let raw = BASE64.decode(&self.field)?;
        codec.decode(&raw)
    }

    /// Discard the rest of the current line
    ///
    /// Leaves the connection at a line boundary so it can be reused.
    pub async fn finish(&mut self) -> Result<()> {
        while !self.at_line_end {
            if self.buffer.is_empty() {
                self.fill().await?;
            }
            let unread = self.buffer.unread();
            match unread.iter().position(|&b| b == LINE_TERMINATOR) {
                Some(i) => {
                    self.buffer.consume(i + 1);
                    self.at_line_end = true;
                }
                None => {
                    let n = unread.len();
                    self.buffer.consume(n);
                }
            }
        }
        Ok(())
    }

    async fn read_field(&mut self, split_list: bool) -> Result<Terminator> {
        self.field.clear();
        loop {
            if self.buffer.is_empty() {
                self.fill().await?;
            }
            let unread = self.buffer.unread();
            let found = unread.iter().position(|&b| {
                b == FIELD_SEPARATOR || b == LINE_TERMINATOR || (split_list && b == LIST_SEPARATOR)
            });
            match found {
                Some(i) => {
                    let terminator = match unread[i] {
                        FIELD_SEPARATOR => Terminator::Field,
                        LIST_SEPARATOR => Terminator::List,
                        _ => Terminator::Line,
                    };
                    self.field.extend_from_slice(&unread[..i]);
                    self.buffer.consume(i + 1);
                    self.at_line_end = terminator == Terminator::Line;
                    return Ok(terminator);
                }
                None => {
                    let n = unread.len();
                    self.field.extend_from_slice(unread);
                    self.buffer.consume(n);
                    if self.field.len() > MAX_FIELD_SIZE {
                        return Err(ProtocolError::Format(format!(
                            "field exceeds {MAX_FIELD_SIZE} bytes"
                        )));
                    }
                }
            }
        }
    }

    async fn fill(&mut self) -> Result<()> {
        self.buffer.clear();
        let read = self.stream.read(&mut self.buffer.data);
        let n = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ProtocolError::Timeout(limit))??,
            None => read.await?,
        };
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the response was complete",
            )
            .into());
        }
        self.buffer.end = n;
        trace!(bytes = n, "refilled read buffer");
        if let Some(tap) = self.tap {
            tap.inbound(&self.buffer.data[..n]);
        }
        Ok(())
    }
}

fn parse_number(field: &[u8]) -> Result<u64> {
    field.iter().try_fold(0u64, |acc, &b| {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::Format(format!(
                "expected a number, found byte 0x{b:02x} in {:?}",
                String::from_utf8_lossy(field)
            )));
        }
        acc.checked_mul(10)
            .and_then(|n| n.checked_add(u64::from(b - b'0')))
            .ok_or_else(|| ProtocolError::Format("number overflows u64".to_string()))
    })
}

fn decode_text(field: &[u8], encoding: FieldEncoding) -> Result<String> {
    let bytes = match encoding {
        FieldEncoding::Raw => field.to_vec(),
        FieldEncoding::Base64 => BASE64.decode(field)?,
    };
    Ok(String::from_utf8(bytes)?)
}
