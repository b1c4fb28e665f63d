//! Request encoding
//!
//! A request is one line: the opcode digits, then each field preceded by a
//! separator, then a newline.
//!
//! ```text
//! 1,a2V5,(B),0,dmFsdWU=,0,\n
//! ```

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::opcode::Opcode;
use crate::tap::TapContext;
use crate::wire::{ABSENT, FIELD_SEPARATOR, LINE_TERMINATOR, LIST_SEPARATOR};

/// How a string field is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// UTF-8 as is; the caller guarantees no separator bytes
    Raw,
    /// Standard Base64 with padding
    Base64,
}

/// Builder for one request line
#[derive(Debug)]
pub struct RequestBuilder {
    opcode: Opcode,
    buf: BytesMut,
}

impl RequestBuilder {
    pub fn new(opcode: Opcode) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(opcode.code().to_string().as_bytes());
        Self { opcode, buf }
    }

    #[must_use]
    pub fn number(mut self, n: u64) -> Self {
        self.buf.put_u8(FIELD_SEPARATOR);
        self.buf.put_slice(n.to_string().as_bytes());
        self
    }

    /// Append a string field; `None` writes the absent sentinel
    #[must_use]
    pub fn string(mut self, value: Option<&str>, encoding: FieldEncoding) -> Self {
        self.buf.put_u8(FIELD_SEPARATOR);
        match value {
            Some(text) => self.put_text(text, encoding),
            None => self.buf.put_slice(ABSENT),
        }
        self
    }

    /// Append a `:`-joined list; an empty list writes the absent sentinel
    #[must_use]
    pub fn string_list<S: AsRef<str>>(mut self, items: &[S], encoding: FieldEncoding) -> Self {
        self.buf.put_u8(FIELD_SEPARATOR);
        if items.is_empty() {
            self.buf.put_slice(ABSENT);
            return self;
        }
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.buf.put_u8(LIST_SEPARATOR);
            }
            self.put_text(item.as_ref(), encoding);
        }
        self
    }

    /// Append a binary field, always Base64
    #[must_use]
    pub fn blob(mut self, bytes: &[u8]) -> Self {
        self.buf.put_u8(FIELD_SEPARATOR);
        self.buf.put_slice(BASE64.encode(bytes).as_bytes());
        self
    }

    /// Append an empty trailing field, as writes expect
    #[must_use]
    pub fn trailing_separator(mut self) -> Self {
        self.buf.put_u8(FIELD_SEPARATOR);
        self
    }

    pub fn finish(mut self) -> Request {
        self.buf.put_u8(LINE_TERMINATOR);
        Request {
            opcode: self.opcode,
            line: self.buf.freeze(),
        }
    }

    fn put_text(&mut self, text: &str, encoding: FieldEncoding) {
        match encoding {
            FieldEncoding::Raw => self.buf.put_slice(text.as_bytes()),
            FieldEncoding::Base64 => self.buf.put_slice(BASE64.encode(text).as_bytes()),
        }
    }
}

/// A fully encoded request line; cheap to clone and resend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    opcode: Opcode,
    line: Bytes,
}

impl Request {
    pub fn builder(opcode: Opcode) -> RequestBuilder {
        RequestBuilder::new(opcode)
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Encoded bytes including the trailing newline
    pub fn as_bytes(&self) -> &[u8] {
        &self.line
    }

    pub fn len(&self) -> usize {
        self.line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }
}

/// Write `request` and flush, bounded by `write_timeout` when set
pub async fn write_request<W>(
    writer: &mut W,
    request: &Request,
    write_timeout: Option<Duration>,
    tap: Option<TapContext<'_>>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let send = async {
        writer.write_all(request.as_bytes()).await?;
        writer.flush().await
    };
    match write_timeout {
        Some(limit) => tokio::time::timeout(limit, send)
            .await
            .map_err(|_| ProtocolError::Timeout(limit))??,
        None => send.await?,
    }
    if let Some(tap) = tap {
        tap.outbound(request.as_bytes());
    }
    Ok(())
}
