//! # okuyama-protocol
//!
//! Codec for the okuyama text protocol. Every exchange is one request line
//! followed by one response line, or by a stream of lines closed with `END`:
//!
//! ```text
//! -> 2,a2V5\n
//! <- 2,true,dmFsdWU=\n
//! ```
//!
//! Fields are separated by `,`, list entries by `:`, and the literal `(B)`
//! stands for "no value". Keys, tags and values are normally Base64 so they
//! never contain a separator.
//!
//! The crate is transport-agnostic: [`write_request`] takes any
//! `AsyncWrite` and [`ResponseReader`] any `AsyncRead`. Connection
//! management lives in `okuyama-client`.

pub mod error;
pub mod opcode;
pub mod payload;
pub mod request;
pub mod response;
pub mod tap;
pub mod value;
pub mod wire;

pub use error::{ProtocolError, Result};
pub use opcode::Opcode;
pub use payload::PayloadCodec;
pub use request::{FieldEncoding, Request, RequestBuilder, write_request};
pub use response::{ReadBuffer, ResponseReader, Status};
pub use tap::{StreamTap, TapContext, TapFormat, TracingTap};
pub use value::{
    JsonObjectCodec, ObjectCodec, ObjectCodecError, Pair, SERIALIZED_MAGIC, Value, VersionedValue,
};
