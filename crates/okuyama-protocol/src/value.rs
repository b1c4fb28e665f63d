//! Stored value model and the object codec collaborator

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Prefix identifying a payload produced by an [`ObjectCodec`]
pub const SERIALIZED_MAGIC: [u8; 2] = [0xAC, 0xED];

/// A value as stored in, or read back from, the store
///
/// A missing key is `None` at the API level, so `Text(String::new())` is a
/// real stored empty string.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 text
    Text(String),
    /// Structured value carried through the object codec
    Object(serde_json::Value),
    /// Bytes that are neither UTF-8 text nor a decodable object
    Bytes(Vec<u8>),
}

impl Value {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Wrap any serializable type as an object value
    pub fn object<T: Serialize>(value: &T) -> Result<Self, ObjectCodecError> {
        Ok(Self::Object(serde_json::to_value(value)?))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
            Self::Object(_) => &[],
        }
    }

    /// Read an object value back into a concrete type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ObjectCodecError> {
        match self {
            Self::Object(object) => Ok(T::deserialize(object)?),
            Self::Text(text) => Ok(T::deserialize(serde_json::Value::String(text.clone()))?),
            Self::Bytes(_) => Err(ObjectCodecError::NotAnObject),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Value {
    fn from(object: serde_json::Value) -> Self {
        Self::Object(object)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Object(object) => write!(f, "{object}"),
            Self::Bytes(bytes) => write!(f, "0x{}", hex::encode(bytes)),
        }
    }
}

/// A value together with the version token the server attached to it
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    value: Value,
    version: String,
}

impl VersionedValue {
    pub fn new(value: Value, version: impl Into<String>) -> Self {
        Self {
            value,
            version: version.into(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Opaque token to hand back on a versioned write
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn into_parts(self) -> (Value, String) {
        (self.value, self.version)
    }
}

/// Key/value tuple produced by tag scans
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Error)]
pub enum ObjectCodecError {
    #[error("serialized object does not start with [AC ED]")]
    MissingMagic,

    #[error("value is raw bytes, not an object")]
    NotAnObject,

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Converts structured values to and from magic-prefixed byte payloads
pub trait ObjectCodec: Send + Sync + fmt::Debug {
    /// Serialize; the output must start with [`SERIALIZED_MAGIC`]
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, ObjectCodecError>;

    /// Deserialize a payload that starts with [`SERIALIZED_MAGIC`]
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, ObjectCodecError>;
}

/// Object codec writing the magic prefix followed by compact JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonObjectCodec;

impl ObjectCodec for JsonObjectCodec {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, ObjectCodecError> {
        let mut out = SERIALIZED_MAGIC.to_vec();
        serde_json::to_writer(&mut out, value)?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, ObjectCodecError> {
        let body = bytes
            .strip_prefix(&SERIALIZED_MAGIC)
            .ok_or(ObjectCodecError::MissingMagic)?;
        Ok(serde_json::from_slice(body)?)
    }
}
