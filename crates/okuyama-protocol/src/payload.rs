//! Value payload encoding: object codec, compression framing, text
//!
//! Outbound, a value becomes raw bytes (text as UTF-8, objects through the
//! [`ObjectCodec`]) and is then offered to the compression strategy.
//! Inbound, the reverse runs: compression frame, object magic, UTF-8.

use std::borrow::Cow;
use std::sync::Arc;

use okuyama_compression::{CompressionStrategy, CompressorRegistry, ThresholdStrategy};
use tracing::{trace, warn};

use crate::error::Result;
use crate::value::{JsonObjectCodec, ObjectCodec, ObjectCodecError, SERIALIZED_MAGIC, Value};

/// Encodes and decodes stored values; shared by every connection of a client
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    compressors: Arc<CompressorRegistry>,
    strategy: Arc<dyn CompressionStrategy>,
    objects: Arc<dyn ObjectCodec>,
    serialize_strings: bool,
}

impl PayloadCodec {
    pub fn new(
        compressors: Arc<CompressorRegistry>,
        strategy: Arc<dyn CompressionStrategy>,
        objects: Arc<dyn ObjectCodec>,
    ) -> Self {
        Self {
            compressors,
            strategy,
            objects,
            serialize_strings: false,
        }
    }

    /// Route text values through the object codec as well
    #[must_use]
    pub fn with_serialized_strings(mut self, enabled: bool) -> Self {
        self.serialize_strings = enabled;
        self
    }

    pub fn compressors(&self) -> &CompressorRegistry {
        &self.compressors
    }

    /// Bytes to store for `value` under `key`, before Base64
    pub fn encode(&self, key: &str, value: &Value) -> Result<Vec<u8>> {
        let plain: Cow<'_, [u8]> = match value {
            Value::Text(text) if !self.serialize_strings => Cow::Borrowed(text.as_bytes()),
            Value::Text(text) => {
                Cow::Owned(self.encode_object(&serde_json::Value::String(text.clone()))?)
            }
            Value::Object(object) => Cow::Owned(self.encode_object(object)?),
            Value::Bytes(bytes) => Cow::Borrowed(bytes),
        };

        match self.strategy.select(key, plain.len()) {
            Some(id) => {
                let framed = self.compressors.compress(id, &plain)?;
                trace!(
                    key,
                    compressor = %id,
                    plain_len = plain.len(),
                    framed_len = framed.len(),
                    "compressed value"
                );
                Ok(framed)
            }
            None => Ok(plain.into_owned()),
        }
    }

    /// Interpret Base64-decoded field bytes; empty means no value
    ///
    /// Objects that decode to a JSON string come back as [`Value::Text`].
    /// An object payload the codec cannot read is returned as
    /// [`Value::Bytes`] rather than failing the whole response.
    pub fn decode(&self, raw: &[u8]) -> Result<Option<Value>> {
        if raw.is_empty() {
            return Ok(None);
        }
        let plain = self.compressors.decode_payload(raw)?;

        if plain.starts_with(&SERIALIZED_MAGIC) {
            return Ok(Some(match self.objects.decode(&plain) {
                Ok(serde_json::Value::String(text)) => Value::Text(text),
                Ok(object) => Value::Object(object),
                Err(e) => {
                    warn!(error = %e, len = plain.len(), "undecodable serialized object");
                    Value::Bytes(plain.into_owned())
                }
            }));
        }

        Ok(Some(match String::from_utf8(plain.into_owned()) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        }))
    }

    fn encode_object(&self, object: &serde_json::Value) -> Result<Vec<u8>> {
        let bytes = self.objects.encode(object)?;
        if !bytes.starts_with(&SERIALIZED_MAGIC) {
            return Err(ObjectCodecError::MissingMagic.into());
        }
        Ok(bytes)
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(
            Arc::new(CompressorRegistry::with_defaults()),
            Arc::new(ThresholdStrategy::default()),
            Arc::new(JsonObjectCodec),
        )
    }
}
