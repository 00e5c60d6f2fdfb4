//! Opaque layout document bytes.
//!
//! The core never interprets a payload. It is stored and returned byte for
//! byte. The only place its content matters is the JSON wire encoding:
//!
//! - a payload that is exactly one JSON document (no surrounding whitespace)
//!   is embedded as-is
//! - anything else, including a JSON document shaped like the wrapper below,
//!   is sent as `{"$bytes": "<base64>"}`
//!
//! Decoding reverses both, so every byte sequence survives the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

const BYTES_FIELD: &str = "$bytes";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EncodedBytes {
    #[serde(rename = "$bytes")]
    bytes: String,
}

// Derived structs also accept sequences; only an object is the wrapper.
fn as_encoded_bytes(raw: &RawValue) -> Option<EncodedBytes> {
    if !raw.get().starts_with('{') {
        return None;
    }
    serde_json::from_str(raw.get()).ok()
}

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the payload as a raw JSON value, if it is exactly one.
    pub fn as_json(&self) -> Option<&RawValue> {
        serde_json::from_slice::<&RawValue>(&self.0)
            .ok()
            .filter(|raw| raw.get().len() == self.0.len())
    }
}

impl core::fmt::Debug for Payload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(text) if text.len() <= 64 => write!(f, "Payload({text:?})"),
            _ => write!(f, "Payload({} bytes)", self.0.len()),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_json() {
            Some(raw) if as_encoded_bytes(raw).is_none() => raw.serialize(serializer),
            _ => {
                let mut wrapper = serializer.serialize_struct("Payload", 1)?;
                wrapper.serialize_field(BYTES_FIELD, &STANDARD.encode(&self.0))?;
                wrapper.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        match as_encoded_bytes(&raw) {
            Some(encoded) => STANDARD
                .decode(encoded.bytes)
                .map(Self)
                .map_err(|e| D::Error::custom(format!("invalid {BYTES_FIELD} payload: {e}"))),
            None => Ok(Self(raw.get().as_bytes().to_vec())),
        }
    }
}
