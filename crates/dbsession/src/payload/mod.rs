//! Read-only inspection of serialized session payloads.
//!
//! The host environment owns the payload format; this module only decodes
//! a copy of it to find out whether a session carries the authentication
//! marker. Decoding never touches the store and never fails loudly: an
//! empty or malformed payload is an empty field map.

mod php;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::PayloadError;

/// Decoded session variables, by name.
pub type Fields = BTreeMap<String, PayloadValue>;

/// A decoded session value.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Ordered key/value pairs.
    Array(Vec<(PayloadKey, PayloadValue)>),
    Object {
        class: String,
        fields: Vec<(PayloadKey, PayloadValue)>,
    },
    /// Object with a class-defined serialization; the body is kept raw.
    Custom { class: String, data: Vec<u8> },
    /// Enum case as `Class:Case`.
    Enum(String),
    /// Back-reference to an earlier value.
    Reference(i64),
}

impl PayloadValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PayloadValue::Null)
    }

    /// Convert to JSON for display.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        let object = |entries: &[(PayloadKey, PayloadValue)]| {
            Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            )
        };

        match self {
            PayloadValue::Null => Value::Null,
            PayloadValue::Bool(b) => Value::Bool(*b),
            PayloadValue::Int(i) => Value::from(*i),
            PayloadValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            PayloadValue::String(s) | PayloadValue::Enum(s) => Value::String(s.clone()),
            PayloadValue::Array(entries) => object(entries.as_slice()),
            PayloadValue::Object { class, fields } => {
                serde_json::json!({ "__class": class, "fields": object(fields.as_slice()) })
            }
            PayloadValue::Custom { class, data } => serde_json::json!({
                "__class": class,
                "data": String::from_utf8_lossy(data),
            }),
            PayloadValue::Reference(n) => serde_json::json!({ "__ref": n }),
        }
    }
}

impl From<serde_json::Value> for PayloadValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => PayloadValue::Null,
            Value::Bool(b) => PayloadValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PayloadValue::Int(i),
                None => PayloadValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => PayloadValue::String(s),
            Value::Array(items) => PayloadValue::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (PayloadKey::Int(i as i64), v.into()))
                    .collect(),
            ),
            Value::Object(map) => PayloadValue::Array(
                map.into_iter()
                    .map(|(k, v)| (PayloadKey::Str(k), v.into()))
                    .collect(),
            ),
        }
    }
}

/// Array key: PHP arrays mix integer and string keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKey::Int(i) => write!(f, "{i}"),
            PayloadKey::Str(s) => f.write_str(s),
        }
    }
}

/// Turns a raw payload into named fields.
pub trait PayloadCodec: Send + Sync {
    /// Decode a non-empty payload.
    fn decode(&self, payload: &[u8]) -> Result<Fields, PayloadError>;
}

/// The `php` session serialize handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhpSessionCodec;

impl PayloadCodec for PhpSessionCodec {
    fn decode(&self, payload: &[u8]) -> Result<Fields, PayloadError> {
        php::decode_session(payload)
    }
}

/// The `php_serialize` session serialize handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhpSerializeCodec;

impl PayloadCodec for PhpSerializeCodec {
    fn decode(&self, payload: &[u8]) -> Result<Fields, PayloadError> {
        php::decode_serialized(payload)
    }
}

/// Payload stored as a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn decode(&self, payload: &[u8]) -> Result<Fields, PayloadError> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(payload)
            .map_err(|e| PayloadError::new(e.column().saturating_sub(1), e.to_string()))?;
        Ok(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Built-in codecs, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Php,
    PhpSerialize,
    Json,
}

impl CodecKind {
    pub fn codec(self) -> Box<dyn PayloadCodec> {
        match self {
            CodecKind::Php => Box::new(PhpSessionCodec),
            CodecKind::PhpSerialize => Box::new(PhpSerializeCodec),
            CodecKind::Json => Box::new(JsonCodec),
        }
    }
}

/// Decodes payloads and detects the authentication marker.
pub struct PayloadInspector {
    codec: Box<dyn PayloadCodec>,
    marker_key: Option<String>,
}

impl fmt::Debug for PayloadInspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadInspector")
            .field("marker_key", &self.marker_key)
            .finish_non_exhaustive()
    }
}

impl PayloadInspector {
    /// Create an inspector. An empty `marker_key` disables classification.
    pub fn new(codec: Box<dyn PayloadCodec>, marker_key: Option<String>) -> Self {
        Self {
            codec,
            marker_key: marker_key.filter(|k| !k.is_empty()),
        }
    }

    /// The configured marker field, if classification is enabled.
    pub fn marker_key(&self) -> Option<&str> {
        self.marker_key.as_deref()
    }

    /// Decode strictly, reporting malformed payloads.
    pub fn try_decode(&self, payload: &[u8]) -> Result<Fields, PayloadError> {
        if payload.is_empty() {
            return Ok(Fields::new());
        }
        self.codec.decode(payload)
    }

    /// Decode, treating malformed payloads as empty.
    pub fn decode(&self, payload: &[u8]) -> Fields {
        self.try_decode(payload).unwrap_or_else(|e| {
            trace!(error = %e, "Undecodable session payload");
            Fields::new()
        })
    }

    /// Whether the payload carries a non-null marker field.
    pub fn is_authenticated(&self, payload: &[u8]) -> bool {
        match &self.marker_key {
            None => false,
            Some(key) => self
                .decode(payload)
                .get(key)
                .is_some_and(|value| !value.is_null()),
        }
    }
}
