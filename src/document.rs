//! Document identity and raw document types.
//!
//! Documents are JSON objects keyed by an `_id` field. The engine never
//! interprets document fields beyond `_id`; selectors and sort keys read
//! them through dotted paths.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ProjectionError;

/// Name of the identity field on every document.
pub const ID_FIELD: &str = "_id";

/// Opaque, stable identifier of a document in a collection.
///
/// Keeps the JSON type of the `_id` it was read from: `"1"` and `1` are
/// different documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(IdRepr);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum IdRepr {
    Text(String),
    /// Canonical JSON text of a numeric `_id`.
    Number(String),
}

impl DocumentId {
    /// Wrap a textual identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(IdRepr::Text(id.into()))
    }

    /// The identifier text. A numeric id yields its JSON text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match &self.0 {
            IdRepr::Text(s) | IdRepr::Number(s) => s,
        }
    }

    /// True when the id came from a numeric `_id`.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self.0, IdRepr::Number(_))
    }

    /// Read an identifier from a JSON `_id` value.
    pub fn from_json(value: &Value) -> Result<Self, ProjectionError> {
        match value {
            Value::String(s) => Ok(Self(IdRepr::Text(s.clone()))),
            Value::Number(n) => Ok(Self(IdRepr::Number(n.to_string()))),
            other => Err(ProjectionError::UnsupportedId {
                found: json_type_name(other),
            }),
        }
    }

    /// The `_id` value this identifier stands for.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match &self.0 {
            IdRepr::Text(s) => Value::String(s.clone()),
            IdRepr::Number(s) => s
                .parse::<serde_json::Number>()
                .map_or_else(|_| Value::String(s.clone()), Value::Number),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            IdRepr::Text(s) => f.write_str(s),
            IdRepr::Number(n) => write!(f, "#{n}"),
        }
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(de::Error::custom)
    }
}

/// Caller-supplied token scoping every event of one logical feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicationId(String);

impl PublicationId {
    /// Wrap a publication token.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the token is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PublicationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The full field set of a matched document, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDocument(Value);

impl RawDocument {
    /// Wrap a JSON value. No validation is performed.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON value.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume into the underlying JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Extract the document identity.
    pub fn id(&self) -> Result<DocumentId, ProjectionError> {
        let Value::Object(map) = &self.0 else {
            return Err(ProjectionError::NotAnObject {
                found: json_type_name(&self.0),
            });
        };
        let raw = map.get(ID_FIELD).ok_or(ProjectionError::MissingId)?;
        DocumentId::from_json(raw)
    }

    /// Look up a dotted field path.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.0, path)
    }
}

impl From<Value> for RawDocument {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Resolve a dotted path (`a.b.0.c`) against a JSON value.
///
/// Numeric segments index into arrays.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub(crate) const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
