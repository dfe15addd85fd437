//! Content containers and the serializers that turn them into payloads.
//!
//! Serializers work on a neutral `serde_json::Value` document; the typed step
//! (document -> declared input type) is performed by the operation's
//! [`TypeTag`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::payload::{Payload, TypeTag};

/// Header naming the encoding of a [`Content`] body.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

pub const JSON_CONTENT_TYPE: &str = "application/json";

pub const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";

// ---------------------------------------------------------------------------
// SerializerError
// ---------------------------------------------------------------------------

/// Errors from encoding or decoding operation values.
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("unsupported content type '{content_type}', expected '{expected}'")]
    UnsupportedContentType {
        content_type: String,
        expected: &'static str,
    },
    #[error("value has type {actual}, expected {expected}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("failed to read content stream: {0}")]
    Stream(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// String-to-string header map with case-insensitive keys.
///
/// Keys are stored lower-cased, so headers built by the framework and headers
/// supplied by callers compare the same regardless of spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, returning the previous value for the same key.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.as_ref().to_ascii_lowercase(), value.into())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&key.to_ascii_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&key.to_ascii_lowercase())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates headers in key order. Keys are lower-case.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Headers> for BTreeMap<String, String> {
    fn from(headers: Headers) -> Self {
        headers.0
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// A header map plus an optional body, as produced and consumed by serializers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub headers: Headers,
    /// Request or response body. `None` means empty.
    #[serde(default, with = "serde_bytes")]
    pub data: Option<Vec<u8>>,
}

impl Content {
    #[must_use]
    pub fn new(headers: Headers, data: Option<Vec<u8>>) -> Self {
        Self { headers, data }
    }

    fn body(&self) -> Option<&[u8]> {
        self.data.as_deref().filter(|d| !d.is_empty())
    }

    fn check_content_type(&self, expected: &'static str) -> Result<(), SerializerError> {
        match self.headers.get(CONTENT_TYPE_HEADER) {
            Some(ct) if !ct.trim_start().starts_with(expected) => {
                Err(SerializerError::UnsupportedContentType {
                    content_type: ct.to_string(),
                    expected,
                })
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Serializer
// ---------------------------------------------------------------------------

/// Encodes values into [`Content`] and decodes them back.
pub trait Serializer: Send + Sync {
    /// Encodes a document into content.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be represented in this format.
    fn serialize(&self, value: &serde_json::Value) -> Result<Content, SerializerError>;

    /// Decodes content into a document. Empty content decodes to `null`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is malformed or has a foreign content type.
    fn deserialize(&self, content: &Content) -> Result<serde_json::Value, SerializerError>;

    /// Encodes a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    fn serialize_payload(&self, payload: &Payload) -> Result<Content, SerializerError> {
        self.serialize(&payload.to_document()?)
    }

    /// Decodes content into a payload of the given type. With no type, the
    /// payload holds the raw `serde_json::Value`.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails or the document does not match the type.
    fn deserialize_as(
        &self,
        content: &Content,
        as_type: Option<&TypeTag>,
    ) -> Result<Payload, SerializerError> {
        let document = self.deserialize(content)?;
        match as_type {
            Some(tag) => tag.decode(document),
            None => Ok(Payload::new(document)),
        }
    }
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<Content, SerializerError> {
        let mut headers = Headers::new();
        headers.insert(CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE);
        Ok(Content::new(headers, Some(serde_json::to_vec(value)?)))
    }

    fn deserialize(&self, content: &Content) -> Result<serde_json::Value, SerializerError> {
        content.check_content_type(JSON_CONTENT_TYPE)?;
        match content.body() {
            Some(body) => Ok(serde_json::from_slice(body)?),
            None => Ok(serde_json::Value::Null),
        }
    }
}

/// `MsgPack` serializer backed by `rmp-serde`. Maps are encoded with field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<Content, SerializerError> {
        let mut headers = Headers::new();
        headers.insert(CONTENT_TYPE_HEADER, MSGPACK_CONTENT_TYPE);
        Ok(Content::new(headers, Some(rmp_serde::to_vec_named(value)?)))
    }

    fn deserialize(&self, content: &Content) -> Result<serde_json::Value, SerializerError> {
        content.check_content_type(MSGPACK_CONTENT_TYPE)?;
        match content.body() {
            Some(body) => Ok(rmp_serde::from_slice(body)?),
            None => Ok(serde_json::Value::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        name: String,
        times: u32,
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(
            headers.insert("content-TYPE", "text/plain").as_deref(),
            Some("application/json")
        );
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn json_serializer_decodes_declared_type() {
        let greeting = Greeting {
            name: "ada".to_string(),
            times: 2,
        };
        let content = JsonSerializer
            .serialize_payload(&Payload::new(greeting.clone()))
            .unwrap();
        assert_eq!(content.headers.get(CONTENT_TYPE_HEADER), Some(JSON_CONTENT_TYPE));

        let payload = JsonSerializer
            .deserialize_as(&content, Some(&TypeTag::of::<Greeting>()))
            .unwrap();
        assert_eq!(payload.downcast::<Greeting>().unwrap(), greeting);
    }

    #[test]
    fn msgpack_serializer_decodes_declared_type() {
        let greeting = Greeting {
            name: "grace".to_string(),
            times: 9,
        };
        let content = MsgPackSerializer
            .serialize_payload(&Payload::new(greeting.clone()))
            .unwrap();
        let payload = MsgPackSerializer
            .deserialize_as(&content, Some(&TypeTag::of::<Greeting>()))
            .unwrap();
        assert_eq!(payload.downcast::<Greeting>().unwrap(), greeting);
    }

    #[test]
    fn empty_content_decodes_to_null() {
        let content = Content::default();
        assert_eq!(JsonSerializer.deserialize(&content).unwrap(), serde_json::Value::Null);
        let unit = JsonSerializer
            .deserialize_as(&content, Some(&TypeTag::of::<()>()))
            .unwrap();
        assert!(unit.is::<()>());
    }

    #[test]
    fn untyped_deserialize_yields_raw_document() {
        let content = Content::new(Headers::new(), Some(b"{\"a\":1}".to_vec()));
        let payload = JsonSerializer.deserialize_as(&content, None).unwrap();
        assert_eq!(
            payload.downcast::<serde_json::Value>().unwrap(),
            serde_json::json!({ "a": 1 })
        );
    }

    #[test]
    fn foreign_content_type_is_rejected() {
        let content = MsgPackSerializer.serialize(&serde_json::json!(1)).unwrap();
        let err = JsonSerializer.deserialize(&content).unwrap_err();
        assert!(matches!(
            err,
            SerializerError::UnsupportedContentType { expected: JSON_CONTENT_TYPE, .. }
        ));
    }

    proptest! {
        #[test]
        fn header_lookup_ignores_case(key in "[A-Za-z][A-Za-z0-9-]{0,15}", value in ".*") {
            let mut headers = Headers::new();
            headers.insert(&key, value.clone());
            prop_assert_eq!(headers.get(&key.to_ascii_uppercase()), Some(value.as_str()));
            prop_assert_eq!(headers.get(&key.to_ascii_lowercase()), Some(value.as_str()));
            prop_assert!(headers.iter().all(|(k, _)| k == k.to_ascii_lowercase()));
        }
    }
}
