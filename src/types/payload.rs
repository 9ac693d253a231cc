//! Opaque JSON data bags attached to outputs, inputs and blocks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::codec;

/// An opaque bag of named fields carried by ledger entities.
///
/// Outputs use it for ownership data (a `publicKey` field and/or a `contract`
/// field), inputs for spend data (a `signature` field), and blocks for
/// consensus data. The engine never interprets fields beyond those three;
/// everything else passes through untouched and is committed to by the
/// owning entity's ID.
///
/// The canonical byte form is the JSON encoding with lexicographically
/// sorted keys, which makes IDs and the fee metric independent of field
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns `true` if the payload carries no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Inserts a field, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the raw value of a field, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// The hex-encoded owner key of an output, when present.
    pub fn public_key(&self) -> Option<&str> {
        self.get_str("publicKey")
    }

    /// The contract attached to an output, when present.
    pub fn contract(&self) -> Option<&str> {
        self.get_str("contract")
    }

    /// The hex-encoded spend signature of an input, when present.
    pub fn signature(&self) -> Option<&str> {
        self.get_str("signature")
    }

    /// Canonical byte rendering: JSON with sorted keys.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        codec::to_canonical_vec(self)
    }

    /// Length in bytes of the canonical rendering, used by the fee floor.
    pub fn byte_len(&self) -> u64 {
        self.canonical_bytes().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_an_empty_object() {
        let p = Payload::new();
        assert!(p.is_empty());
        assert_eq!(p.canonical_bytes(), b"{}");
        assert_eq!(p.byte_len(), 2);
    }

    #[test]
    fn canonical_bytes_sort_keys() {
        let a = Payload::new().with("b", 2).with("a", 1);
        let b = Payload::new().with("a", 1).with("b", 2);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
        assert_eq!(a.canonical_bytes(), br#"{"a":1,"b":2}"#);
    }

    #[test]
    fn typed_accessors() {
        let p = Payload::new()
            .with("publicKey", "ab12")
            .with("contract", "return true")
            .with("signature", "cd34");
        assert_eq!(p.public_key(), Some("ab12"));
        assert_eq!(p.contract(), Some("return true"));
        assert_eq!(p.signature(), Some("cd34"));
    }

    #[test]
    fn accessors_ignore_non_string_values() {
        let p = Payload::new().with("publicKey", 7);
        assert!(p.public_key().is_none());
        assert!(p.get("publicKey").is_some());
    }

    #[test]
    fn missing_fields_are_none() {
        let p = Payload::new().with("other", "x");
        assert!(p.public_key().is_none());
        assert!(p.contract().is_none());
        assert!(p.signature().is_none());
    }

    #[test]
    fn serde_is_transparent() {
        let p = Payload::new().with("publicKey", "ff00");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"publicKey":"ff00"}"#);
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn insert_replaces_existing_field() {
        let mut p = Payload::new().with("k", "old");
        p.insert("k", "new");
        assert_eq!(p.get("k").and_then(Value::as_str), Some("new"));
    }
}
