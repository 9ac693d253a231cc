//! Canonical serialization helpers.
//!
//! Every entity and storage record has exactly one byte form: its JSON
//! encoding. Struct fields appear in declaration order and payload keys are
//! sorted, so the encoding is deterministic and reusable for hashing and
//! size accounting.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::types::hash::Hash;

/// Errors produced by strict entity deserialization.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The input was not valid JSON for the target type, or a required
    /// field was missing.
    #[error("malformed record: {0}")]
    Malformed(String),
    /// The embedded `id` field does not match the hash recomputed from the
    /// decoded fields.
    #[error("embedded id {embedded} does not match recomputed id {computed}")]
    IdMismatch { embedded: Hash, computed: Hash },
}

/// Renders a value into its canonical byte form.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical JSON encoding cannot fail")
}

/// Strictly decodes a value from its canonical byte form.
///
/// Entities verify their embedded IDs during deserialization, so a
/// successful decode implies internal consistency.
pub fn from_canonical_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_identity() {
        let value = vec![1u64, 2, 3];
        let bytes = to_canonical_vec(&value);
        let back: Vec<u64> = from_canonical_slice(&bytes).unwrap();
        assert_eq!(back, value);
        assert_eq!(to_canonical_vec(&back), bytes);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let result: Result<Vec<u64>, _> = from_canonical_slice(b"{not json");
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }
}
