//! 32-byte SHA3-256 hash type with zero-allocation operations.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;

/// SHA3-256 hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte hash used as the canonical ID of every ledger entity.
///
/// This type is `Copy` for performance - IDs are passed frequently during
/// block validation and should live on the stack to avoid heap allocations.
/// The JSON form is the lowercase hex string of the 32 bytes, which doubles
/// as the storage key for the entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Creates a zero-valued hash (all bytes are 0x00).
    ///
    /// Used as the previous-block sentinel of the genesis block.
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash> {
        if slice.len() != HASH_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    /// Parses a hash from its lowercase hex string form.
    pub fn from_hex(s: &str) -> Option<Hash> {
        hex::decode(s).ok().and_then(|b| Hash::from_slice(&b))
    }

    /// Creates a new SHA3-256 hash builder for incremental hashing.
    ///
    /// Use this for computing IDs over multiple inputs without intermediate
    /// allocations.
    pub fn sha3() -> HashBuilder {
        HashBuilder::new()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for Hash {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s).ok_or(())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).ok_or_else(|| D::Error::custom("expected a 64-character hex hash"))
    }
}

/// Incremental SHA3-256 hash builder.
///
/// Allows feeding data in chunks and finalizing to produce a [`Hash`].
pub struct HashBuilder {
    hasher: Sha3_256,
}

impl HashBuilder {
    /// Creates a new hash builder with empty state.
    pub fn new() -> Self {
        Self {
            hasher: Sha3_256::new(),
        }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hash(seed: &[u8]) -> Hash {
        Hash::sha3().chain(seed).finalize()
    }

    #[test]
    fn builder_is_deterministic() {
        assert_eq!(make_hash(b"abc"), make_hash(b"abc"));
        assert_ne!(make_hash(b"abc"), make_hash(b"abd"));
    }

    #[test]
    fn update_and_chain_agree() {
        let mut h = Hash::sha3();
        h.update(b"ab");
        h.update(b"cd");
        assert_eq!(h.finalize(), Hash::sha3().chain(b"ab").chain(b"cd").finalize());
    }

    #[test]
    fn display_is_lowercase_hex() {
        let hash = make_hash(b"display");
        let s = hash.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hex_roundtrip() {
        let hash = make_hash(b"roundtrip");
        assert_eq!(Hash::from_hex(&hash.to_string()), Some(hash));
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(Hash::from_hex("xyz").is_none());
        assert!(Hash::from_hex("abcd").is_none());
        assert!(Hash::from_hex(&"0".repeat(63)).is_none());
    }

    #[test]
    fn from_slice_requires_exact_length() {
        assert!(Hash::from_slice(&[0u8; 31]).is_none());
        assert!(Hash::from_slice(&[0u8; 33]).is_none());
        assert!(Hash::from_slice(&[0u8; 32]).is_some());
    }

    #[test]
    fn serde_roundtrip_as_hex_string() {
        let hash = make_hash(b"serde");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn serde_rejects_malformed_strings() {
        assert!(serde_json::from_str::<Hash>("\"not hex\"").is_err());
        assert!(serde_json::from_str::<Hash>("42").is_err());
    }

    #[test]
    fn zero_hash_is_all_zeroes() {
        assert!(Hash::zero().as_slice().iter().all(|&b| b == 0));
    }
}
