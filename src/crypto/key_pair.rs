//! Schnorr signature key pairs on secp256k1.

use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{SigningKey, VerifyingKey};
use rand_core::OsRng;

/// Private key for signing spend authorizations.
///
/// Generated using cryptographically secure randomness from the OS.
/// Never serialized or transmitted.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

/// Public key for signature verification.
///
/// Travels through data bags as the lowercase hex of the 32-byte x-only
/// verifying key, which doubles as the owner key of the UTXO indexes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
}

/// A 64-byte Schnorr signature, hex-encoded inside input spend data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Signature(k256::schnorr::Signature);

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        let mut rng = OsRng;
        Self {
            key: SigningKey::random(&mut rng),
        }
    }

    /// Creates a private key from raw bytes.
    ///
    /// Returns `None` if the bytes do not represent a valid scalar for
    /// secp256k1.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        SigningKey::from_bytes(bytes).ok().map(|key| Self { key })
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: *self.key.verifying_key(),
        }
    }

    /// Signs arbitrary data, producing a Schnorr signature.
    pub fn sign(&self, data: &[u8]) -> Signature {
        Signature(self.key.sign(data))
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicKey {
    /// Parses a public key from its hex string form.
    pub fn from_hex(s: &str) -> Option<PublicKey> {
        let bytes = hex::decode(s).ok()?;
        VerifyingKey::from_bytes(&bytes).ok().map(|key| PublicKey { key })
    }

    /// Returns the lowercase hex form used inside data bags and indexes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    /// Verifies a Schnorr signature against the given data.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        self.key.verify(data, &signature.0).is_ok()
    }
}

impl Signature {
    /// Parses a signature from its hex string form.
    pub fn from_hex(s: &str) -> Option<Signature> {
        let bytes = hex::decode(s).ok()?;
        k256::schnorr::Signature::try_from(bytes.as_slice())
            .ok()
            .map(Signature)
    }

    /// Returns the lowercase hex form embedded in input spend data.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_success() {
        let private = PrivateKey::new();
        let public = private.public_key();

        let data = b"Hello World";
        let signature = private.sign(data);
        assert!(public.verify(data, &signature));
    }

    #[test]
    fn verify_fails_with_wrong_key() {
        let private = PrivateKey::new();
        let other = PrivateKey::new();

        let data = b"Hello World";
        let signature = other.sign(data);
        assert!(!private.public_key().verify(data, &signature));
    }

    #[test]
    fn verify_fails_with_tampered_data() {
        let private = PrivateKey::new();
        let signature = private.sign(b"original");
        assert!(!private.public_key().verify(b"tampered", &signature));
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let public = PrivateKey::new().public_key();
        let hex = public.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(PublicKey::from_hex(&hex), Some(public));
    }

    #[test]
    fn signature_hex_roundtrip() {
        let private = PrivateKey::new();
        let data = b"roundtrip";
        let signature = private.sign(data);
        let restored = Signature::from_hex(&signature.to_hex()).unwrap();
        assert!(private.public_key().verify(data, &restored));
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(PublicKey::from_hex("zzzz").is_none());
        assert!(PublicKey::from_hex("ab").is_none());
        assert!(Signature::from_hex("not a signature").is_none());
    }

    #[test]
    fn from_bytes_is_deterministic() {
        let bytes = [7u8; 32];
        let key1 = PrivateKey::from_bytes(&bytes).unwrap();
        let key2 = PrivateKey::from_bytes(&bytes).unwrap();
        assert_eq!(key1.public_key(), key2.public_key());
    }

    #[test]
    fn from_bytes_rejects_zero_scalar() {
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_none());
    }
}
