//! Ed25519 key pairs with the typed text form.
//!
//! A [`KeyPair`] is deterministically derived from a 32-byte seed. During an
//! authenticated handshake the client signs the server's single-use nonce
//! and sends the base-64 signature (padding kept) in the `CONNECT` document
//! alongside the public key text.

use data_encoding::BASE64;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};

use crate::{
    codec,
    errors::{IdentityError, Result},
    prefix::KeyPrefix,
};

/// Length of an Ed25519 seed and public key, in bytes.
pub const KEY_LEN: usize = 32;

/// An Ed25519 key pair plus the role its text forms carry.
///
/// # Security
///
/// The `Debug` impl prints only the public key; the seed never appears in
/// logs.
#[derive(Clone)]
pub struct KeyPair {
    prefix: KeyPrefix,
    signing: SigningKey,
}

impl KeyPair {
    /// Derive a key pair from a seed text form (e.g. `SU…` for a user seed).
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] when the text is not a well-formed seed.
    pub fn from_seed(text: &str) -> Result<Self> {
        let (public, seed) = codec::decode_seed(text)?;
        Self::from_seed_bytes(public, &seed)
    }

    /// Derive a key pair from raw seed bytes and the role it should carry.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidKeyLength`] unless exactly 32 bytes.
    pub fn from_seed_bytes(prefix: KeyPrefix, seed: &[u8]) -> Result<Self> {
        let seed: [u8; KEY_LEN] = seed
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyLength { expected: KEY_LEN, actual: seed.len() })?;
        Ok(Self { prefix, signing: SigningKey::from_bytes(&seed) })
    }

    /// Generate a fresh key pair for the given role from the OS RNG.
    #[must_use]
    pub fn generate(prefix: KeyPrefix) -> Self {
        let mut seed = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut seed);
        Self { prefix, signing: SigningKey::from_bytes(&seed) }
    }

    /// Role of this key pair.
    #[must_use]
    pub fn prefix(&self) -> KeyPrefix {
        self.prefix
    }

    /// Public key in text form.
    #[must_use]
    pub fn public_key(&self) -> String {
        codec::encode(self.prefix, self.signing.verifying_key().as_bytes())
    }

    /// Seed in text form; round-trips through [`KeyPair::from_seed`].
    #[must_use]
    pub fn seed(&self) -> String {
        codec::encode_seed(self.prefix, &self.signing.to_bytes())
    }

    /// Sign `message`, returning the raw 64-byte signature.
    #[must_use]
    pub fn sign_raw(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Sign `message`, returning the base-64 signature (padding kept) as
    /// sent in the `CONNECT` document.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> String {
        BASE64.encode(&self.sign_raw(message))
    }

    /// Verify a base-64 signature against a public key text form.
    ///
    /// Decoded keys longer than 32 bytes are truncated to the expected
    /// length, tolerating text forms that carry extra trailing material.
    /// Any decoding failure verifies as `false` rather than erroring - a
    /// bad signature and an unparseable one are the same answer.
    #[must_use]
    pub fn verify(public_key: &str, message: &[u8], signature_b64: &str) -> bool {
        let Ok((_, raw)) = codec::decode_any(public_key) else {
            return false;
        };
        if raw.len() < KEY_LEN {
            return false;
        }
        let Ok(key_bytes) = <[u8; KEY_LEN]>::try_from(&raw[..KEY_LEN]) else {
            return false;
        };
        let Ok(verifying) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = BASE64.decode(signature_b64.as_bytes()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        verifying.verify(message, &signature).is_ok()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("prefix", &self.prefix)
            .field("public_key", &self.public_key())
            .field("seed", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vectors for a user seed; the derived public key, and a
    // signature over the UTF-8 bytes of a handshake nonce.
    const SEED: &str = "SUACSSL3UAHUDXKFSNVUZRF5UHPMWZ6BFDTJ7M6USDXIEDNPPQYYYCU3VY";
    const PUBLIC: &str = "UDXU4RCSJNZOIQHZNWXHXORDPRTGNJAHAHFRGZNEEJCPQTT2M7NLCNF4";
    const NONCE: &str = "DhXdTMAeiHhLDig";
    const SIGNATURE: &str =
        "WosANJXgeyxerXFo0twRiMG+/ZjYp1K/46bFeFax705yFTCTjM18jWl01gGYk4KKbadiHd+hP3WgUQ2iLZUAAA==";

    #[test]
    fn public_key_derivation_matches_vector() {
        let pair = KeyPair::from_seed(SEED).unwrap();
        assert_eq!(pair.public_key(), PUBLIC);
        assert_eq!(pair.prefix(), KeyPrefix::User);
    }

    #[test]
    fn seed_round_trips() {
        let pair = KeyPair::from_seed(SEED).unwrap();
        assert_eq!(pair.seed(), SEED);
    }

    #[test]
    fn nonce_signature_verifies_against_derived_key() {
        let pair = KeyPair::from_seed(SEED).unwrap();
        let sig = pair.sign(NONCE.as_bytes());
        assert!(KeyPair::verify(&pair.public_key(), NONCE.as_bytes(), &sig));
    }

    #[test]
    fn reference_signature_verifies() {
        assert!(KeyPair::verify(PUBLIC, NONCE.as_bytes(), SIGNATURE));
    }

    #[test]
    fn tampered_message_fails_verification() {
        assert!(!KeyPair::verify(PUBLIC, b"other nonce", SIGNATURE));
    }

    #[test]
    fn generated_pairs_round_trip_and_sign() {
        let pair = KeyPair::generate(KeyPrefix::User);
        let again = KeyPair::from_seed(&pair.seed()).unwrap();
        assert_eq!(again.public_key(), pair.public_key());

        let sig = pair.sign(b"payload");
        assert!(KeyPair::verify(&pair.public_key(), b"payload", &sig));
    }

    #[test]
    fn verify_tolerates_garbage_inputs() {
        assert!(!KeyPair::verify("not a key", NONCE.as_bytes(), SIGNATURE));
        assert!(!KeyPair::verify(PUBLIC, NONCE.as_bytes(), "not base64 !!!"));
    }

    #[test]
    fn debug_redacts_seed() {
        let pair = KeyPair::from_seed(SEED).unwrap();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(SEED));
        assert!(rendered.contains(PUBLIC));
    }
}
