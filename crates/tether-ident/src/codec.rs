//! Seed/key text codec.
//!
//! Key material travels as unpadded base-32 with a typed prefix and a
//! CRC-16 footer:
//!
//! ```text
//! key  = base32( prefix_byte || key_bytes || crc16_le )
//! seed = base32( b1 || b2 || seed_bytes || crc16_le )
//! ```
//!
//! For seeds, the two header bytes pack both the `Seed` role and the type of
//! the public key the seed derives, 5 bits to a base-32 character, so the
//! text reads `S` followed by the public type's letter (`SU…` for a user
//! seed):
//!
//! ```text
//! b1 = PREFIX_SEED | (public_prefix >> 5)
//! b2 = (public_prefix & 0x1F) << 3
//! ```
//!
//! The checksum makes the forms self-checking under manual copying; the
//! prefix makes pasting a seed where a public key belongs a typed error
//! rather than a silent misuse.

use data_encoding::BASE32_NOPAD;

use crate::{
    crc,
    errors::{IdentityError, Result},
    prefix::KeyPrefix,
};

/// Encode key bytes under a role prefix.
#[must_use]
pub fn encode(prefix: KeyPrefix, key: &[u8]) -> String {
    let mut raw = Vec::with_capacity(1 + key.len() + 2);
    raw.push(prefix.to_u8());
    raw.extend_from_slice(key);
    BASE32_NOPAD.encode(&crc::append(raw))
}

/// Encode a seed together with the public-key type it derives.
#[must_use]
pub fn encode_seed(public: KeyPrefix, seed: &[u8]) -> String {
    let b1 = KeyPrefix::Seed.to_u8() | (public.to_u8() >> 5);
    let b2 = (public.to_u8() & 0x1F) << 3;

    let mut raw = Vec::with_capacity(2 + seed.len() + 2);
    raw.push(b1);
    raw.push(b2);
    raw.extend_from_slice(seed);
    BASE32_NOPAD.encode(&crc::append(raw))
}

/// Decode a key text form, requiring the given role.
///
/// # Errors
///
/// Fails on bad base-32, a short decode, a checksum mismatch, an unknown
/// prefix byte, or a role other than `expected`.
pub fn decode(expected: KeyPrefix, text: &str) -> Result<Vec<u8>> {
    let content = decode_checked(text, 1)?;
    let found = KeyPrefix::from_u8(content[0])?;
    if found != expected {
        return Err(IdentityError::PrefixMismatch { expected, found });
    }
    Ok(content[1..].to_vec())
}

/// Decode a key text form of any recognized role.
///
/// Used by signature verification, where the caller hands over whatever
/// public key text it was given.
///
/// # Errors
///
/// Fails on bad base-32, a short decode, a checksum mismatch, or an unknown
/// prefix byte.
pub fn decode_any(text: &str) -> Result<(KeyPrefix, Vec<u8>)> {
    let content = decode_checked(text, 1)?;
    let prefix = KeyPrefix::from_u8(content[0])?;
    Ok((prefix, content[1..].to_vec()))
}

/// Decode a seed text form into its embedded public-key type and seed bytes.
///
/// # Errors
///
/// Fails like [`decode`], plus when the first header byte is not the seed
/// role or the embedded type is not a public role.
pub fn decode_seed(text: &str) -> Result<(KeyPrefix, Vec<u8>)> {
    let content = decode_checked(text, 2)?;

    let b1 = content[0];
    let b2 = content[1];
    if b1 & 0xF8 != KeyPrefix::Seed.to_u8() {
        return Err(IdentityError::PrefixMismatch {
            expected: KeyPrefix::Seed,
            found: KeyPrefix::from_u8(b1 & 0xF8)?,
        });
    }

    let public_byte = ((b1 & 0x07) << 5) | (b2 >> 3);
    let public = KeyPrefix::from_u8(public_byte)
        .map_err(|_| IdentityError::NonPublicSeedType(public_byte))?;
    if !public.is_public() {
        return Err(IdentityError::NonPublicSeedType(public_byte));
    }

    Ok((public, content[2..].to_vec()))
}

/// Base-32 decode, verify the CRC footer, and require a minimum header size.
fn decode_checked(text: &str, min_header: usize) -> Result<Vec<u8>> {
    let raw = BASE32_NOPAD
        .decode(text.as_bytes())
        .map_err(|_| IdentityError::InvalidEncoding)?;

    let (content, expected, computed) =
        crc::strip_verified(&raw).ok_or(IdentityError::TooShort { actual: raw.len() })?;
    if expected != computed {
        return Err(IdentityError::ChecksumMismatch { expected, computed });
    }
    if content.len() < min_header {
        return Err(IdentityError::TooShort { actual: raw.len() });
    }
    Ok(content.to_vec())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn user_key_text_starts_with_u() {
        let text = encode(KeyPrefix::User, &[7u8; 32]);
        assert!(text.starts_with('U'), "got {text}");
        assert_eq!(decode(KeyPrefix::User, &text).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn user_seed_text_starts_with_su() {
        let text = encode_seed(KeyPrefix::User, &[9u8; 32]);
        assert!(text.starts_with("SU"), "got {text}");
        let (public, seed) = decode_seed(&text).unwrap();
        assert_eq!(public, KeyPrefix::User);
        assert_eq!(seed, vec![9u8; 32]);
    }

    #[test]
    fn role_mismatch_is_detected() {
        let text = encode(KeyPrefix::Account, &[1u8; 32]);
        assert_eq!(
            decode(KeyPrefix::User, &text),
            Err(IdentityError::PrefixMismatch {
                expected: KeyPrefix::User,
                found: KeyPrefix::Account,
            })
        );
    }

    #[test]
    fn corrupted_text_fails_checksum() {
        let mut text = encode(KeyPrefix::User, &[3u8; 32]).into_bytes();
        // Flip one character in the middle to another alphabet member.
        let mid = text.len() / 2;
        text[mid] = if text[mid] == b'A' { b'B' } else { b'A' };
        let text = String::from_utf8(text).unwrap();
        assert!(matches!(
            decode(KeyPrefix::User, &text),
            Err(IdentityError::ChecksumMismatch { .. }) | Err(IdentityError::InvalidEncoding)
        ));
    }

    #[test]
    fn seed_with_private_type_rejected() {
        // Hand-pack a seed whose embedded type is Private.
        let private = KeyPrefix::Private.to_u8();
        let b1 = KeyPrefix::Seed.to_u8() | (private >> 5);
        let b2 = (private & 0x1F) << 3;
        let mut raw = vec![b1, b2];
        raw.extend_from_slice(&[0u8; 32]);
        let text = BASE32_NOPAD.encode(&crate::crc::append(raw));

        assert!(matches!(decode_seed(&text), Err(IdentityError::NonPublicSeedType(_))));
    }

    #[test]
    fn garbage_is_rejected_not_panicked() {
        assert!(decode_seed("not base32 at all!").is_err());
        assert!(decode(KeyPrefix::User, "").is_err());
        assert!(decode(KeyPrefix::User, "AAAA").is_err());
    }

    proptest! {
        #[test]
        fn seed_round_trip(seed in proptest::collection::vec(any::<u8>(), 32)) {
            let text = encode_seed(KeyPrefix::User, &seed);
            let (public, decoded) = decode_seed(&text).unwrap();
            prop_assert_eq!(public, KeyPrefix::User);
            prop_assert_eq!(decoded, seed);
        }
    }
}
