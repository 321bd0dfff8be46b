//! Error types for identity material handling.

use thiserror::Error;

use crate::prefix::KeyPrefix;

/// Errors raised while decoding or using key material.
///
/// These are always surfaced to the caller of the specific operation; they
/// never affect an established connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The text form was not valid unpadded base-32.
    #[error("key text is not valid base-32")]
    InvalidEncoding,

    /// The decoded data was too short to hold a prefix, key, and checksum.
    #[error("key text too short: {actual} bytes")]
    TooShort {
        /// Decoded byte count
        actual: usize,
    },

    /// The prefix byte does not name a known key role.
    #[error("unknown key prefix byte: {0:#04x}")]
    UnknownPrefix(u8),

    /// A seed's embedded public-key type was not a public role.
    #[error("seed carries non-public key type: {0:#04x}")]
    NonPublicSeedType(u8),

    /// The CRC-16 footer did not match the decoded content.
    #[error("checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch {
        /// Checksum carried in the text form
        expected: u16,
        /// Checksum computed over the decoded content
        computed: u16,
    },

    /// The caller asked for one key role but the text decodes to another.
    #[error("expected {expected:?} key, found {found:?}")]
    PrefixMismatch {
        /// Role the caller requested
        expected: KeyPrefix,
        /// Role actually encoded
        found: KeyPrefix,
    },

    /// The key bytes have the wrong length for Ed25519.
    #[error("invalid key length: {actual} bytes, expected {expected}")]
    InvalidKeyLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },
}

/// Convenient Result alias for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
