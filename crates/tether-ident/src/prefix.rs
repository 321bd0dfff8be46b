//! Typed prefix bytes for key text forms.
//!
//! Every encoded key starts with a prefix byte naming the key's role. The
//! byte values are chosen so that the first base-32 character of the encoded
//! form spells the role: `O`perator, `N` (server), `C`luster, `A`ccount,
//! `U`ser, `P`rivate, and `S`eed.

use crate::errors::{IdentityError, Result};

/// Role of a key, encoded as the first byte of its text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyPrefix {
    /// Account keys (text forms start with `A`).
    Account = 0,
    /// Cluster keys (`C`).
    Cluster = 2 << 3,
    /// Server keys (`N`).
    Server = 13 << 3,
    /// Operator keys (`O`).
    Operator = 14 << 3,
    /// Private keys (`P`).
    Private = 15 << 3,
    /// Seeds (`S`).
    Seed = 18 << 3,
    /// User keys (`U`).
    User = 20 << 3,
}

impl KeyPrefix {
    /// Raw prefix byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a raw prefix byte.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UnknownPrefix`] for unassigned byte values.
    pub const fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Account),
            16 => Ok(Self::Cluster),
            104 => Ok(Self::Server),
            112 => Ok(Self::Operator),
            120 => Ok(Self::Private),
            144 => Ok(Self::Seed),
            160 => Ok(Self::User),
            other => Err(IdentityError::UnknownPrefix(other)),
        }
    }

    /// Whether this role may appear as the embedded key type of a seed.
    ///
    /// Seeds derive *public* identities; `Private` and `Seed` itself are not
    /// valid embedded types.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Account | Self::Cluster | Self::Server | Self::Operator | Self::User)
    }
}
