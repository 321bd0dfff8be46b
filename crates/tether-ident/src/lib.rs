//! Identity material for the tether client.
//!
//! Three small, independent facilities:
//!
//! - [`KeyPair`]: Ed25519 key pairs derived from a typed, checksummed,
//!   human-copy-safe seed text, used to sign server nonces during the
//!   authenticated handshake.
//! - [`Nuid`]: a fast generator of 22-character collision-resistant
//!   identifiers, used for inbox roots and per-request reply subjects.
//! - The seed/key text codec itself ([`codec`]), shared by `KeyPair` and
//!   anything that needs to round-trip key material through text.
//!
//! Nothing here performs I/O; entropy comes from the OS RNG at construction
//! time only.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod crc;
pub mod errors;
pub mod keypair;
pub mod nuid;
pub mod prefix;

pub use errors::{IdentityError, Result};
pub use keypair::KeyPair;
pub use nuid::Nuid;
pub use prefix::KeyPrefix;
