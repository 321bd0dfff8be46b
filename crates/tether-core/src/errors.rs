//! Error types for the client.
//!
//! Two propagation regimes coexist:
//!
//! - Errors the reconnect loop can recover from (transport loss, refused
//!   connections) are swallowed by the connection driver and reflected as
//!   state transitions on the status stream.
//! - Errors specific to a single user operation (a request timing out, a bad
//!   seed, a misuse of the facade) are returned to that caller and leave the
//!   connection untouched.

use thiserror::Error;

/// Errors surfaced by client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The server URL could not be parsed.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// The server URL carries a scheme this client does not speak.
    #[error("unsupported URL scheme: {0:?}")]
    UnsupportedScheme(String),

    /// A connection attempt did not complete within the per-attempt timeout.
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// Transport-level I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The TLS upgrade itself failed. Unrecoverable: retry is disabled and
    /// the client closes.
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    /// The client requires TLS but the server cannot provide it (or the
    /// transport cannot be upgraded). Unrecoverable.
    #[error("TLS required but not available on this connection")]
    TlsMismatch,

    /// The wire protocol was violated.
    #[error(transparent)]
    Protocol(#[from] tether_proto::ProtocolError),

    /// Key or seed material was rejected.
    #[error(transparent)]
    Identity(#[from] tether_ident::IdentityError),

    /// The server rejected the handshake with `-ERR`.
    #[error("handshake rejected by server: {0}")]
    AuthRejected(String),

    /// The operation needs an established connection.
    #[error("not connected")]
    NotConnected,

    /// The connection was lost while the operation was in flight.
    #[error("connection lost")]
    ConnectionLost,

    /// No reply arrived within the request timeout.
    #[error("request timed out")]
    RequestTimeout,

    /// The client is in its terminal closed state.
    #[error("client is closed")]
    Closed,

    /// `connect` was called on a client that has already been connected.
    /// A closed or disconnected client is not reusable; build a new one.
    #[error("client has already been connected")]
    AlreadyConnected,

    /// The inbox prefix can only be changed before the first request.
    #[error("inbox prefix cannot change once the inbox subscription exists")]
    InboxPrefixInUse,

    /// A message attempted to reply but carried no reply subject.
    #[error("message has no reply subject")]
    NoReplySubject,

    /// No payload decoder is registered for the requested type.
    #[error("no decoder registered for type {0}")]
    NoDecoder(&'static str),

    /// A registered decoder failed on this payload.
    #[error("payload decode failed: {0}")]
    DecodeFailed(String),
}

impl Error {
    /// True when this error must stop the retry loop and close the client.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Tls(_) | Self::TlsMismatch)
    }
}

/// Convenient Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
