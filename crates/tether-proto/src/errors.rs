//! Error types for wire protocol parsing and rendering.
//!
//! All errors are structured and testable. Unknown inbound command words are
//! NOT errors - the decoder drops them silently so that protocol extensions
//! never break an older client. Errors here mean a *recognized* command was
//! framed in a way we cannot honour.

use thiserror::Error;

/// Protocol-level errors raised by the codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A recognized command line did not match its expected token layout.
    #[error("malformed {op} line: {line:?}")]
    Malformed {
        /// Command word the line started with
        op: &'static str,
        /// The offending line (lossy UTF-8)
        line: String,
    },

    /// A length field on a `MSG`/`HMSG` line was not a decimal integer.
    #[error("invalid {field} in {op} line: {value:?}")]
    InvalidLength {
        /// Command word the line started with
        op: &'static str,
        /// Which length field failed to parse
        field: &'static str,
        /// The token that failed to parse (lossy UTF-8)
        value: String,
    },

    /// A subject or reply token was not valid UTF-8.
    #[error("non-UTF-8 {field} token in {op} line")]
    InvalidToken {
        /// Command word the line started with
        op: &'static str,
        /// Which token was invalid
        field: &'static str,
    },

    /// A payload was not terminated by `\r\n`.
    ///
    /// The length field is the framing authority; if the two bytes after the
    /// payload are anything but CRLF the stream is desynchronized and the
    /// connection must be torn down.
    #[error("payload not terminated by CRLF")]
    MissingCrlf,

    /// The header block length exceeded the total length on an `HMSG` line.
    #[error("header length {header} exceeds total length {total}")]
    HeaderOverrun {
        /// Declared header block length
        header: usize,
        /// Declared total (header + payload) length
        total: usize,
    },

    /// The `INFO` JSON document failed to parse.
    #[error("malformed INFO document: {0}")]
    MalformedInfo(String),

    /// The `CONNECT` options document failed to serialize.
    #[error("failed to encode CONNECT options: {0}")]
    EncodeConnect(String),
}

/// Convenient Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
