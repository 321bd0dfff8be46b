//! Inbound (server → client) operations.

use bytes::Bytes;

use crate::{HeaderMap, ServerInfo};

/// A decoded server operation.
///
/// Produced by [`crate::Decoder`]; one value per complete wire command.
/// Payload bytes are handed out as [`Bytes`] slices of the receive buffer,
/// exactly as received - the codec never copies or escapes payload content.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerOp {
    /// `INFO <json>` - server identity and capabilities.
    Info(ServerInfo),

    /// `MSG` - a message delivered to subscription `sid`.
    Msg {
        /// Subject the message was published to
        subject: String,
        /// Subscription the server matched
        sid: u64,
        /// Reply subject, when the publisher requested one
        reply_to: Option<String>,
        /// Raw payload bytes
        payload: Bytes,
    },

    /// `HMSG` - a message with a header block.
    HMsg {
        /// Subject the message was published to
        subject: String,
        /// Subscription the server matched
        sid: u64,
        /// Reply subject, when the publisher requested one
        reply_to: Option<String>,
        /// Parsed header block
        headers: HeaderMap,
        /// Raw payload bytes (header block excluded)
        payload: Bytes,
    },

    /// `PING` - answer with `PONG` while connected.
    Ping,

    /// `PONG` - completes the oldest outstanding latency probe.
    Pong,

    /// `+OK` - verbose-mode acknowledgement.
    Ok,

    /// `-ERR <reason>` - server-reported error, quotes stripped.
    Err(String),
}
