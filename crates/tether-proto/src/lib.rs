//! Wire protocol layer for the tether client.
//!
//! The protocol is line-oriented text framing binary payloads: every command
//! is a single `\r\n`-terminated ASCII line, and the `MSG`/`HMSG`/`PUB`/`HPUB`
//! families append a raw payload (terminated by another `\r\n`) directly after
//! the command line. Payload bytes are never escaped; the length fields on the
//! command line are the only framing.
//!
//! # Architecture
//!
//! This crate is pure logic with no I/O:
//!
//! - [`ServerOp`] / [`ClientOp`]: typed inbound/outbound operations
//! - [`Decoder`]: incremental pull parser over a [`bytes::BytesMut`]
//!   accumulator owned by the driver
//! - [`HeaderMap`]: the `NATS/1.0` header block codec
//! - [`ServerInfo`] / [`ConnectOptions`]: the JSON documents exchanged during
//!   the handshake
//!
//! The connection driver in `tether-core` owns the socket, feeds received
//! bytes into the accumulator, and calls [`Decoder::decode`] until it returns
//! `None`. Outbound operations are rendered with [`ClientOp::encode`] into the
//! write buffer. Keeping the codec free of I/O makes every framing edge case
//! (payloads containing `\r\n`, partial reads splitting a payload, interleaved
//! commands) directly testable without a socket.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client_op;
pub mod connect;
pub mod decoder;
pub mod errors;
pub mod headers;
pub mod info;
pub mod server_op;

pub use client_op::ClientOp;
pub use connect::ConnectOptions;
pub use decoder::Decoder;
pub use errors::{ProtocolError, Result};
pub use headers::HeaderMap;
pub use info::ServerInfo;
pub use server_op::ServerOp;

/// Line and payload terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Version line emitted at the start of every serialized header block.
pub const HEADER_VERSION: &str = "NATS/1.0";
