//! Test harness for the tether client.
//!
//! Provides [`Broker`], a small in-process server speaking the broker side
//! of the wire protocol over real TCP sockets on `127.0.0.1`. It implements
//! just enough semantics to exercise the client end to end:
//!
//! - `INFO` advertisement (with a nonce) and `CONNECT` validation,
//!   including optional key-pair authentication
//! - subject routing with `*`/`>` wildcards and queue groups
//! - `PUB`/`HPUB` → `MSG`/`HMSG` fan-out, honouring the client's `echo`
//!   setting
//! - verbose-mode `+OK` acknowledgements, matched to the commands the
//!   client expects acks for
//! - `PING`/`PONG`
//! - forcibly severing connections, for reconnect tests
//!
//! This is test scaffolding, not a server: no persistence, no clustering,
//! no flow control.

pub mod broker;
pub mod subjects;
pub mod wire;

pub use broker::{Broker, BrokerConfig};
