//! Asynchronous publish/subscribe client over the tether wire protocol.
//!
//! The client speaks the line-oriented NATS text protocol over TCP, TLS, or
//! WebSocket, maintains a durable subscription set across reconnects,
//! buffers publishes while disconnected, and layers a request/reply pattern
//! over a shared inbox subject tree.
//!
//! # Architecture
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ Client (facade, clonable)    │
//!      │  pub / sub / request / ping  │
//!      └──────────────┬───────────────┘
//!                     │ command channel
//!      ┌──────────────▼───────────────┐
//!      │ ConnectionDriver (one task)  │
//!      │  state machine · registry    │
//!      │  pending buffer · ack FIFO   │
//!      └──────┬───────────────▲───────┘
//!             │ ClientOp      │ ServerOp
//!      ┌──────▼───────────────┴───────┐
//!      │ tether-proto codec           │
//!      └──────┬───────────────▲───────┘
//!             │ bytes         │ bytes
//!      ┌──────▼───────────────┴───────┐
//!      │ Transport (TCP / TLS / WS)   │
//!      └──────────────────────────────┘
//! ```
//!
//! The driver task is the single reader and single writer of the transport;
//! every user-facing call resolves through a oneshot completer it fills in.
//! Protocol parsing and identity material live in the sibling crates
//! [`tether_proto`] and [`tether_ident`].
//!
//! # Example
//!
//! ```no_run
//! use tether_core::{Client, ClientOptions};
//!
//! # async fn demo() -> tether_core::Result<()> {
//! let client = Client::new(ClientOptions::default());
//! client.connect("nats://127.0.0.1:4222").await?;
//!
//! let mut sub = client.subscribe("greet.*").await?;
//! client.publish_string("greet.joe", "hello").await?;
//!
//! if let Some(message) = sub.recv().await {
//!     println!("{}: {}", message.subject, message.payload_str());
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod decoders;
pub mod errors;
pub mod message;
pub mod options;
pub mod status;
pub mod transport;

mod connection;
mod subscriptions;

pub use client::{Client, Subscription, DEFAULT_INBOX_PREFIX};
pub use decoders::DecoderRegistry;
pub use errors::{Error, Result};
pub use message::Message;
pub use options::ClientOptions;
pub use status::{ClientState, StatusStream};
pub use transport::{Scheme, ServerAddr};

// Re-exported so callers can build headers and inspect INFO without naming
// the proto crate.
pub use tether_proto::{HeaderMap, ServerInfo};
