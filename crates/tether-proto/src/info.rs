//! Server `INFO` document.
//!
//! The first thing a server sends on every connection attempt is a single
//! `INFO <json>` line advertising its identity and the features the client
//! may rely on. Unknown fields are ignored so newer servers never break the
//! client.

use serde::{Deserialize, Serialize};

/// Server-advertised configuration, received once per connection attempt.
///
/// All fields default when absent; a minimal `{}` document is valid. The
/// fields the connection logic actually consumes are `tls_required`,
/// `nonce`, `max_payload`, and `headers` - the rest is surfaced to callers
/// for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Unique identifier of this server instance.
    #[serde(default)]
    pub server_id: String,

    /// Configured name of this server.
    #[serde(default)]
    pub server_name: String,

    /// Server software version.
    #[serde(default)]
    pub version: String,

    /// Toolchain the server was built with.
    #[serde(default)]
    pub go: String,

    /// Host the server listens on.
    #[serde(default)]
    pub host: String,

    /// Port the server listens on.
    #[serde(default)]
    pub port: u16,

    /// Maximum payload size the server accepts, in bytes.
    #[serde(default)]
    pub max_payload: usize,

    /// Protocol revision spoken by the server.
    #[serde(default)]
    pub proto: i32,

    /// Connection-scoped client id assigned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u64>,

    /// The client IP as observed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// Single-use challenge to be signed during an authenticated handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Whether the server demands credentials in `CONNECT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,

    /// Whether the server requires a TLS upgrade before `CONNECT`.
    #[serde(default)]
    pub tls_required: bool,

    /// Whether the server can speak TLS if the client asks for it.
    #[serde(default)]
    pub tls_available: bool,

    /// Whether the server understands `HPUB`/`HMSG` header framing.
    #[serde(default)]
    pub headers: bool,

    /// Other cluster members the client may connect to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connect_urls: Vec<String>,

    /// Whether the server exposes persistent-stream features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jetstream: Option<bool>,
}
