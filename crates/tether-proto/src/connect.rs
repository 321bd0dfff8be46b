//! Client `CONNECT` document.
//!
//! Sent exactly once per connection attempt, after `INFO` (and after the TLS
//! upgrade when one happens). Credentials travel only in this document, never
//! in URLs. Absent options are omitted from the JSON rather than emitted as
//! `null` - some servers reject explicit nulls.

use serde::{Deserialize, Serialize};

/// Client-advertised settings serialized after the `CONNECT` keyword.
///
/// # Security
///
/// The `Debug` impl redacts every credential field so connection options can
/// be logged without leaking secrets.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Ask the server to ack every command with `+OK`/`-ERR`.
    pub verbose: bool,

    /// Ask the server for strict subject checking.
    pub pedantic: bool,

    /// Whether this client insists on a TLS transport.
    pub tls_required: bool,

    /// Token credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Username credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,

    /// Signed user JWT credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,

    /// Public key identifying the signing key pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nkey: Option<String>,

    /// Base-64 signature over the server nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,

    /// Client connection name, shown in server monitoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Implementation language of this client.
    pub lang: String,

    /// Version of this client library.
    pub version: String,

    /// Protocol revision the client speaks.
    pub protocol: i32,

    /// Whether the server should echo this client's own publishes back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<bool>,

    /// Whether the client understands `HMSG` header framing.
    pub headers: bool,

    /// Ask the server to synthesize a status reply when a request has no
    /// responders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_responders: Option<bool>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            tls_required: false,
            auth_token: None,
            user: None,
            pass: None,
            jwt: None,
            nkey: None,
            sig: None,
            name: None,
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: 1,
            echo: None,
            headers: true,
            no_responders: None,
        }
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(secret: &Option<String>) -> Option<String> {
            secret.as_ref().map(|s| format!("<redacted {} bytes>", s.len()))
        }

        f.debug_struct("ConnectOptions")
            .field("verbose", &self.verbose)
            .field("pedantic", &self.pedantic)
            .field("tls_required", &self.tls_required)
            .field("auth_token", &redact(&self.auth_token))
            .field("user", &self.user)
            .field("pass", &redact(&self.pass))
            .field("jwt", &redact(&self.jwt))
            .field("nkey", &self.nkey)
            .field("sig", &redact(&self.sig))
            .field("name", &self.name)
            .field("lang", &self.lang)
            .field("version", &self.version)
            .field("protocol", &self.protocol)
            .field("echo", &self.echo)
            .field("headers", &self.headers)
            .field("no_responders", &self.no_responders)
            .finish()
    }
}
