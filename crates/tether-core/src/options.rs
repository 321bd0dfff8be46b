//! Client configuration.
//!
//! Plain data with a `Default`; tweak fields or use the chainable setters.
//! Everything here is read once - either at `connect` time (credentials,
//! TLS) or continuously by the driver (retry policy).

use std::{sync::Arc, time::Duration};

use crate::decoders::DecoderRegistry;

/// Settings for a [`Client`](crate::Client).
pub struct ClientOptions {
    /// Connection name advertised to the server.
    pub name: Option<String>,

    /// Ask the server to ack every command; publishes then resolve with the
    /// server's verdict instead of resolving immediately.
    pub verbose: bool,

    /// Ask the server for strict subject validation.
    pub pedantic: bool,

    /// Whether the server should deliver this client's own publishes back to
    /// its matching subscriptions.
    pub echo: bool,

    /// Reconnect automatically after a lost connection.
    pub retry: bool,

    /// Pause between connection attempts.
    pub retry_interval: Duration,

    /// Failed attempts tolerated per (re)connect before giving up;
    /// `-1` retries forever.
    pub retry_count: i32,

    /// Per-attempt timeout covering transport open and handshake reads.
    pub connect_timeout: Duration,

    /// Default timeout for [`Client::request`](crate::Client::request).
    pub request_timeout: Duration,

    /// Subject tree for request replies. The default (`_INBOX`) gets a
    /// per-client unique segment appended at first use; a custom prefix is
    /// trusted verbatim.
    pub inbox_prefix: String,

    /// Bound on the pre-connect publish buffer; `None` is unbounded.
    /// Publishing against a full buffer resolves `false`.
    pub max_pending_publishes: Option<usize>,

    /// Seed (`SU…`) for nonce-signing authentication.
    pub seed: Option<String>,

    /// User JWT to send alongside the nonce signature.
    pub jwt: Option<String>,

    /// Username credential.
    pub user: Option<String>,

    /// Password credential.
    pub pass: Option<String>,

    /// Token credential.
    pub auth_token: Option<String>,

    /// Refuse to proceed on a connection the server will not upgrade to TLS.
    pub tls_required: bool,

    /// TLS configuration override; defaults to the bundled webpki roots.
    pub tls_config: Option<Arc<rustls::ClientConfig>>,

    /// Ask the server to flag requests that have no responders.
    pub no_responders: bool,

    /// Typed payload decoders; see [`DecoderRegistry`].
    pub decoders: DecoderRegistry,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: None,
            verbose: false,
            pedantic: false,
            echo: true,
            retry: true,
            retry_interval: Duration::from_secs(3),
            retry_count: -1,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            inbox_prefix: crate::client::DEFAULT_INBOX_PREFIX.to_string(),
            max_pending_publishes: None,
            seed: None,
            jwt: None,
            user: None,
            pass: None,
            auth_token: None,
            tls_required: false,
            tls_config: None,
            no_responders: false,
            decoders: DecoderRegistry::new(),
        }
    }
}

impl ClientOptions {
    /// Set the advertised connection name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Enable or disable verbose command acknowledgements.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Configure the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: bool, interval: Duration, count: i32) -> Self {
        self.retry = retry;
        self.retry_interval = interval;
        self.retry_count = count;
        self
    }

    /// Authenticate with a seed, signing the server nonce during handshake.
    #[must_use]
    pub fn seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    /// Authenticate with username and password.
    #[must_use]
    pub fn user_pass(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    /// Register a payload decoder for `T`.
    #[must_use]
    pub fn decoder<T, F>(mut self, decode: F) -> Self
    where
        T: std::any::Any + Send,
        F: Fn(&[u8]) -> crate::errors::Result<T> + Send + Sync + 'static,
    {
        self.decoders.register::<T, F>(decode);
        self
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(secret: &Option<String>) -> Option<&'static str> {
            secret.as_ref().map(|_| "<redacted>")
        }

        f.debug_struct("ClientOptions")
            .field("name", &self.name)
            .field("verbose", &self.verbose)
            .field("pedantic", &self.pedantic)
            .field("echo", &self.echo)
            .field("retry", &self.retry)
            .field("retry_interval", &self.retry_interval)
            .field("retry_count", &self.retry_count)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("inbox_prefix", &self.inbox_prefix)
            .field("max_pending_publishes", &self.max_pending_publishes)
            .field("seed", &redact(&self.seed))
            .field("jwt", &redact(&self.jwt))
            .field("user", &self.user)
            .field("pass", &redact(&self.pass))
            .field("auth_token", &redact(&self.auth_token))
            .field("tls_required", &self.tls_required)
            .field("no_responders", &self.no_responders)
            .field("decoders", &self.decoders)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let opts = ClientOptions::default()
            .seed("SUACSSL3UAHUDXKFSNVUZRF5UHPMWZ6BFDTJ7M6USDXIEDNPPQYYYCU3VY")
            .user_pass("joe", "hunter2");
        let rendered = format!("{opts:?}");
        assert!(!rendered.contains("SUACSSL3"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("joe"));
    }
}
