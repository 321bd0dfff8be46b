//! Public client facade.
//!
//! [`Client`] is a cheap clonable handle onto a driver task (see
//! [`crate::connection`]). All methods funnel through the driver's command
//! channel, which serializes every outbound byte. The request/reply
//! multiplexer lives here: one lazily-created inbox subscription shared by
//! all requests, serialized by a mutex so replies can be matched to the
//! single in-flight leaf subject.

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex};

use tether_ident::Nuid;
use tether_proto::{HeaderMap, ServerInfo};

use crate::{
    connection::{Command, ConnectionDriver, Shared},
    errors::{Error, Result},
    message::Message,
    options::ClientOptions,
    status::{ClientState, StatusStream},
};

/// Default subject tree for request replies. A per-client unique segment is
/// appended at first use so separate clients never share an inbox.
pub const DEFAULT_INBOX_PREFIX: &str = "_INBOX";

/// A subscription's message stream.
///
/// Dropping the subscription without unsubscribing stops delivery: the
/// driver removes the registration when it first fails to push into the
/// stream. Explicit [`Client::unsubscribe`] is still the tidy way out.
#[derive(Debug)]
pub struct Subscription {
    sid: u64,
    subject: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    /// Client-assigned subscription id.
    #[must_use]
    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Subject filter this subscription was created with.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once unsubscribed or the client closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct InboxSub {
    root: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

/// Request-mux state: prefix configuration plus the shared inbox
/// subscription. The surrounding mutex is the request mutex - holding it is
/// what entitles a request to consume from `rx`.
#[derive(Debug)]
struct InboxState {
    prefix: String,
    custom: bool,
    sub: Option<InboxSub>,
}

/// Asynchronous publish/subscribe client.
///
/// Create with [`Client::new`] (requires a running tokio runtime), then
/// [`Client::connect`]. Clones share the same connection.
#[derive(Debug, Clone)]
pub struct Client {
    cmd_tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    nuid: Arc<StdMutex<Nuid>>,
    inbox: Arc<Mutex<InboxState>>,
    request_timeout: Duration,
}

impl Client {
    /// Build a client and spawn its driver task. No connection is made
    /// until [`Client::connect`].
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(128);
        let shared = Arc::new(Shared::new());
        let request_timeout = options.request_timeout;
        let inbox = InboxState {
            prefix: options.inbox_prefix.clone(),
            custom: options.inbox_prefix != DEFAULT_INBOX_PREFIX,
            sub: None,
        };

        let (driver, _decoders) =
            ConnectionDriver::new(options, shared.clone(), cmd_tx.clone(), cmd_rx);
        tokio::spawn(driver.run());

        Self {
            cmd_tx,
            shared,
            nuid: Arc::new(StdMutex::new(Nuid::new())),
            inbox: Arc::new(Mutex::new(inbox)),
            request_timeout,
        }
    }

    /// Build a client with default options and connect it.
    ///
    /// # Errors
    ///
    /// Fails when the URL is invalid or every connection attempt failed.
    pub async fn connect_to(url: &str) -> Result<Self> {
        let client = Self::new(ClientOptions::default());
        client.connect(url).await?;
        Ok(client)
    }

    /// Connect to `url` (`nats://`, `tls://`, `ws://`, or `wss://`).
    ///
    /// Resolves after the first successful handshake, or with the last
    /// error once the retry attempts are exhausted. A client connects once
    /// for its lifetime; subsequent calls fail.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidUrl`] / [`Error::UnsupportedScheme`] for bad URLs,
    /// [`Error::AlreadyConnected`] on reuse, [`Error::TlsMismatch`] /
    /// [`Error::Tls`] for fatal TLS problems, and the last transport or
    /// handshake error otherwise.
    pub async fn connect(&self, url: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Connect { url: url.to_string(), reply: tx }).await?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Subscribe to a subject (wildcards `*` and `>` allowed).
    ///
    /// Works before `connect`: the subscription installs on the server right
    /// after the handshake, before any buffered publishes flush.
    ///
    /// # Errors
    ///
    /// Fails only when the client is closed.
    pub async fn subscribe(&self, subject: impl Into<String>) -> Result<Subscription> {
        self.subscribe_inner(subject.into(), None).await
    }

    /// Subscribe as a member of `queue_group`; the server delivers each
    /// matching message to one member per group.
    ///
    /// # Errors
    ///
    /// Fails only when the client is closed.
    pub async fn subscribe_queue(
        &self,
        subject: impl Into<String>,
        queue_group: impl Into<String>,
    ) -> Result<Subscription> {
        self.subscribe_inner(subject.into(), Some(queue_group.into())).await
    }

    async fn subscribe_inner(
        &self,
        subject: String,
        queue_group: Option<String>,
    ) -> Result<Subscription> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            subject: subject.clone(),
            queue_group,
            connection_scoped: false,
            reply: tx,
        })
        .await?;
        let (sid, messages) = rx.await.map_err(|_| Error::Closed)?;
        Ok(Subscription { sid, subject, rx: messages })
    }

    /// Remove a subscription. `Ok(false)` when it was already gone -
    /// unsubscribing twice is harmless.
    ///
    /// # Errors
    ///
    /// Fails only when the client is closed.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<bool> {
        self.unsubscribe_sid(subscription.sid).await
    }

    /// Remove a subscription by id. See [`Client::unsubscribe`].
    ///
    /// # Errors
    ///
    /// Fails only when the client is closed.
    pub async fn unsubscribe_sid(&self, sid: u64) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Unsubscribe { sid, reply: tx }).await?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Publish `payload` to `subject`.
    ///
    /// Resolves `true` once written (or buffered while disconnected),
    /// `false` when refused. With verbose mode on, resolves with the
    /// server's ack verdict instead.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after close, [`Error::ConnectionLost`] when the
    /// transport dies mid-write.
    pub async fn publish(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<bool> {
        self.publish_inner(subject.into(), None, None, payload.into(), true).await
    }

    /// Publish a UTF-8 payload. See [`Client::publish`].
    ///
    /// # Errors
    ///
    /// As [`Client::publish`].
    pub async fn publish_string(
        &self,
        subject: impl Into<String>,
        payload: impl AsRef<str>,
    ) -> Result<bool> {
        self.publish_inner(
            subject.into(),
            None,
            None,
            Bytes::copy_from_slice(payload.as_ref().as_bytes()),
            true,
        )
        .await
    }

    /// Publish with a reply subject for out-of-band request/reply.
    ///
    /// # Errors
    ///
    /// As [`Client::publish`].
    pub async fn publish_with_reply(
        &self,
        subject: impl Into<String>,
        reply_to: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<bool> {
        self.publish_inner(subject.into(), Some(reply_to.into()), None, payload.into(), true).await
    }

    /// Publish with a header block (`HPUB` framing).
    ///
    /// # Errors
    ///
    /// As [`Client::publish`].
    pub async fn publish_with_headers(
        &self,
        subject: impl Into<String>,
        headers: HeaderMap,
        payload: impl Into<Bytes>,
    ) -> Result<bool> {
        self.publish_inner(subject.into(), None, Some(headers), payload.into(), true).await
    }

    /// Publish without the pre-connect buffer: resolves `false` instead of
    /// buffering when there is no connection.
    ///
    /// # Errors
    ///
    /// As [`Client::publish`].
    pub async fn try_publish(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<bool> {
        self.publish_inner(subject.into(), None, None, payload.into(), false).await
    }

    async fn publish_inner(
        &self,
        subject: String,
        reply_to: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
        buffer_if_disconnected: bool,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Publish {
            subject,
            reply_to,
            headers,
            payload,
            buffer_if_disconnected,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Publish a request and await its reply, using the configured default
    /// timeout.
    ///
    /// # Errors
    ///
    /// As [`Client::request_timeout`].
    pub async fn request(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<Message> {
        self.request_with_timeout(subject, payload, self.request_timeout).await
    }

    /// Publish a request and await its reply.
    ///
    /// Requests share one inbox subscription and run one at a time (a mutex
    /// serializes them). Each request publishes with a unique reply leaf
    /// under the shared inbox root and consumes inbox messages until its
    /// leaf arrives; replies to stale requests are discarded.
    ///
    /// # Errors
    ///
    /// [`Error::RequestTimeout`] on expiry, [`Error::ConnectionLost`] when
    /// the transport is lost or the client closes mid-request,
    /// [`Error::NotConnected`] when the request could not even be buffered.
    pub async fn request_with_timeout(
        &self,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Message> {
        let subject = subject.into();
        let payload = payload.into();

        // Request mutex: held until return, released on every path by drop.
        let mut inbox = self.inbox.lock().await;
        self.ensure_inbox(&mut inbox).await?;
        let Some(sub) = inbox.sub.as_mut() else {
            return Err(Error::NotConnected);
        };

        let leaf = format!("{}.{}", sub.root, self.next_id());
        let accepted =
            self.publish_inner(subject, Some(leaf.clone()), None, payload, true).await?;
        if !accepted {
            return Err(Error::NotConnected);
        }

        let reply = tokio::time::timeout(timeout, async {
            loop {
                match sub.rx.recv().await {
                    Some(message) if message.subject == leaf => return Ok(message),
                    Some(message) => {
                        tracing::debug!(subject = %message.subject, "discarding stale inbox reply");
                    },
                    // The driver ends this stream on transport loss and on
                    // close; either way the request is over.
                    None => return Err(Error::ConnectionLost),
                }
            }
        })
        .await
        .map_err(|_| Error::RequestTimeout)?;

        if reply.is_err() {
            // The stream ended with the connection; the next request builds
            // a fresh inbox under a fresh root.
            inbox.sub = None;
        }
        reply
    }

    async fn ensure_inbox(&self, inbox: &mut InboxState) -> Result<()> {
        // The inbox subscription is connection-scoped: a transport loss ends
        // its stream, so a closed one here is stale and gets replaced.
        if let Some(sub) = &inbox.sub {
            if !sub.rx.is_closed() {
                return Ok(());
            }
            inbox.sub = None;
        }
        let base = if inbox.custom {
            inbox.prefix.clone()
        } else {
            format!("{}.{}", inbox.prefix, self.next_id())
        };
        let root = format!("{base}.{}", self.next_id());

        let (tx, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            subject: format!("{root}.>"),
            queue_group: None,
            connection_scoped: true,
            reply: tx,
        })
        .await?;
        let (_sid, messages) = rx.await.map_err(|_| Error::Closed)?;
        inbox.sub = Some(InboxSub { root, rx: messages });
        Ok(())
    }

    /// Change the inbox prefix. Allowed only before the first request; a
    /// custom prefix is used verbatim, so the caller owns its uniqueness.
    ///
    /// # Errors
    ///
    /// [`Error::InboxPrefixInUse`] once the inbox subscription exists.
    pub async fn set_inbox_prefix(&self, prefix: impl Into<String>) -> Result<()> {
        let mut inbox = self.inbox.lock().await;
        if inbox.sub.is_some() {
            return Err(Error::InboxPrefixInUse);
        }
        inbox.prefix = prefix.into();
        inbox.custom = true;
        Ok(())
    }

    /// Measure round-trip latency with a `PING`.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] without an established connection;
    /// [`Error::ConnectionLost`] when the transport dies first.
    pub async fn ping(&self) -> Result<Duration> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Ping { reply: tx }).await?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Current connection state.
    #[must_use]
    pub fn status(&self) -> ClientState {
        self.shared.status.get()
    }

    /// Stream of state transitions, starting with the current state.
    #[must_use]
    pub fn status_stream(&self) -> StatusStream {
        self.shared.status.subscribe()
    }

    /// Wait until the client reaches `target` (returns immediately if it is
    /// already there). Returns quietly if the client goes away first.
    pub async fn wait_until(&self, target: ClientState) {
        let mut stream = self.status_stream();
        while let Some(state) = stream.next().await {
            if state == target {
                return;
            }
        }
    }

    /// Latest `INFO` received from the server, if any.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.info()
    }

    /// Maximum payload the server accepts, from the current `INFO`. The
    /// client does not enforce this; oversize publishes are the server's to
    /// reject.
    #[must_use]
    pub fn max_payload(&self) -> Option<usize> {
        self.shared.info().map(|info| info.max_payload)
    }

    /// Close the client. Terminal: pending publishes are dropped, waiters
    /// fail with a close error, subscription streams end. The instance will
    /// not reconnect.
    pub async fn close(&self) {
        self.close_inner(false).await;
    }

    /// Close and additionally disable the retry flag first, so no racing
    /// reconnect attempt survives.
    pub async fn force_close(&self) {
        self.close_inner(true).await;
    }

    async fn close_inner(&self, force: bool) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Close { force, reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| Error::Closed)
    }

    fn next_id(&self) -> String {
        self.nuid.lock().unwrap_or_else(|e| e.into_inner()).next()
    }
}
