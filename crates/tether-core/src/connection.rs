//! Connection driver: state machine plus the task that runs it.
//!
//! One driver task per client owns everything mutable - the transport, the
//! subscription registry, the pre-connect publish buffer, and the ack/pong
//! FIFOs. The facade talks to it over a command channel; every command
//! carries a oneshot completer. This gives the whole client a single-writer,
//! single-reader discipline against the transport without any locking around
//! the registry or buffers.
//!
//! # State machine
//!
//! ```text
//!            connect()                INFO ok            CONNECT ok
//! Disconnected ──────> Connecting ──────────> InfoHandshake ─────> Connected
//!                          │        (TlsHandshake inserted when an │
//!                          │         in-place upgrade is required) │
//!                          │ retries exhausted     transport loss  │
//!                          ▼                                       ▼
//!                    Disconnected <──────────────────────── Disconnected
//!                                                                  │ retry on
//!                                                                  ▼
//!                                                            Reconnecting ──> …
//!
//! close() / fatal TLS failure from any state ──> Closed (terminal)
//! ```
//!
//! # Ordering
//!
//! - Outbound bytes are written in command order; the driver is the only
//!   writer.
//! - After every successful handshake, all registered subscriptions are
//!   re-installed *before* the pending publish buffer flushes, so a
//!   subscription created before `connect` observes buffered publishes to
//!   its subject.
//! - Verbose-mode acks are matched to ack-expecting commands (`CONNECT`,
//!   `PUB`/`HPUB`, `SUB`, `UNSUB`) strictly in FIFO order: every such
//!   command pushes a slot - a caller's completer, or a discard slot - and
//!   every `+OK`/`-ERR` pops one.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

use tether_ident::KeyPair;
use tether_proto::{ClientOp, ConnectOptions, Decoder, HeaderMap, ServerInfo, ServerOp};

use crate::{
    decoders::DecoderRegistry,
    errors::{Error, Result},
    message::Message,
    options::ClientOptions,
    status::{ClientState, StatusCell},
    subscriptions::{Delivery, SubRegistry},
    transport::{default_tls_config, Scheme, ServerAddr, Transport},
};

/// Commands the facade sends to the driver task.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        url: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Publish {
        subject: String,
        reply_to: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
        buffer_if_disconnected: bool,
        reply: oneshot::Sender<Result<bool>>,
    },
    Subscribe {
        subject: String,
        queue_group: Option<String>,
        // Connection-scoped subscriptions (the request inbox) are removed on
        // transport loss so consumers blocked on them observe the disconnect.
        connection_scoped: bool,
        reply: oneshot::Sender<(u64, mpsc::UnboundedReceiver<Message>)>,
    },
    Unsubscribe {
        sid: u64,
        reply: oneshot::Sender<bool>,
    },
    Ping {
        reply: oneshot::Sender<Result<Duration>>,
    },
    Close {
        force: bool,
        reply: oneshot::Sender<()>,
    },
}

/// State shared between the facade and the driver.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) status: StatusCell,
    pub(crate) info: std::sync::Mutex<Option<ServerInfo>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self { status: StatusCell::new(), info: std::sync::Mutex::new(None) }
    }

    pub(crate) fn info(&self) -> Option<ServerInfo> {
        self.info.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_info(&self, info: ServerInfo) {
        *self.info.lock().unwrap_or_else(|e| e.into_inner()) = Some(info);
    }
}

/// A publish held while disconnected, flushed FIFO after the handshake.
#[derive(Debug)]
struct PendingPublish {
    subject: String,
    reply_to: Option<String>,
    headers: Option<HeaderMap>,
    payload: Bytes,
}

/// Ack slot: `Some` resolves a caller, `None` is a discard slot for a
/// command whose ack nobody awaits (re-installed `SUB`s, flushed buffered
/// publishes).
type AckSlot = Option<oneshot::Sender<Result<bool>>>;

pub(crate) struct ConnectionDriver {
    opts: ClientOptions,
    shared: Arc<Shared>,
    decoders: Arc<DecoderRegistry>,

    cmd_rx: mpsc::Receiver<Command>,
    // Weak: a strong self-reference would keep `cmd_rx` open forever and
    // the driver task alive after every user handle is gone.
    cmd_tx: mpsc::WeakSender<Command>,

    registry: SubRegistry,
    pending: VecDeque<PendingPublish>,
    ack_waiters: VecDeque<AckSlot>,
    pong_waiters: VecDeque<(Instant, oneshot::Sender<Result<Duration>>)>,
    connect_waiter: Option<oneshot::Sender<Result<()>>>,

    transport: Option<Transport>,
    recv_buf: BytesMut,
    decoder: Decoder,

    addr: Option<ServerAddr>,
    retry_enabled: bool,
    reconnect_pending: bool,
    ever_connected: bool,
    closed: bool,
}

impl ConnectionDriver {
    pub(crate) fn new(
        mut opts: ClientOptions,
        shared: Arc<Shared>,
        cmd_tx: mpsc::Sender<Command>,
        cmd_rx: mpsc::Receiver<Command>,
    ) -> (Self, Arc<DecoderRegistry>) {
        let decoders = Arc::new(std::mem::take(&mut opts.decoders));
        let retry_enabled = opts.retry;
        let driver = Self {
            opts,
            shared,
            decoders: decoders.clone(),
            cmd_rx,
            cmd_tx: cmd_tx.downgrade(),
            registry: SubRegistry::new(),
            pending: VecDeque::new(),
            ack_waiters: VecDeque::new(),
            pong_waiters: VecDeque::new(),
            connect_waiter: None,
            transport: None,
            recv_buf: BytesMut::new(),
            decoder: Decoder::new(),
            addr: None,
            retry_enabled,
            reconnect_pending: false,
            ever_connected: false,
            closed: false,
        };
        (driver, decoders)
    }

    /// Event loop. Runs until the client closes or every handle is dropped.
    pub(crate) async fn run(mut self) {
        while !self.closed {
            if self.transport.is_none() && self.reconnect_pending {
                self.establish().await;
            } else if self.transport.is_some() {
                self.run_connected().await;
            } else {
                match self.cmd_rx.recv().await {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                }
            }
        }
        self.finish().await;
    }

    // ----- connection establishment -------------------------------------

    /// Attempt/retry loop for one `connect()` or reconnection episode.
    async fn establish(&mut self) {
        let Some(addr) = self.addr.clone() else {
            self.reconnect_pending = false;
            return;
        };

        let loop_state =
            if self.ever_connected { ClientState::Reconnecting } else { ClientState::Connecting };
        self.shared.status.set(loop_state);

        let mut retries_left = self.opts.retry_count;
        loop {
            if self.closed {
                return;
            }
            match self.try_connect_once(&addr).await {
                Ok(()) => {
                    self.reconnect_pending = false;
                    self.resolve_connect_waiter(Ok(()));
                    return;
                },
                Err(err) if err.is_fatal() => {
                    tracing::error!(error = %err, "unrecoverable handshake failure");
                    self.abort_attempt();
                    self.retry_enabled = false;
                    self.reconnect_pending = false;
                    self.closed = true;
                    self.shared.status.set(ClientState::Closed);
                    self.resolve_connect_waiter(Err(err));
                    return;
                },
                Err(err) => {
                    tracing::warn!(error = %err, "connection attempt failed");
                    self.abort_attempt();
                    if retries_left == 0 {
                        self.reconnect_pending = false;
                        self.shared.status.set(ClientState::Disconnected);
                        self.resolve_connect_waiter(Err(err));
                        return;
                    }
                    if retries_left > 0 {
                        retries_left -= 1;
                    }
                    self.shared.status.set(loop_state);
                    self.sleep_processing_commands(self.opts.retry_interval).await;
                },
            }
        }
    }

    /// One full attempt: open transport, INFO, optional TLS upgrade,
    /// CONNECT (+ ack in verbose mode), reinstall, flush.
    async fn try_connect_once(&mut self, addr: &ServerAddr) -> Result<()> {
        self.recv_buf.clear();
        self.decoder = Decoder::new();

        let attempt_timeout = self.opts.connect_timeout;
        let mut transport = tokio::time::timeout(attempt_timeout, Transport::open(addr))
            .await
            .map_err(|_| Error::ConnectTimeout)??;

        self.shared.status.set(ClientState::InfoHandshake);

        let info = loop {
            match self.read_op(&mut transport, attempt_timeout).await? {
                ServerOp::Info(info) => break info,
                op => tracing::debug!(?op, "ignoring pre-INFO operation"),
            }
        };

        let client_wants_tls = self.opts.tls_required || addr.scheme == Scheme::Tls;
        if self.opts.tls_required
            && !addr.scheme.is_encrypted()
            && !(info.tls_required || info.tls_available)
        {
            return Err(Error::TlsMismatch);
        }

        if transport.is_plain_tcp() && (client_wants_tls || info.tls_required) {
            self.shared.status.set(ClientState::TlsHandshake);
            let config = self.opts.tls_config.clone().unwrap_or_else(default_tls_config);
            transport = transport.upgrade_tls(&addr.host, config).await?;
            self.shared.status.set(ClientState::InfoHandshake);
        } else if info.tls_required && !addr.scheme.is_encrypted() {
            // Server demands TLS on a transport we cannot upgrade in place.
            return Err(Error::TlsMismatch);
        }

        let connect = self.connect_options(&info, client_wants_tls)?;
        let mut out = BytesMut::new();
        ClientOp::Connect(connect).encode(&mut out)?;
        transport.write_all(&out).await?;

        if self.opts.verbose {
            loop {
                match self.read_op(&mut transport, attempt_timeout).await? {
                    ServerOp::Ok => break,
                    ServerOp::Err(reason) => return Err(Error::AuthRejected(reason)),
                    ServerOp::Ping => {
                        let mut pong = BytesMut::new();
                        ClientOp::Pong.encode(&mut pong)?;
                        transport.write_all(&pong).await?;
                    },
                    op => tracing::debug!(?op, "ignoring operation while awaiting CONNECT ack"),
                }
            }
        }

        self.shared.set_info(info);
        self.ever_connected = true;
        self.shared.status.set(ClientState::Connected);

        // Order matters: SUBs before buffered PUBs, so pre-connect
        // subscriptions observe pre-connect publishes.
        self.reinstall_subscriptions(&mut transport).await?;
        self.flush_pending(&mut transport).await?;

        self.transport = Some(transport);
        Ok(())
    }

    fn connect_options(&self, info: &ServerInfo, tls_required: bool) -> Result<ConnectOptions> {
        let mut connect = ConnectOptions {
            verbose: self.opts.verbose,
            pedantic: self.opts.pedantic,
            tls_required,
            auth_token: self.opts.auth_token.clone(),
            user: self.opts.user.clone(),
            pass: self.opts.pass.clone(),
            jwt: self.opts.jwt.clone(),
            name: self.opts.name.clone(),
            echo: Some(self.opts.echo),
            no_responders: self.opts.no_responders.then_some(true),
            ..ConnectOptions::default()
        };
        if let Some(seed) = &self.opts.seed {
            let pair = KeyPair::from_seed(seed)?;
            connect.nkey = Some(pair.public_key());
            if let Some(nonce) = &info.nonce {
                connect.sig = Some(pair.sign(nonce.as_bytes()));
            }
        }
        Ok(connect)
    }

    /// Read one operation during the handshake, bounded by `timeout`.
    async fn read_op(&mut self, transport: &mut Transport, timeout: Duration) -> Result<ServerOp> {
        loop {
            if let Some(op) = self.decoder.decode(&mut self.recv_buf)? {
                return Ok(op);
            }
            let n = tokio::time::timeout(timeout, transport.read_buf(&mut self.recv_buf))
                .await
                .map_err(|_| Error::ConnectTimeout)?
                .map_err(Error::Transport)?;
            if n == 0 {
                return Err(Error::ConnectionLost);
            }
        }
    }

    async fn reinstall_subscriptions(&mut self, transport: &mut Transport) -> Result<()> {
        let mut out = BytesMut::new();
        let mut installed = 0usize;
        for (sid, entry) in self.registry.entries_mut() {
            if entry.installed {
                continue;
            }
            ClientOp::Sub {
                sid,
                subject: entry.subject.clone(),
                queue_group: entry.queue_group.clone(),
            }
            .encode(&mut out)?;
            entry.installed = true;
            installed += 1;
        }
        if installed == 0 {
            return Ok(());
        }
        transport.write_all(&out).await?;
        if self.opts.verbose {
            for _ in 0..installed {
                self.ack_waiters.push_back(None);
            }
        }
        tracing::debug!(count = installed, "subscriptions installed");
        Ok(())
    }

    async fn flush_pending(&mut self, transport: &mut Transport) -> Result<()> {
        while let Some(publish) = self.pending.front() {
            let mut out = BytesMut::new();
            ClientOp::Pub {
                subject: publish.subject.clone(),
                reply_to: publish.reply_to.clone(),
                headers: publish.headers.clone(),
                payload: publish.payload.clone(),
            }
            .encode(&mut out)?;
            transport.write_all(&out).await?;
            if self.opts.verbose {
                self.ack_waiters.push_back(None);
            }
            // Popped only once written, so a failed flush retries the
            // remainder on the next connection.
            self.pending.pop_front();
        }
        Ok(())
    }

    /// Roll back whatever a failed attempt half-did.
    fn abort_attempt(&mut self) {
        self.registry.mark_all_uninstalled();
        for slot in self.ack_waiters.drain(..) {
            if let Some(tx) = slot {
                let _ = tx.send(Err(Error::ConnectionLost));
            }
        }
    }

    fn resolve_connect_waiter(&mut self, result: Result<()>) {
        if let Some(tx) = self.connect_waiter.take() {
            let _ = tx.send(result);
        }
    }

    /// Retry-interval sleep that keeps serving commands (so `close`,
    /// buffered publishes, and new subscriptions work mid-retry).
    async fn sleep_processing_commands(&mut self, interval: Duration) {
        let deadline = tokio::time::sleep(interval);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => return,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        self.handle_command(cmd).await;
                        if self.closed {
                            return;
                        }
                    },
                    None => {
                        self.closed = true;
                        return;
                    },
                },
            }
        }
    }

    // ----- connected event loop -----------------------------------------

    async fn run_connected(&mut self) {
        enum Event {
            Command(Option<Command>),
            Read(std::io::Result<usize>),
        }

        loop {
            if self.closed || self.transport.is_none() {
                return;
            }

            let event = {
                let Some(transport) = self.transport.as_mut() else {
                    return;
                };
                tokio::select! {
                    cmd = self.cmd_rx.recv() => Event::Command(cmd),
                    res = transport.read_buf(&mut self.recv_buf) => Event::Read(res),
                }
            };

            match event {
                Event::Command(Some(cmd)) => self.handle_command(cmd).await,
                Event::Command(None) => {
                    // Every handle dropped; shut down quietly.
                    self.begin_close(false).await;
                },
                Event::Read(Ok(0)) => self.on_transport_loss("connection closed by server"),
                Event::Read(Ok(_)) => {
                    if let Err(err) = self.drain_decoder().await {
                        self.on_transport_loss(err);
                    }
                },
                Event::Read(Err(err)) => self.on_transport_loss(err),
            }
        }
    }

    async fn drain_decoder(&mut self) -> Result<()> {
        loop {
            let Some(op) = self.decoder.decode(&mut self.recv_buf)? else {
                return Ok(());
            };
            self.handle_server_op(op).await;
        }
    }

    async fn handle_server_op(&mut self, op: ServerOp) {
        match op {
            ServerOp::Info(info) => {
                tracing::debug!(server = %info.server_id, "INFO refresh");
                self.shared.set_info(info);
            },
            ServerOp::Ping => {
                self.write_op(ClientOp::Pong, None).await;
            },
            ServerOp::Pong => {
                if let Some((started, tx)) = self.pong_waiters.pop_front() {
                    let _ = tx.send(Ok(started.elapsed()));
                }
            },
            ServerOp::Ok => self.resolve_ack(true),
            ServerOp::Err(reason) => {
                tracing::warn!(%reason, "server reported an error");
                self.resolve_ack(false);
            },
            ServerOp::Msg { subject, sid, reply_to, payload } => {
                self.deliver(subject, sid, reply_to, None, payload).await;
            },
            ServerOp::HMsg { subject, sid, reply_to, headers, payload } => {
                self.deliver(subject, sid, reply_to, Some(headers), payload).await;
            },
        }
    }

    fn resolve_ack(&mut self, ok: bool) {
        match self.ack_waiters.pop_front() {
            Some(Some(tx)) => {
                let _ = tx.send(Ok(ok));
            },
            Some(None) => {},
            None => tracing::debug!(ok, "ack with no outstanding command"),
        }
    }

    async fn deliver(
        &mut self,
        subject: String,
        sid: u64,
        reply_to: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
    ) {
        let message = Message {
            subject,
            sid,
            reply_to,
            payload,
            headers,
            commands: self.cmd_tx.upgrade(),
            decoders: self.decoders.clone(),
        };
        match self.registry.deliver(sid, message) {
            Delivery::Delivered => {},
            Delivery::UnknownSid => {
                tracing::debug!(sid, "dropping message for unknown subscription");
            },
            Delivery::SinkClosed => {
                // Receiver was dropped without unsubscribing; stop the flow.
                self.registry.remove(sid);
                self.write_op(ClientOp::Unsub { sid, max_msgs: None }, None).await;
            },
        }
    }

    // ----- command handling ----------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { url, reply } => {
                if self.closed {
                    let _ = reply.send(Err(Error::Closed));
                } else if self.addr.is_some() {
                    let _ = reply.send(Err(Error::AlreadyConnected));
                } else {
                    match ServerAddr::parse(&url) {
                        Ok(addr) => {
                            self.addr = Some(addr);
                            self.reconnect_pending = true;
                            self.connect_waiter = Some(reply);
                        },
                        Err(err) => {
                            let _ = reply.send(Err(err));
                        },
                    }
                }
            },
            Command::Subscribe { subject, queue_group, connection_scoped, reply } => {
                let (tx, rx) = mpsc::unbounded_channel();
                let sid =
                    self.registry.insert(subject.clone(), queue_group.clone(), tx, connection_scoped);
                if self.transport.is_some()
                    && self.write_op(ClientOp::Sub { sid, subject, queue_group }, None).await
                {
                    self.registry.mark_installed(sid);
                }
                let _ = reply.send((sid, rx));
            },
            Command::Unsubscribe { sid, reply } => {
                let known = self.registry.remove(sid);
                if known && self.transport.is_some() {
                    self.write_op(ClientOp::Unsub { sid, max_msgs: None }, None).await;
                }
                let _ = reply.send(known);
            },
            Command::Publish {
                subject,
                reply_to,
                headers,
                payload,
                buffer_if_disconnected,
                reply,
            } => {
                if self.transport.is_none() {
                    if self.closed {
                        let _ = reply.send(Err(Error::Closed));
                    } else if !buffer_if_disconnected || self.pending_full() {
                        let _ = reply.send(Ok(false));
                    } else {
                        self.pending.push_back(PendingPublish {
                            subject,
                            reply_to,
                            headers,
                            payload,
                        });
                        let _ = reply.send(Ok(true));
                    }
                } else {
                    // Verbose mode resolves the reply from the matching ack;
                    // otherwise write_op resolves it immediately.
                    self.write_op(ClientOp::Pub { subject, reply_to, headers, payload }, Some(reply))
                        .await;
                }
            },
            Command::Ping { reply } => {
                if self.transport.is_none() {
                    let _ = reply.send(Err(Error::NotConnected));
                } else {
                    let started = Instant::now();
                    if self.write_op(ClientOp::Ping, None).await {
                        self.pong_waiters.push_back((started, reply));
                    } else {
                        let _ = reply.send(Err(Error::ConnectionLost));
                    }
                }
            },
            Command::Close { force, reply } => {
                self.begin_close(force).await;
                let _ = reply.send(());
            },
        }
    }

    fn pending_full(&self) -> bool {
        self.opts
            .max_pending_publishes
            .is_some_and(|limit| self.pending.len() >= limit)
    }

    /// Render and write one op.
    ///
    /// When verbose mode is on and the op expects an ack, `waiter` becomes
    /// the next FIFO slot; otherwise a present `waiter` resolves `Ok(true)`
    /// on successful write. Returns whether the write succeeded; on failure
    /// the waiter is resolved with an error and the loss path runs.
    async fn write_op(&mut self, op: ClientOp, waiter: AckSlot) -> bool {
        let mut out = BytesMut::new();
        if let Err(err) = op.encode(&mut out) {
            if let Some(tx) = waiter {
                let _ = tx.send(Err(err.into()));
            }
            return false;
        }

        let write_result = match self.transport.as_mut() {
            Some(transport) => transport.write_all(&out).await,
            None => {
                if let Some(tx) = waiter {
                    let _ = tx.send(Err(Error::NotConnected));
                }
                return false;
            },
        };

        match write_result {
            Ok(()) => {
                if self.opts.verbose && expects_ack(&op) {
                    self.ack_waiters.push_back(waiter);
                } else if let Some(tx) = waiter {
                    let _ = tx.send(Ok(true));
                }
                true
            },
            Err(err) => {
                if let Some(tx) = waiter {
                    let _ = tx.send(Err(Error::ConnectionLost));
                }
                self.on_transport_loss(err);
                false
            },
        }
    }

    // ----- teardown -------------------------------------------------------

    fn on_transport_loss(&mut self, err: impl std::fmt::Display) {
        tracing::warn!(error = %err, "transport lost");
        self.transport = None;
        self.recv_buf.clear();
        self.decoder = Decoder::new();
        // Ends the inbox stream so a request blocked on it aborts with a
        // disconnection error instead of riding out its timeout.
        self.registry.drop_connection_scoped();
        self.registry.mark_all_uninstalled();

        for slot in self.ack_waiters.drain(..) {
            if let Some(tx) = slot {
                let _ = tx.send(Err(Error::ConnectionLost));
            }
        }
        for (_, tx) in self.pong_waiters.drain(..) {
            let _ = tx.send(Err(Error::ConnectionLost));
        }

        if !self.closed {
            self.shared.status.set(ClientState::Disconnected);
            if self.retry_enabled {
                self.reconnect_pending = true;
            }
        }
    }

    async fn begin_close(&mut self, force: bool) {
        if self.closed {
            return;
        }
        self.closed = true;
        if force {
            self.retry_enabled = false;
        }
        self.reconnect_pending = false;
        self.shared.status.set(ClientState::Closed);
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
    }

    /// Fail every outstanding waiter and end all subscription streams.
    async fn finish(&mut self) {
        if !self.closed {
            self.begin_close(false).await;
        }
        self.resolve_connect_waiter(Err(Error::Closed));
        for slot in self.ack_waiters.drain(..) {
            if let Some(tx) = slot {
                let _ = tx.send(Err(Error::Closed));
            }
        }
        for (_, tx) in self.pong_waiters.drain(..) {
            let _ = tx.send(Err(Error::Closed));
        }
        self.pending.clear();
        self.registry.clear();
    }
}

/// Which client ops the server acknowledges in verbose mode. `PING`/`PONG`
/// have their own replies and never consume an ack slot.
fn expects_ack(op: &ClientOp) -> bool {
    matches!(
        op,
        ClientOp::Connect(_) | ClientOp::Pub { .. } | ClientOp::Sub { .. } | ClientOp::Unsub { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_never_consume_ack_slots() {
        assert!(!expects_ack(&ClientOp::Ping));
        assert!(!expects_ack(&ClientOp::Pong));
        assert!(expects_ack(&ClientOp::Unsub { sid: 1, max_msgs: None }));
        assert!(expects_ack(&ClientOp::Pub {
            subject: "s".to_string(),
            reply_to: None,
            headers: None,
            payload: Bytes::new(),
        }));
    }
}
