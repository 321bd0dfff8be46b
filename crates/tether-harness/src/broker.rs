//! In-process broker.
//!
//! One task accepts connections; each connection gets a reader task (parse
//! and route) and a writer task (drain an outbox queue). Routing locks the
//! shared connection table briefly, collects delivery targets, then pushes
//! rendered `MSG`/`HMSG` frames into per-connection outboxes - so delivery
//! order per publisher is preserved and the lock is never held across I/O.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener,
    },
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use tether_ident::{KeyPair, Nuid};
use tether_proto::ServerInfo;

use crate::{
    subjects,
    wire::{decode_client_op, ClientLine},
};

/// Broker behaviour knobs.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Advertised maximum payload size.
    pub max_payload: usize,
    /// When set, `CONNECT` must carry this public key and a valid signature
    /// over the per-connection nonce.
    pub require_nkey: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { max_payload: 1_048_576, require_nkey: None }
    }
}

struct SubRec {
    sid: u64,
    subject: String,
    queue_group: Option<String>,
}

struct ConnEntry {
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    echo: bool,
    subs: Vec<SubRec>,
}

struct BrokerState {
    config: BrokerConfig,
    port: u16,
    next_conn: AtomicU64,
    conns: Mutex<HashMap<u64, ConnEntry>>,
}

/// A running broker bound to an ephemeral `127.0.0.1` port.
pub struct Broker {
    local_addr: SocketAddr,
    state: Arc<BrokerState>,
    boot_tx: broadcast::Sender<()>,
    accept_handle: JoinHandle<()>,
}

impl Broker {
    /// Start with default configuration.
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot bind.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(BrokerConfig::default()).await
    }

    /// Start with the given configuration.
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot bind.
    pub async fn start_with(config: BrokerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(BrokerState {
            config,
            port: local_addr.port(),
            next_conn: AtomicU64::new(1),
            conns: Mutex::new(HashMap::new()),
        });
        let (boot_tx, _) = broadcast::channel(4);

        let accept_state = state.clone();
        let accept_boot = boot_tx.clone();
        let accept_handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let _ = stream.set_nodelay(true);
                let conn_id = accept_state.next_conn.fetch_add(1, Ordering::Relaxed);
                let (read_half, write_half) = stream.into_split();

                let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
                accept_state.conns.lock().unwrap_or_else(|e| e.into_inner()).insert(
                    conn_id,
                    ConnEntry { outbox: outbox_tx.clone(), echo: true, subs: Vec::new() },
                );

                tokio::spawn(writer_task(write_half, outbox_rx));
                tokio::spawn(reader_task(
                    accept_state.clone(),
                    conn_id,
                    read_half,
                    outbox_tx,
                    accept_boot.subscribe(),
                ));
            }
        });

        Ok(Self { local_addr, state, boot_tx, accept_handle })
    }

    /// URL clients should connect to.
    #[must_use]
    pub fn url(&self) -> String {
        format!("nats://{}", self.local_addr)
    }

    /// Bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live client connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.conns.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Sever every current connection (the listener keeps accepting), so
    /// clients exercise their reconnect path.
    pub fn sever_connections(&self) {
        let _ = self.boot_tx.send(());
    }

    /// Stop accepting and drop all connections.
    pub fn shutdown(&self) {
        self.accept_handle.abort();
        self.sever_connections();
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn writer_task(mut write_half: OwnedWriteHalf, mut outbox: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = outbox.recv().await {
        if write_half.write_all(&frame).await.is_err() {
            return;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn reader_task(
    state: Arc<BrokerState>,
    conn_id: u64,
    mut read_half: OwnedReadHalf,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    mut boot: broadcast::Receiver<()>,
) {
    let nonce = Nuid::new().next();
    send_info(&state, &outbox, &nonce);

    let mut buf = BytesMut::new();
    let mut verbose = false;
    let mut echo = true;

    'conn: loop {
        tokio::select! {
            biased;
            _ = boot.recv() => break 'conn,
            read = read_half.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => break 'conn,
                Ok(_) => {},
            },
        }

        loop {
            let line = match decode_client_op(&mut buf) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(reason) => {
                    tracing::warn!(%reason, conn_id, "dropping connection on parse error");
                    break 'conn;
                },
            };

            match line {
                ClientLine::Connect(options) => {
                    if let Some(expected) = &state.config.require_nkey {
                        let presented = options.nkey.as_deref().unwrap_or_default();
                        let signature = options.sig.as_deref().unwrap_or_default();
                        let authentic = presented == expected
                            && KeyPair::verify(presented, nonce.as_bytes(), signature);
                        if !authentic {
                            let _ = outbox.send(b"-ERR 'Authorization Violation'\r\n".to_vec());
                            break 'conn;
                        }
                    }
                    verbose = options.verbose;
                    echo = options.echo.unwrap_or(true);
                    if let Some(entry) =
                        state.conns.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&conn_id)
                    {
                        entry.echo = echo;
                    }
                    ack(verbose, &outbox);
                },
                ClientLine::Sub { subject, queue_group, sid } => {
                    if let Some(entry) =
                        state.conns.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&conn_id)
                    {
                        entry.subs.push(SubRec { sid, subject, queue_group });
                    }
                    ack(verbose, &outbox);
                },
                ClientLine::Unsub { sid } => {
                    if let Some(entry) =
                        state.conns.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&conn_id)
                    {
                        entry.subs.retain(|sub| sub.sid != sid);
                    }
                    ack(verbose, &outbox);
                },
                ClientLine::Pub { subject, reply_to, payload } => {
                    route(&state, conn_id, echo, &subject, reply_to.as_deref(), None, &payload);
                    ack(verbose, &outbox);
                },
                ClientLine::HPub { subject, reply_to, header_blob, payload } => {
                    route(
                        &state,
                        conn_id,
                        echo,
                        &subject,
                        reply_to.as_deref(),
                        Some(&header_blob),
                        &payload,
                    );
                    ack(verbose, &outbox);
                },
                ClientLine::Ping => {
                    let _ = outbox.send(b"PONG\r\n".to_vec());
                },
                ClientLine::Pong => {},
            }
        }
    }

    state.conns.lock().unwrap_or_else(|e| e.into_inner()).remove(&conn_id);
}

fn send_info(state: &BrokerState, outbox: &mpsc::UnboundedSender<Vec<u8>>, nonce: &str) {
    let info = ServerInfo {
        server_id: "tether-harness".to_string(),
        server_name: "tether-harness".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        host: "127.0.0.1".to_string(),
        port: state.port,
        max_payload: state.config.max_payload,
        proto: 1,
        headers: true,
        auth_required: state.config.require_nkey.is_some().then_some(true),
        nonce: Some(nonce.to_string()),
        ..ServerInfo::default()
    };
    let mut frame = b"INFO ".to_vec();
    // ServerInfo always serializes; a failure here is a harness bug.
    if let Ok(json) = serde_json::to_vec(&info) {
        frame.extend_from_slice(&json);
        frame.extend_from_slice(b"\r\n");
        let _ = outbox.send(frame);
    }
}

fn ack(verbose: bool, outbox: &mpsc::UnboundedSender<Vec<u8>>) {
    if verbose {
        let _ = outbox.send(b"+OK\r\n".to_vec());
    }
}

fn route(
    state: &BrokerState,
    publisher: u64,
    echo: bool,
    subject: &str,
    reply_to: Option<&str>,
    header_blob: Option<&Bytes>,
    payload: &Bytes,
) {
    let mut plain: Vec<(mpsc::UnboundedSender<Vec<u8>>, u64)> = Vec::new();
    let mut queued: HashMap<String, (mpsc::UnboundedSender<Vec<u8>>, u64)> = HashMap::new();

    {
        let conns = state.conns.lock().unwrap_or_else(|e| e.into_inner());
        for (conn_id, entry) in conns.iter() {
            if *conn_id == publisher && !echo {
                continue;
            }
            for sub in &entry.subs {
                if !subjects::matches(&sub.subject, subject) {
                    continue;
                }
                match &sub.queue_group {
                    None => plain.push((entry.outbox.clone(), sub.sid)),
                    Some(group) => {
                        queued
                            .entry(group.clone())
                            .or_insert_with(|| (entry.outbox.clone(), sub.sid));
                    },
                }
            }
        }
    }

    for (outbox, sid) in plain.into_iter().chain(queued.into_values()) {
        let _ = outbox.send(render(subject, sid, reply_to, header_blob, payload));
    }
}

fn render(
    subject: &str,
    sid: u64,
    reply_to: Option<&str>,
    header_blob: Option<&Bytes>,
    payload: &Bytes,
) -> Vec<u8> {
    let reply = reply_to.map(|r| format!("{r} ")).unwrap_or_default();
    let mut frame = match header_blob {
        Some(blob) => {
            let mut frame = format!(
                "HMSG {subject} {sid} {reply}{} {}\r\n",
                blob.len(),
                blob.len() + payload.len()
            )
            .into_bytes();
            frame.extend_from_slice(blob);
            frame
        },
        None => format!("MSG {subject} {sid} {reply}{}\r\n", payload.len()).into_bytes(),
    };
    frame.extend_from_slice(payload);
    frame.extend_from_slice(b"\r\n");
    frame
}
