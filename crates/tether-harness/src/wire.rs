//! Broker-side wire parsing: the client → server half of the protocol.
//!
//! Deliberately written independently of the client's encoder (same framing
//! rules, separate code), so the integration tests exercise the client's
//! output against a second implementation rather than against itself.

use bytes::{Buf, Bytes, BytesMut};

use tether_proto::ConnectOptions;

/// One parsed client command.
#[derive(Debug)]
pub enum ClientLine {
    /// `CONNECT <json>`
    Connect(Box<ConnectOptions>),
    /// `PUB <subject> [reply] <len>` + payload
    Pub {
        /// Destination subject
        subject: String,
        /// Reply subject, if any
        reply_to: Option<String>,
        /// Payload bytes
        payload: Bytes,
    },
    /// `HPUB <subject> [reply] <hlen> <total>` + header blob + payload
    HPub {
        /// Destination subject
        subject: String,
        /// Reply subject, if any
        reply_to: Option<String>,
        /// Raw header blob (version line included)
        header_blob: Bytes,
        /// Payload bytes
        payload: Bytes,
    },
    /// `SUB <subject> [group] <sid>`
    Sub {
        /// Subject filter
        subject: String,
        /// Queue group, if any
        queue_group: Option<String>,
        /// Client-assigned sid
        sid: u64,
    },
    /// `UNSUB <sid> [max]`
    Unsub {
        /// Subscription id
        sid: u64,
    },
    /// `PING`
    Ping,
    /// `PONG`
    Pong,
}

/// Incrementally decode one client command out of `buf`.
///
/// Returns `Ok(None)` while the buffer holds only part of a command.
///
/// # Errors
///
/// Returns a description of the malformed line; the harness drops the
/// connection on any parse error.
pub fn decode_client_op(buf: &mut BytesMut) -> Result<Option<ClientLine>, String> {
    loop {
        let Some(line_end) = buf.windows(2).position(|w| w == b"\r\n") else {
            return Ok(None);
        };
        let line = buf[..line_end].to_vec();
        let text = String::from_utf8_lossy(&line).into_owned();
        let mut tokens = text.split_ascii_whitespace();
        let Some(op) = tokens.next() else {
            buf.advance(line_end + 2);
            continue;
        };

        match op.to_ascii_uppercase().as_str() {
            "CONNECT" => {
                let json = text[op.len()..].trim();
                let options: ConnectOptions =
                    serde_json::from_str(json).map_err(|e| format!("bad CONNECT: {e}"))?;
                buf.advance(line_end + 2);
                return Ok(Some(ClientLine::Connect(Box::new(options))));
            },
            "PUB" => {
                let args: Vec<&str> = tokens.collect();
                let (subject, reply_to, len) = match args.as_slice() {
                    [subject, len] => (*subject, None, *len),
                    [subject, reply, len] => (*subject, Some(*reply), *len),
                    _ => return Err(format!("bad PUB: {text}")),
                };
                let len: usize = len.parse().map_err(|_| format!("bad PUB length: {text}"))?;
                let Some(payload) = take_payload(buf, line_end, len)? else {
                    return Ok(None);
                };
                return Ok(Some(ClientLine::Pub {
                    subject: subject.to_string(),
                    reply_to: reply_to.map(str::to_string),
                    payload,
                }));
            },
            "HPUB" => {
                let args: Vec<&str> = tokens.collect();
                let (subject, reply_to, hlen, total) = match args.as_slice() {
                    [subject, hlen, total] => (*subject, None, *hlen, *total),
                    [subject, reply, hlen, total] => (*subject, Some(*reply), *hlen, *total),
                    _ => return Err(format!("bad HPUB: {text}")),
                };
                let hlen: usize = hlen.parse().map_err(|_| format!("bad HPUB hlen: {text}"))?;
                let total: usize =
                    total.parse().map_err(|_| format!("bad HPUB total: {text}"))?;
                if hlen > total {
                    return Err(format!("HPUB header exceeds total: {text}"));
                }
                let Some(blob) = take_payload(buf, line_end, total)? else {
                    return Ok(None);
                };
                return Ok(Some(ClientLine::HPub {
                    subject: subject.to_string(),
                    reply_to: reply_to.map(str::to_string),
                    header_blob: blob.slice(..hlen),
                    payload: blob.slice(hlen..),
                }));
            },
            "SUB" => {
                let args: Vec<&str> = tokens.collect();
                let (subject, queue_group, sid) = match args.as_slice() {
                    [subject, sid] => (*subject, None, *sid),
                    [subject, group, sid] => (*subject, Some(*group), *sid),
                    _ => return Err(format!("bad SUB: {text}")),
                };
                let sid: u64 = sid.parse().map_err(|_| format!("bad SUB sid: {text}"))?;
                buf.advance(line_end + 2);
                return Ok(Some(ClientLine::Sub {
                    subject: subject.to_string(),
                    queue_group: queue_group.map(str::to_string),
                    sid,
                }));
            },
            "UNSUB" => {
                let args: Vec<&str> = tokens.collect();
                let sid = match args.as_slice() {
                    [sid] | [sid, _] => *sid,
                    _ => return Err(format!("bad UNSUB: {text}")),
                };
                let sid: u64 = sid.parse().map_err(|_| format!("bad UNSUB sid: {text}"))?;
                buf.advance(line_end + 2);
                return Ok(Some(ClientLine::Unsub { sid }));
            },
            "PING" => {
                buf.advance(line_end + 2);
                return Ok(Some(ClientLine::Ping));
            },
            "PONG" => {
                buf.advance(line_end + 2);
                return Ok(Some(ClientLine::Pong));
            },
            _ => {
                buf.advance(line_end + 2);
                continue;
            },
        }
    }
}

fn take_payload(
    buf: &mut BytesMut,
    line_end: usize,
    len: usize,
) -> Result<Option<Bytes>, String> {
    let needed = line_end + 2 + len + 2;
    if buf.len() < needed {
        return Ok(None);
    }
    buf.advance(line_end + 2);
    let payload = buf.split_to(len).freeze();
    if &buf[..2] != b"\r\n" {
        return Err("payload not CRLF-terminated".to_string());
    }
    buf.advance(2);
    Ok(Some(payload))
}
