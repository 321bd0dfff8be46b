//! Incremental inbound decoder.
//!
//! The driver accumulates received bytes into a single [`BytesMut`] and calls
//! [`Decoder::decode`] in a loop. Each call either:
//!
//! - returns `Ok(Some(op))` and consumes exactly one complete operation, or
//! - returns `Ok(None)` and leaves the accumulator untouched (more bytes are
//!   needed - a command line without its CRLF yet, or a `MSG`/`HMSG` whose
//!   declared payload has not fully arrived), or
//! - returns `Err(_)` when a recognized command is malformed or the stream
//!   is desynchronized; the connection must then be torn down.
//!
//! # Invariants
//!
//! - **Length-framed payloads**: payload bytes are taken verbatim by count.
//!   A payload may contain `\r`, `\n`, `\r\n`, or any byte 0–255 - the
//!   delimiters on the command line are the only framing authority.
//! - **Unknown commands are dropped**: an unrecognized first token causes the
//!   whole line to be consumed and skipped, and decoding continues with the
//!   next line.
//! - **Case-insensitive opcodes**: `msg`, `MSG`, and `Msg` are equivalent.

use bytes::{Buf, Bytes, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    HeaderMap, ServerOp,
};

/// Incremental pull parser over the receive accumulator.
///
/// The decoder itself is stateless - all partial-input state lives in the
/// accumulator, whose contents are only consumed once a complete operation
/// is available. One instance per connection keeps the call sites honest
/// about the single-reader discipline.
#[derive(Debug, Default)]
pub struct Decoder {
    _non_exhaustive: (),
}

/// Result of parsing a single command line, before payload gating.
enum Line {
    Msg { subject: String, sid: u64, reply_to: Option<String>, payload_len: usize },
    HMsg { subject: String, sid: u64, reply_to: Option<String>, header_len: usize, total_len: usize },
    Info(ServerOpInfo),
    Ping,
    Pong,
    Ok,
    Err(String),
    Skip,
}

// Boxed to keep the Line enum small; INFO is rare (once per connection).
type ServerOpInfo = Box<crate::ServerInfo>;

impl Decoder {
    /// Create a decoder for one connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to decode the next complete operation out of `buf`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when a recognized command line is
    /// malformed, an `INFO` document fails to parse, or a payload is not
    /// terminated by CRLF. After an error the accumulator contents are
    /// unspecified; callers are expected to drop the connection.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ServerOp>> {
        loop {
            let Some(line_end) = find_crlf(buf) else {
                return Ok(None);
            };

            let line = parse_line(&buf[..line_end])?;

            match line {
                Line::Msg { subject, sid, reply_to, payload_len } => {
                    let Some(payload) = take_payload(buf, line_end, payload_len)? else {
                        return Ok(None);
                    };
                    return Ok(Some(ServerOp::Msg { subject, sid, reply_to, payload }));
                },
                Line::HMsg { subject, sid, reply_to, header_len, total_len } => {
                    if header_len > total_len {
                        return Err(ProtocolError::HeaderOverrun {
                            header: header_len,
                            total: total_len,
                        });
                    }
                    let Some(blob) = take_payload(buf, line_end, total_len)? else {
                        return Ok(None);
                    };
                    let headers = HeaderMap::parse(&blob[..header_len]);
                    let payload = blob.slice(header_len..);
                    return Ok(Some(ServerOp::HMsg { subject, sid, reply_to, headers, payload }));
                },
                Line::Info(info) => {
                    buf.advance(line_end + 2);
                    return Ok(Some(ServerOp::Info(*info)));
                },
                Line::Ping => {
                    buf.advance(line_end + 2);
                    return Ok(Some(ServerOp::Ping));
                },
                Line::Pong => {
                    buf.advance(line_end + 2);
                    return Ok(Some(ServerOp::Pong));
                },
                Line::Ok => {
                    buf.advance(line_end + 2);
                    return Ok(Some(ServerOp::Ok));
                },
                Line::Err(reason) => {
                    buf.advance(line_end + 2);
                    return Ok(Some(ServerOp::Err(reason)));
                },
                Line::Skip => {
                    buf.advance(line_end + 2);
                    // Unknown command; keep scanning.
                },
            }
        }
    }
}

/// Offset of the first `\r\n` pair, if one is fully buffered.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Extract a length-framed payload that starts after the command line.
///
/// Returns `Ok(None)` when the accumulator does not yet hold the payload and
/// its trailing CRLF; nothing is consumed in that case.
fn take_payload(buf: &mut BytesMut, line_end: usize, len: usize) -> Result<Option<Bytes>> {
    let needed = line_end + 2 + len + 2;
    if buf.len() < needed {
        return Ok(None);
    }
    buf.advance(line_end + 2);
    let payload = buf.split_to(len).freeze();
    if &buf[..2] != b"\r\n" {
        return Err(ProtocolError::MissingCrlf);
    }
    buf.advance(2);
    Ok(Some(payload))
}

fn parse_line(line: &[u8]) -> Result<Line> {
    let (op, rest) = match line.iter().position(|b| b.is_ascii_whitespace()) {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, &line[line.len()..]),
    };

    if op.eq_ignore_ascii_case(b"MSG") {
        parse_msg(line, rest)
    } else if op.eq_ignore_ascii_case(b"HMSG") {
        parse_hmsg(line, rest)
    } else if op.eq_ignore_ascii_case(b"INFO") {
        let info = serde_json::from_slice(rest)
            .map_err(|e| ProtocolError::MalformedInfo(e.to_string()))?;
        Ok(Line::Info(Box::new(info)))
    } else if op.eq_ignore_ascii_case(b"PING") {
        Ok(Line::Ping)
    } else if op.eq_ignore_ascii_case(b"PONG") {
        Ok(Line::Pong)
    } else if op.eq_ignore_ascii_case(b"+OK") {
        Ok(Line::Ok)
    } else if op.eq_ignore_ascii_case(b"-ERR") {
        let reason = std::str::from_utf8(rest).unwrap_or_default().trim();
        let reason = reason.strip_prefix('\'').unwrap_or(reason);
        let reason = reason.strip_suffix('\'').unwrap_or(reason);
        Ok(Line::Err(reason.to_string()))
    } else {
        Ok(Line::Skip)
    }
}

fn parse_msg(line: &[u8], rest: &[u8]) -> Result<Line> {
    let tokens: Vec<&[u8]> = split_tokens(rest);
    let (subject, sid, reply_to, len_tok) = match tokens.as_slice() {
        [subject, sid, len] => (*subject, *sid, None, *len),
        [subject, sid, reply, len] => (*subject, *sid, Some(*reply), *len),
        _ => return Err(malformed("MSG", line)),
    };

    Ok(Line::Msg {
        subject: utf8_token("MSG", "subject", subject)?,
        sid: parse_u64("MSG", "sid", sid)?,
        reply_to: reply_to.map(|r| utf8_token("MSG", "reply_to", r)).transpose()?,
        payload_len: parse_u64("MSG", "payload_len", len_tok)? as usize,
    })
}

fn parse_hmsg(line: &[u8], rest: &[u8]) -> Result<Line> {
    let tokens: Vec<&[u8]> = split_tokens(rest);
    let (subject, sid, reply_to, hlen_tok, total_tok) = match tokens.as_slice() {
        [subject, sid, hlen, total] => (*subject, *sid, None, *hlen, *total),
        [subject, sid, reply, hlen, total] => (*subject, *sid, Some(*reply), *hlen, *total),
        _ => return Err(malformed("HMSG", line)),
    };

    Ok(Line::HMsg {
        subject: utf8_token("HMSG", "subject", subject)?,
        sid: parse_u64("HMSG", "sid", sid)?,
        reply_to: reply_to.map(|r| utf8_token("HMSG", "reply_to", r)).transpose()?,
        header_len: parse_u64("HMSG", "header_len", hlen_tok)? as usize,
        total_len: parse_u64("HMSG", "total_len", total_tok)? as usize,
    })
}

fn split_tokens(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.split(|b| b.is_ascii_whitespace()).filter(|t| !t.is_empty()).collect()
}

fn malformed(op: &'static str, line: &[u8]) -> ProtocolError {
    ProtocolError::Malformed { op, line: String::from_utf8_lossy(line).into_owned() }
}

fn utf8_token(op: &'static str, field: &'static str, token: &[u8]) -> Result<String> {
    std::str::from_utf8(token)
        .map(str::to_string)
        .map_err(|_| ProtocolError::InvalidToken { op, field })
}

fn parse_u64(op: &'static str, field: &'static str, token: &[u8]) -> Result<u64> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtocolError::InvalidLength {
            op,
            field,
            value: String::from_utf8_lossy(token).into_owned(),
        })
}
