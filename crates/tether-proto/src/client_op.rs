//! Outbound (client → server) operations and their wire rendering.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    ConnectOptions, HeaderMap, CRLF,
};

/// An outbound client operation.
///
/// All operations render as a single ASCII command line; `Pub` additionally
/// appends the raw payload (and header blob, when present) followed by CRLF.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOp {
    /// `CONNECT <json>` - client settings and credentials.
    Connect(ConnectOptions),

    /// `PUB`/`HPUB` - publish a payload, optionally with a reply subject and
    /// a header block. Renders as `HPUB` exactly when `headers` is set.
    Pub {
        /// Destination subject
        subject: String,
        /// Reply subject for request/reply, if any
        reply_to: Option<String>,
        /// Header block; presence switches the rendering to `HPUB`
        headers: Option<HeaderMap>,
        /// Raw payload bytes
        payload: Bytes,
    },

    /// `SUB <subject> [<queue_group>] <sid>`.
    Sub {
        /// Client-assigned subscription id
        sid: u64,
        /// Subject filter, may contain wildcards
        subject: String,
        /// Queue group for load-balanced delivery, if any
        queue_group: Option<String>,
    },

    /// `UNSUB <sid> [<max_msgs>]`.
    Unsub {
        /// Subscription id to remove
        sid: u64,
        /// Auto-unsubscribe after this many further messages
        max_msgs: Option<u64>,
    },

    /// `PING` - latency probe / keepalive.
    Ping,

    /// `PONG` - reply to a server `PING`.
    Pong,
}

impl ClientOp {
    /// Render this operation into `dst` in wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EncodeConnect`] if the `CONNECT` options
    /// document fails to serialize. All other operations are infallible.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Self::Connect(options) => {
                let json = serde_json::to_vec(options)
                    .map_err(|e| ProtocolError::EncodeConnect(e.to_string()))?;
                dst.reserve(8 + json.len() + 2);
                dst.put_slice(b"CONNECT ");
                dst.put_slice(&json);
                dst.put_slice(CRLF);
            },
            Self::Pub { subject, reply_to, headers: None, payload } => {
                dst.put_slice(b"PUB ");
                dst.put_slice(subject.as_bytes());
                dst.put_u8(b' ');
                if let Some(reply) = reply_to {
                    dst.put_slice(reply.as_bytes());
                    dst.put_u8(b' ');
                }
                put_decimal(dst, payload.len() as u64);
                dst.put_slice(CRLF);
                dst.put_slice(payload);
                dst.put_slice(CRLF);
            },
            Self::Pub { subject, reply_to, headers: Some(headers), payload } => {
                let blob = headers.to_bytes();
                dst.put_slice(b"HPUB ");
                dst.put_slice(subject.as_bytes());
                dst.put_u8(b' ');
                if let Some(reply) = reply_to {
                    dst.put_slice(reply.as_bytes());
                    dst.put_u8(b' ');
                }
                put_decimal(dst, blob.len() as u64);
                dst.put_u8(b' ');
                put_decimal(dst, (blob.len() + payload.len()) as u64);
                dst.put_slice(CRLF);
                dst.put_slice(&blob);
                dst.put_slice(payload);
                dst.put_slice(CRLF);
            },
            Self::Sub { sid, subject, queue_group } => {
                dst.put_slice(b"SUB ");
                dst.put_slice(subject.as_bytes());
                dst.put_u8(b' ');
                if let Some(group) = queue_group {
                    dst.put_slice(group.as_bytes());
                    dst.put_u8(b' ');
                }
                put_decimal(dst, *sid);
                dst.put_slice(CRLF);
            },
            Self::Unsub { sid, max_msgs } => {
                dst.put_slice(b"UNSUB ");
                put_decimal(dst, *sid);
                if let Some(max) = max_msgs {
                    dst.put_u8(b' ');
                    put_decimal(dst, *max);
                }
                dst.put_slice(CRLF);
            },
            Self::Ping => dst.put_slice(b"PING\r\n"),
            Self::Pong => dst.put_slice(b"PONG\r\n"),
        }
        Ok(())
    }
}

fn put_decimal(dst: &mut BytesMut, value: u64) {
    dst.put_slice(value.to_string().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(op: &ClientOp) -> Vec<u8> {
        let mut buf = BytesMut::new();
        op.encode(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn pub_without_reply() {
        let op = ClientOp::Pub {
            subject: "greet.joe".to_string(),
            reply_to: None,
            headers: None,
            payload: Bytes::from_static(b"hello"),
        };
        assert_eq!(render(&op), b"PUB greet.joe 5\r\nhello\r\n");
    }

    #[test]
    fn pub_with_reply_and_empty_payload() {
        let op = ClientOp::Pub {
            subject: "a".to_string(),
            reply_to: Some("_INBOX.x.1".to_string()),
            headers: None,
            payload: Bytes::new(),
        };
        assert_eq!(render(&op), b"PUB a _INBOX.x.1 0\r\n\r\n");
    }

    #[test]
    fn hpub_lengths_cover_header_and_payload() {
        let mut headers = HeaderMap::new();
        headers.insert("k", "v");
        let blob_len = headers.to_bytes().len();

        let op = ClientOp::Pub {
            subject: "s".to_string(),
            reply_to: None,
            headers: Some(headers),
            payload: Bytes::from_static(b"abc"),
        };
        let rendered = render(&op);
        let expected_prefix = format!("HPUB s {} {}\r\n", blob_len, blob_len + 3);
        assert!(rendered.starts_with(expected_prefix.as_bytes()));
        assert!(rendered.ends_with(b"abc\r\n"));
    }

    #[test]
    fn sub_with_queue_group() {
        let op = ClientOp::Sub {
            sid: 7,
            subject: "jobs.*".to_string(),
            queue_group: Some("workers".to_string()),
        };
        assert_eq!(render(&op), b"SUB jobs.* workers 7\r\n");
    }

    #[test]
    fn unsub_with_and_without_limit() {
        assert_eq!(render(&ClientOp::Unsub { sid: 9, max_msgs: None }), b"UNSUB 9\r\n");
        assert_eq!(render(&ClientOp::Unsub { sid: 9, max_msgs: Some(3) }), b"UNSUB 9 3\r\n");
    }

    #[test]
    fn connect_is_single_json_line() {
        let rendered = render(&ClientOp::Connect(ConnectOptions::default()));
        assert!(rendered.starts_with(b"CONNECT {"));
        assert!(rendered.ends_with(b"}\r\n"));
        // one CRLF only, at the very end
        assert_eq!(rendered.windows(2).filter(|w| w == b"\r\n").count(), 1);
    }
}
