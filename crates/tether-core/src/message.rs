//! Received messages.

use std::{borrow::Cow, sync::Arc};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::{
    connection::Command,
    decoders::DecoderRegistry,
    errors::{Error, Result},
};
use tether_proto::HeaderMap;

/// A message delivered to a subscription.
///
/// Immutable once decoded. Carries a handle back to the client that received
/// it, so [`Message::respond`] can publish to the reply subject without the
/// caller holding the client.
#[derive(Clone)]
pub struct Message {
    /// Subject the message was published to.
    pub subject: String,
    /// Subscription the server matched.
    pub sid: u64,
    /// Reply subject for request/reply, if any.
    pub reply_to: Option<String>,
    /// Raw payload bytes, exactly as published.
    pub payload: Bytes,
    /// Header block, when the message arrived as `HMSG`.
    pub headers: Option<HeaderMap>,

    pub(crate) commands: Option<mpsc::Sender<Command>>,
    pub(crate) decoders: Arc<DecoderRegistry>,
}

impl Message {
    /// Payload as text (lossy - payloads are not required to be UTF-8).
    #[must_use]
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Decode the payload via the client's registered decoder for `T`.
    ///
    /// `Vec<u8>` and [`Bytes`] work without registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDecoder`] for unregistered types and
    /// [`Error::DecodeFailed`] when the decoder rejects this payload.
    pub fn decode<T: std::any::Any>(&self) -> Result<T> {
        self.decoders.decode(&self.payload)
    }

    /// Publish `payload` to this message's reply subject.
    ///
    /// Resolves like a publish: `true` once written (or buffered), `false`
    /// when refused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoReplySubject`] when the message carries none, or
    /// [`Error::Closed`] when the client is gone.
    pub async fn respond(&self, payload: impl Into<Bytes>) -> Result<bool> {
        let reply_to = self.reply_to.clone().ok_or(Error::NoReplySubject)?;
        let commands = self.commands.as_ref().ok_or(Error::Closed)?;

        let (tx, rx) = oneshot::channel();
        commands
            .send(Command::Publish {
                subject: reply_to,
                reply_to: None,
                headers: None,
                payload: payload.into(),
                buffer_if_disconnected: true,
                reply: tx,
            })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.subject)
            .field("sid", &self.sid)
            .field("reply_to", &self.reply_to)
            .field("payload_len", &self.payload.len())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
