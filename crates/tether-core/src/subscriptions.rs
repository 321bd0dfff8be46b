//! Subscription registry.
//!
//! Owned exclusively by the connection driver task, so no locking: every
//! mutation happens on the driver's event loop, which also serializes
//! delivery order per subscription.
//!
//! # Invariants
//!
//! - `sid` values are unique and strictly increasing for the life of the
//!   client; they are never reused across reconnects.
//! - `installed` mirrors whether `SUB` has been sent on the *current*
//!   connection; every disconnect clears it, and
//!   [`SubRegistry::entries_mut`] lets the driver re-install everything
//!   after the next handshake before buffered publishes flush.
//! - A `connection_scoped` entry lives no longer than the connection it was
//!   created on: transport loss removes it and drops its sink, so a task
//!   blocked on the stream observes the disconnect instead of hanging.
//!   The request inbox is the one such entry.
//! - Messages for unknown sids are dropped, not errored: an `UNSUB` and an
//!   in-flight delivery can always cross on the wire.

use tokio::sync::mpsc;

use crate::message::Message;

/// One registered subscription.
#[derive(Debug)]
pub(crate) struct SubEntry {
    pub subject: String,
    pub queue_group: Option<String>,
    pub sink: mpsc::UnboundedSender<Message>,
    pub installed: bool,
    pub connection_scoped: bool,
}

/// Outcome of a delivery attempt, so the driver can clean up after
/// subscriptions whose receiver is gone.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    UnknownSid,
    SinkClosed,
}

#[derive(Debug, Default)]
pub(crate) struct SubRegistry {
    next_sid: u64,
    entries: Vec<(u64, SubEntry)>,
}

impl SubRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and allocate its sid.
    pub(crate) fn insert(
        &mut self,
        subject: String,
        queue_group: Option<String>,
        sink: mpsc::UnboundedSender<Message>,
        connection_scoped: bool,
    ) -> u64 {
        self.next_sid += 1;
        let sid = self.next_sid;
        self.entries.push((
            sid,
            SubEntry { subject, queue_group, sink, installed: false, connection_scoped },
        ));
        sid
    }

    /// Remove a subscription; `false` when the sid is unknown (soft
    /// failure - unsubscribing twice is allowed).
    pub(crate) fn remove(&mut self, sid: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| *id != sid);
        self.entries.len() != before
    }

    /// Push a message into the matching sink.
    pub(crate) fn deliver(&self, sid: u64, message: Message) -> Delivery {
        let Some((_, entry)) = self.entries.iter().find(|(id, _)| *id == sid) else {
            return Delivery::UnknownSid;
        };
        match entry.sink.send(message) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::SinkClosed,
        }
    }

    /// Record that `SUB` went out for `sid` on the current connection.
    pub(crate) fn mark_installed(&mut self, sid: u64) {
        if let Some((_, entry)) = self.entries.iter_mut().find(|(id, _)| *id == sid) {
            entry.installed = true;
        }
    }

    /// Forget the server-side installation state of every entry.
    /// Called on every transport loss.
    pub(crate) fn mark_all_uninstalled(&mut self) {
        for (_, entry) in &mut self.entries {
            entry.installed = false;
        }
    }

    /// Remove every connection-scoped entry, ending its stream. Called on
    /// every transport loss so blocked consumers see the disconnect.
    pub(crate) fn drop_connection_scoped(&mut self) {
        self.entries.retain(|(_, entry)| !entry.connection_scoped);
    }

    /// All entries, for (re)installation in sid order.
    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = (u64, &mut SubEntry)> {
        self.entries.iter_mut().map(|(sid, entry)| (*sid, entry))
    }

    /// Drop every sink, ending all subscription streams. Terminal.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
