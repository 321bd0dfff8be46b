//! Connection state and its broadcast facility.
//!
//! Every client owns a [`StatusCell`]; the connection driver is its only
//! writer. Subscribing yields the current state immediately, then every
//! transition in the order the driver performed them. [`Client::wait_until`]
//! is a thin loop over this stream.
//!
//! [`Client::wait_until`]: crate::Client::wait_until

use std::sync::Mutex;

use tokio::sync::broadcast;

/// User-visible connection states.
///
/// `Closed` is terminal; a closed client never reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// No transport; either never connected or lost and not (yet) retrying.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// In-place TLS upgrade in progress.
    TlsHandshake,
    /// Transport open, waiting for the server's `INFO` / sending `CONNECT`.
    InfoHandshake,
    /// Handshake complete; subscriptions installed and traffic flowing.
    Connected,
    /// Connection lost, retry loop running.
    Reconnecting,
    /// Terminal state. The subscription registry is preserved for
    /// inspection but this instance will not reconnect.
    Closed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::TlsHandshake => "tls_handshake",
            Self::InfoHandshake => "info_handshake",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Current state plus a broadcast of transitions.
///
/// The mutex is held across the `store + send` pair in [`StatusCell::set`]
/// and across the `snapshot + subscribe` pair in [`StatusCell::subscribe`],
/// so a subscriber never misses or double-sees a transition around its
/// subscription point.
#[derive(Debug)]
pub(crate) struct StatusCell {
    current: Mutex<ClientState>,
    tx: broadcast::Sender<ClientState>,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { current: Mutex::new(ClientState::Disconnected), tx }
    }

    pub(crate) fn get(&self) -> ClientState {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set(&self, next: ClientState) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if *current == next {
            return;
        }
        tracing::debug!(from = %current, to = %next, "state transition");
        *current = next;
        // No receivers is fine; transitions are not required to be observed.
        let _ = self.tx.send(next);
    }

    pub(crate) fn subscribe(&self) -> StatusStream {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        StatusStream { replay: Some(*current), rx: self.tx.subscribe() }
    }
}

/// Stream of state transitions, starting with a replay of the state that was
/// current at subscription time.
#[derive(Debug)]
pub struct StatusStream {
    replay: Option<ClientState>,
    rx: broadcast::Receiver<ClientState>,
}

impl StatusStream {
    /// Next state, or `None` once the client is gone and all transitions
    /// have been observed.
    pub async fn next(&mut self) -> Option<ClientState> {
        if let Some(state) = self.replay.take() {
            return Some(state);
        }
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                // Fell behind; skip to what is still buffered.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_current_then_transitions() {
        let cell = StatusCell::new();
        cell.set(ClientState::Connecting);

        let mut stream = cell.subscribe();
        cell.set(ClientState::InfoHandshake);
        cell.set(ClientState::Connected);

        assert_eq!(stream.next().await, Some(ClientState::Connecting));
        assert_eq!(stream.next().await, Some(ClientState::InfoHandshake));
        assert_eq!(stream.next().await, Some(ClientState::Connected));
    }

    #[tokio::test]
    async fn repeated_set_is_not_broadcast() {
        let cell = StatusCell::new();
        let mut stream = cell.subscribe();
        cell.set(ClientState::Connecting);
        cell.set(ClientState::Connecting);
        cell.set(ClientState::Closed);

        assert_eq!(stream.next().await, Some(ClientState::Disconnected));
        assert_eq!(stream.next().await, Some(ClientState::Connecting));
        assert_eq!(stream.next().await, Some(ClientState::Closed));
    }

    #[tokio::test]
    async fn stream_ends_when_cell_dropped() {
        let cell = StatusCell::new();
        let mut stream = cell.subscribe();
        drop(cell);
        assert_eq!(stream.next().await, Some(ClientState::Disconnected));
        assert_eq!(stream.next().await, None);
    }
}
