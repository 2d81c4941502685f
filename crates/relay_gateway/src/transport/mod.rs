//! Transport adapter abstraction.
//!
//! The gateway talks to the relay network only through [`TransportAdapter`].
//! A transport exposes connection status changes as [`TransportEvent`]s,
//! batches inbound frames by [`PollGroup`], and reports failures per handle.
//! It never retries a failed send: on a relay network a failed reliable send
//! means the route is gone.
//!
//! Transports that perform I/O on other threads must queue their status
//! changes and inbound frames and hand them over from
//! [`poll_events`](TransportAdapter::poll_events) and
//! [`receive`](TransportAdapter::receive), which are only ever called from the
//! tick thread.

pub mod memory;

pub use memory::MemoryTransport;

use crate::error::TransportError;
use crate::types::{ConnectionHandle, PeerIdentity, PollGroup};

/// One inbound frame, exactly as the transport delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub handle: ConnectionHandle,
    pub bytes: Vec<u8>,
}

/// Connection quality snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickStats {
    pub ping_ms: u32,
}

/// Connection status change reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer proposes a connection. The gateway answers with
    /// [`accept`](TransportAdapter::accept) or
    /// [`close`](TransportAdapter::close).
    Connecting {
        handle: ConnectionHandle,
        peer: PeerIdentity,
    },
    /// A previously accepted connection is fully established.
    Connected {
        handle: ConnectionHandle,
        peer: PeerIdentity,
    },
    /// The connection was torn down by the peer or the network.
    Closed {
        handle: ConnectionHandle,
        reason: String,
    },
    /// The transport lost its own relay backend. Not retried here.
    BackendLost { reason: String },
}

/// Connection primitives of a relay transport.
pub trait TransportAdapter {
    /// Drains pending status changes in the order they occurred.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    /// Accepts a connection reported as `Connecting`.
    fn accept(&mut self, handle: ConnectionHandle) -> Result<(), TransportError>;

    /// Sends one frame reliably.
    fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), TransportError>;

    /// Returns up to `max_messages` frames received by connections in
    /// `group`, preserving per-connection order.
    fn receive(&mut self, group: PollGroup, max_messages: usize) -> Vec<RawMessage>;

    /// Closes a connection. Closing an unknown or already closed handle is a
    /// no-op.
    fn close(&mut self, handle: ConnectionHandle, reason: &str);

    /// Moves a connection into `group`.
    fn set_poll_group(&mut self, handle: ConnectionHandle, group: PollGroup)
        -> Result<(), TransportError>;

    /// Connection quality, when the transport knows it.
    fn quick_stats(&self, handle: ConnectionHandle) -> Option<QuickStats>;

    /// Peer display name from transport metadata.
    fn display_name(&self, handle: ConnectionHandle) -> Option<String>;
}

/// Moves up to `max_messages` frames whose connection currently sits in
/// `group` out of `inbox`, keeping everything else queued in order.
///
/// Shared by transports that buffer inbound frames in a single queue.
pub fn drain_group<F>(
    inbox: &mut Vec<RawMessage>,
    max_messages: usize,
    mut group_of: F,
    group: PollGroup,
) -> Vec<RawMessage>
where
    F: FnMut(ConnectionHandle) -> Option<PollGroup>,
{
    let mut taken = Vec::new();
    let mut kept = Vec::with_capacity(inbox.len());
    for message in inbox.drain(..) {
        if taken.len() < max_messages && group_of(message.handle) == Some(group) {
            taken.push(message);
        } else {
            kept.push(message);
        }
    }
    *inbox = kept;
    taken
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(handle: u32, byte: u8) -> RawMessage {
        RawMessage {
            handle: ConnectionHandle(handle),
            bytes: vec![byte],
        }
    }

    #[test]
    fn test_drain_group_preserves_order_and_limit() {
        let mut inbox = vec![message(1, 1), message(2, 2), message(1, 3), message(1, 4)];
        let group_of = |h: ConnectionHandle| {
            if h.0 == 1 {
                Some(PollGroup::Active)
            } else {
                Some(PollGroup::Joining)
            }
        };

        let taken = drain_group(&mut inbox, 2, group_of, PollGroup::Active);
        assert_eq!(taken, vec![message(1, 1), message(1, 3)]);
        assert_eq!(inbox, vec![message(2, 2), message(1, 4)]);
    }

    #[test]
    fn test_drain_group_skips_ungrouped() {
        let mut inbox = vec![message(9, 1)];
        let taken = drain_group(&mut inbox, 10, |_| None, PollGroup::Joining);
        assert!(taken.is_empty());
        assert_eq!(inbox.len(), 1);
    }
}
