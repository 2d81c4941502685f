//! In-process transport.
//!
//! `MemoryTransport` implements [`TransportAdapter`] over plain collections and
//! exposes the peer side of every connection, so a test or a local harness can
//! play the remote players: propose connections, deliver frames, read what the
//! gateway sent, and simulate drops, send failures and backend loss.

use super::{drain_group, QuickStats, RawMessage, TransportAdapter, TransportEvent};
use crate::error::TransportError;
use crate::types::{ConnectionHandle, PeerIdentity, PollGroup};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
struct MemoryLink {
    peer: PeerIdentity,
    state: LinkState,
    group: Option<PollGroup>,
    held_group: Option<PollGroup>,
    sent: Vec<Vec<u8>>,
    close_reason: Option<String>,
    close_calls: usize,
    ping_ms: Option<u32>,
    display_name: Option<String>,
    fail_sends: bool,
}

/// In-memory transport with a scriptable peer side.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    next_handle: u32,
    events: VecDeque<TransportEvent>,
    links: HashMap<ConnectionHandle, MemoryLink>,
    inbox: Vec<RawMessage>,
    hold_group_switches: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Peer side
    // ------------------------------------------------------------------

    /// Proposes a new connection from `peer`.
    pub fn connect(&mut self, peer: PeerIdentity) -> ConnectionHandle {
        self.next_handle += 1;
        let handle = ConnectionHandle(self.next_handle);
        self.links.insert(
            handle,
            MemoryLink {
                peer,
                state: LinkState::Connecting,
                group: None,
                held_group: None,
                sent: Vec::new(),
                close_reason: None,
                close_calls: 0,
                ping_ms: None,
                display_name: None,
                fail_sends: false,
            },
        );
        self.events.push_back(TransportEvent::Connecting { handle, peer });
        handle
    }

    /// Proposes a connection whose transport metadata carries a display name.
    pub fn connect_named(&mut self, peer: PeerIdentity, name: &str) -> ConnectionHandle {
        let handle = self.connect(peer);
        self.set_display_name(handle, name);
        handle
    }

    /// Queues a frame from the peer. Ignored unless the link is open.
    pub fn deliver(&mut self, handle: ConnectionHandle, bytes: Vec<u8>) -> bool {
        match self.links.get(&handle) {
            Some(link) if link.state == LinkState::Open => {
                self.inbox.push(RawMessage { handle, bytes });
                true
            }
            _ => false,
        }
    }

    /// The peer hangs up.
    pub fn disconnect(&mut self, handle: ConnectionHandle, reason: &str) {
        if let Some(link) = self.links.get_mut(&handle) {
            if link.state != LinkState::Closed {
                link.state = LinkState::Closed;
                link.close_reason = Some(reason.to_string());
                self.events.push_back(TransportEvent::Closed {
                    handle,
                    reason: reason.to_string(),
                });
            }
        }
    }

    /// Every later send on `handle` fails.
    pub fn fail_sends(&mut self, handle: ConnectionHandle) {
        if let Some(link) = self.links.get_mut(&handle) {
            link.fail_sends = true;
        }
    }

    pub fn set_ping(&mut self, handle: ConnectionHandle, ping_ms: u32) {
        if let Some(link) = self.links.get_mut(&handle) {
            link.ping_ms = Some(ping_ms);
        }
    }

    pub fn set_display_name(&mut self, handle: ConnectionHandle, name: &str) {
        if let Some(link) = self.links.get_mut(&handle) {
            link.display_name = Some(name.to_string());
        }
    }

    /// Reports loss of the relay backend.
    pub fn lose_backend(&mut self, reason: &str) {
        self.events.push_back(TransportEvent::BackendLost {
            reason: reason.to_string(),
        });
    }

    /// While held, poll-group switches are recorded but not observed until
    /// [`release_group_switches`](Self::release_group_switches) is called.
    /// This reproduces a relay that keeps delivering through the old group
    /// for a while after the switch.
    pub fn hold_group_switches(&mut self, hold: bool) {
        self.hold_group_switches = hold;
    }

    pub fn release_group_switches(&mut self) {
        for link in self.links.values_mut() {
            if let Some(group) = link.held_group.take() {
                link.group = Some(group);
            }
        }
    }

    /// Puts a link into `group` without going through the gateway.
    pub fn force_poll_group(&mut self, handle: ConnectionHandle, group: PollGroup) {
        if let Some(link) = self.links.get_mut(&handle) {
            link.group = Some(group);
            link.held_group = None;
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Frames the gateway has sent to `handle`, oldest first.
    pub fn sent(&self, handle: ConnectionHandle) -> &[Vec<u8>] {
        self.links
            .get(&handle)
            .map(|link| link.sent.as_slice())
            .unwrap_or(&[])
    }

    /// Removes and returns the frames sent to `handle`.
    pub fn take_sent(&mut self, handle: ConnectionHandle) -> Vec<Vec<u8>> {
        self.links
            .get_mut(&handle)
            .map(|link| std::mem::take(&mut link.sent))
            .unwrap_or_default()
    }

    pub fn is_open(&self, handle: ConnectionHandle) -> bool {
        self.links
            .get(&handle)
            .is_some_and(|link| link.state == LinkState::Open)
    }

    pub fn is_closed(&self, handle: ConnectionHandle) -> bool {
        self.links
            .get(&handle)
            .is_some_and(|link| link.state == LinkState::Closed)
    }

    pub fn close_reason(&self, handle: ConnectionHandle) -> Option<&str> {
        self.links
            .get(&handle)
            .and_then(|link| link.close_reason.as_deref())
    }

    /// How many times the gateway called `close` on `handle`.
    pub fn close_calls(&self, handle: ConnectionHandle) -> usize {
        self.links.get(&handle).map_or(0, |link| link.close_calls)
    }

    /// The poll group the transport currently delivers `handle` through.
    pub fn poll_group(&self, handle: ConnectionHandle) -> Option<PollGroup> {
        self.links.get(&handle).and_then(|link| link.group)
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbox.len()
    }
}

impl TransportAdapter for MemoryTransport {
    fn poll_events(&mut self) -> Vec<TransportEvent> {
        self.events.drain(..).collect()
    }

    fn accept(&mut self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let link = self
            .links
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        if link.state != LinkState::Connecting {
            return Err(TransportError::ConnectionClosed(handle));
        }
        link.state = LinkState::Open;
        self.events.push_back(TransportEvent::Connected {
            handle,
            peer: link.peer,
        });
        Ok(())
    }

    fn send(&mut self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let link = self
            .links
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        if link.state != LinkState::Open {
            return Err(TransportError::ConnectionClosed(handle));
        }
        if link.fail_sends {
            return Err(TransportError::SendFailed {
                handle,
                reason: "no route to peer".to_string(),
            });
        }
        link.sent.push(bytes.to_vec());
        Ok(())
    }

    fn receive(&mut self, group: PollGroup, max_messages: usize) -> Vec<RawMessage> {
        let links = &self.links;
        self.inbox.retain(|message| {
            links
                .get(&message.handle)
                .is_some_and(|link| link.state == LinkState::Open)
        });
        drain_group(
            &mut self.inbox,
            max_messages,
            |handle| links.get(&handle).and_then(|link| link.group),
            group,
        )
    }

    fn close(&mut self, handle: ConnectionHandle, reason: &str) {
        if let Some(link) = self.links.get_mut(&handle) {
            link.close_calls += 1;
            if link.state != LinkState::Closed {
                link.state = LinkState::Closed;
                link.close_reason = Some(reason.to_string());
            }
        }
    }

    fn set_poll_group(
        &mut self,
        handle: ConnectionHandle,
        group: PollGroup,
    ) -> Result<(), TransportError> {
        let hold = self.hold_group_switches;
        let link = self
            .links
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        if link.state != LinkState::Open {
            return Err(TransportError::ConnectionClosed(handle));
        }
        if hold && link.group.is_some() {
            link.held_group = Some(group);
        } else {
            link.group = Some(group);
        }
        Ok(())
    }

    fn quick_stats(&self, handle: ConnectionHandle) -> Option<QuickStats> {
        self.links
            .get(&handle)
            .filter(|link| link.state == LinkState::Open)
            .and_then(|link| link.ping_ms)
            .map(|ping_ms| QuickStats { ping_ms })
    }

    fn display_name(&self, handle: ConnectionHandle) -> Option<String> {
        self.links
            .get(&handle)
            .and_then(|link| link.display_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_accept_flow() {
        let mut transport = MemoryTransport::new();
        let handle = transport.connect(PeerIdentity(5));
        assert_eq!(
            transport.poll_events(),
            vec![TransportEvent::Connecting {
                handle,
                peer: PeerIdentity(5)
            }]
        );

        transport.accept(handle).unwrap();
        assert!(transport.is_open(handle));
        assert_eq!(
            transport.poll_events(),
            vec![TransportEvent::Connected {
                handle,
                peer: PeerIdentity(5)
            }]
        );
    }

    #[test]
    fn test_local_close_is_idempotent() {
        let mut transport = MemoryTransport::new();
        let handle = transport.connect(PeerIdentity(1));
        transport.accept(handle).unwrap();
        transport.close(handle, "bye");
        transport.close(handle, "again");
        transport.close(ConnectionHandle(999), "unknown");

        assert!(transport.is_closed(handle));
        assert_eq!(transport.close_reason(handle), Some("bye"));
        assert_eq!(transport.close_calls(handle), 2);
        assert!(transport.send(handle, b"x").is_err());
    }

    #[test]
    fn test_receive_filters_by_group() {
        let mut transport = MemoryTransport::new();
        let a = transport.connect(PeerIdentity(1));
        let b = transport.connect(PeerIdentity(2));
        transport.accept(a).unwrap();
        transport.accept(b).unwrap();
        transport.set_poll_group(a, PollGroup::Joining).unwrap();
        transport.set_poll_group(b, PollGroup::Active).unwrap();

        transport.deliver(a, b"a1".to_vec());
        transport.deliver(b, b"b1".to_vec());
        transport.deliver(a, b"a2".to_vec());

        let joining = transport.receive(PollGroup::Joining, 16);
        assert_eq!(joining.len(), 2);
        assert_eq!(joining[0].bytes, b"a1");
        assert_eq!(joining[1].bytes, b"a2");
        assert_eq!(transport.receive(PollGroup::Active, 16).len(), 1);
    }

    #[test]
    fn test_held_group_switch() {
        let mut transport = MemoryTransport::new();
        let handle = transport.connect(PeerIdentity(1));
        transport.accept(handle).unwrap();
        transport.set_poll_group(handle, PollGroup::Joining).unwrap();

        transport.hold_group_switches(true);
        transport.set_poll_group(handle, PollGroup::Active).unwrap();
        assert_eq!(transport.poll_group(handle), Some(PollGroup::Joining));

        transport.release_group_switches();
        assert_eq!(transport.poll_group(handle), Some(PollGroup::Active));
    }

    #[test]
    fn test_frames_from_closed_links_are_dropped() {
        let mut transport = MemoryTransport::new();
        let handle = transport.connect(PeerIdentity(1));
        transport.accept(handle).unwrap();
        transport.set_poll_group(handle, PollGroup::Joining).unwrap();
        transport.deliver(handle, b"late".to_vec());
        transport.close(handle, "gone");

        assert!(transport.receive(PollGroup::Joining, 16).is_empty());
        assert_eq!(transport.pending_inbound(), 0);
    }
}
