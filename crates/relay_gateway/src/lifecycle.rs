//! Connection lifecycle and cleanup.
//!
//! Every connection enters and leaves the registry through this module:
//! transport status changes, operator kicks and bans, and gateway-initiated
//! closes all end in [`Gateway::close_connection`], which tears down the
//! transport side and then clears every piece of per-connection state in one
//! place.

use crate::callbacks::GatewayCallbacks;
use crate::connection::ConnectionRecord;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::messaging::Envelope;
use crate::transport::{TransportAdapter, TransportEvent};
use crate::types::{ConnectionHandle, ParticipantId, PeerIdentity, PollGroup};
use tracing::{debug, error, info, warn};

/// Upper bound on `poll_events` drains per tick.
///
/// Accepting a connection can make the transport report it as connected
/// straight away; draining again lets a fresh arrival reach the joining
/// phase within the tick it was proposed.
const MAX_EVENT_ROUNDS: usize = 4;

impl<T: TransportAdapter, C: GatewayCallbacks> Gateway<T, C> {
    /// Drains and applies pending transport status changes.
    pub(crate) fn process_transport_events(&mut self) {
        for _ in 0..MAX_EVENT_ROUNDS {
            let events = self.transport.poll_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.report.events += 1;
                self.handle_transport_event(event);
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting { handle, peer } => self.on_connecting(handle, peer),
            TransportEvent::Connected { handle, peer } => self.on_connected(handle, peer),
            TransportEvent::Closed { handle, reason } => {
                debug!("Transport closed connection {}: {}", handle, reason);
                self.finalize_close(handle, &reason);
            }
            TransportEvent::BackendLost { reason } => {
                error!("💥 Relay backend lost: {}", reason);
                self.callbacks.on_transport_lost(&reason);
                self.report.backend_lost = Some(reason);
            }
        }
    }

    /// Ban and capacity checks for a proposed connection.
    ///
    /// A refused attempt never gets a connection record.
    fn on_connecting(&mut self, handle: ConnectionHandle, peer: PeerIdentity) {
        if self.is_banned(peer) {
            info!("🚫 Refusing banned peer {} on connection {}", peer, handle);
            self.transport.close(handle, "banned");
            self.report.rejected += 1;
            return;
        }

        let replaced = usize::from(self.registry.get_by_peer(peer).is_some());
        let live = self.registry.len() + self.accepted.len() - replaced;
        if live >= self.config.max_connections {
            let err = GatewayError::Capacity {
                limit: self.config.max_connections,
            };
            warn!("Refusing peer {} on connection {}: {}", peer, handle, err);
            self.transport.close(handle, err.peer_reason());
            self.report.rejected += 1;
            return;
        }

        match self.transport.accept(handle) {
            Ok(()) => {
                debug!("Accepted connection {} from peer {}", handle, peer);
                self.accepted.insert(handle, peer);
            }
            Err(e) => {
                let err = GatewayError::from(e);
                warn!("Accepting connection {} failed, closing: {}", handle, err);
                self.transport.close(handle, err.peer_reason());
                self.report.rejected += 1;
            }
        }
    }

    /// Creates the joining record and offers the available slots.
    fn on_connected(&mut self, handle: ConnectionHandle, peer: PeerIdentity) {
        match self.accepted.remove(&handle) {
            Some(expected) if expected == peer => {}
            Some(expected) => {
                warn!(
                    "Connection {} came up as peer {} but was accepted for {}",
                    handle, peer, expected
                );
                self.transport.close(handle, "identity mismatch");
                return;
            }
            None => {
                warn!("Connection {} came up without being accepted", handle);
                self.transport.close(handle, "unexpected connection");
                return;
            }
        }

        let stale = self.registry.get_by_peer(peer).map(ConnectionRecord::handle);
        if let Some(stale) = stale {
            info!(
                "🔁 Peer {} reconnected on {}, dropping connection {}",
                peer, handle, stale
            );
            self.close_with_notice(stale, "replaced by new connection");
        }

        let display_name = self
            .transport
            .display_name(handle)
            .unwrap_or_else(|| peer.to_string());
        let connection = match self.registry.insert(handle, peer, display_name) {
            Ok(record) => record.connection_id(),
            Err(e) => {
                warn!("Could not register connection {}: {}", handle, e);
                self.close_connection(handle, "internal error");
                return;
            }
        };

        if let Err(e) = self.transport.set_poll_group(handle, PollGroup::Joining) {
            warn!("Poll group assignment failed for {}: {}", connection, e);
            self.close_connection(handle, "transport failure");
            return;
        }

        info!("🔗 Connection {} opened", connection);
        self.callbacks.on_connection_opened(connection);

        let slots = self.callbacks.enumerate_available_slots(peer);
        let offer = match Envelope::available_slots(&slots) {
            Ok(offer) => offer,
            Err(e) => {
                error!("Could not encode slot list for {}: {}", connection, e);
                self.close_connection(handle, "internal error");
                return;
            }
        };
        if let Err(e) = self.send_to_connection(handle, &offer) {
            debug!("Slot list not delivered to {}: {}", connection, e);
        }
    }

    /// Closes a connection on the transport and cleans up after it.
    ///
    /// Idempotent: closing an unknown or already removed handle is a no-op
    /// apart from the transport call.
    pub fn close_connection(&mut self, handle: ConnectionHandle, reason: &str) {
        self.transport.close(handle, reason);
        self.finalize_close(handle, reason);
    }

    /// Sends a best-effort `Disconnect` notice, then closes.
    pub(crate) fn close_with_notice(&mut self, handle: ConnectionHandle, reason: &str) {
        if self.registry.get(handle).is_some() {
            let notice = Envelope::disconnect(reason);
            if let Err(e) = self.outbound.transmit(&mut self.transport, handle, &notice) {
                debug!("Disconnect notice to {} not delivered: {}", handle, e);
            }
        }
        self.close_connection(handle, reason);
    }

    /// Drops all gateway state for `handle` and notifies the simulation.
    pub(crate) fn finalize_close(&mut self, handle: ConnectionHandle, reason: &str) {
        self.accepted.remove(&handle);
        self.pending_admissions.remove(&handle);
        self.recently_admitted.remove(&handle);
        self.closed_this_tick.insert(handle);

        if let Some(record) = self.registry.remove(handle) {
            self.release_record(record, reason);
        }
    }

    /// Simulation notifications for a record that has left the registry.
    pub(crate) fn release_record(&mut self, record: ConnectionRecord, reason: &str) {
        let connection = record.connection_id();
        info!("🔌 Connection {} closed: {}", connection, reason);

        if let Some(participant) = record.participant() {
            self.callbacks.on_participant_disconnected(participant);
        }
        self.callbacks.on_connection_closed(connection);
        self.callbacks.on_peer_released(record.peer());
        self.report.closed += 1;
    }

    /// Disconnects an active participant, telling the peer why first.
    pub fn kick(&mut self, participant: ParticipantId, reason: &str) -> Result<(), GatewayError> {
        let handle = self
            .registry
            .get_by_participant(participant)
            .map(ConnectionRecord::handle)
            .ok_or(GatewayError::ParticipantNotFound(participant))?;

        info!("👢 Kicking participant {}: {}", participant, reason);
        self.close_with_notice(handle, reason);
        Ok(())
    }

    /// Bans a peer from future connection attempts.
    ///
    /// Connections the peer already has stay open; use
    /// [`ban_participant`](Self::ban_participant) to also remove them.
    pub fn ban(&mut self, peer: PeerIdentity) {
        if self.banned.insert(peer) {
            info!("🔨 Peer {} banned", peer);
        }
    }

    pub fn unban(&mut self, peer: PeerIdentity) -> bool {
        let removed = self.banned.remove(&peer);
        if removed {
            info!("Peer {} unbanned", peer);
        }
        removed
    }

    /// Whether `peer` is banned by the operator list or by the simulation.
    pub fn is_banned(&self, peer: PeerIdentity) -> bool {
        self.banned.contains(&peer) || self.callbacks.is_banned(peer)
    }

    /// Bans the peer behind an active participant and kicks it.
    pub fn ban_participant(
        &mut self,
        participant: ParticipantId,
        reason: &str,
    ) -> Result<(), GatewayError> {
        let peer = self
            .registry
            .get_by_participant(participant)
            .map(ConnectionRecord::peer)
            .ok_or(GatewayError::ParticipantNotFound(participant))?;
        self.ban(peer);
        self.kick(participant, reason)
    }

    /// Notifies and closes every connection, including ones still being
    /// established. Returns how many registered connections were closed.
    pub fn shutdown(&mut self, reason: &str) -> usize {
        info!("🛑 Shutting down gateway: {}", reason);

        let pending: Vec<ConnectionHandle> = self.accepted.keys().copied().collect();
        for handle in pending {
            self.close_connection(handle, reason);
        }

        let handles = self.registry.handles();
        for &handle in &handles {
            self.close_with_notice(handle, reason);
        }
        handles.len()
    }
}
