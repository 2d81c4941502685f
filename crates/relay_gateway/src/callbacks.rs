//! Simulation-side contract consumed by the gateway.
//!
//! The gateway never reaches into simulation state. Everything it needs from
//! the simulation, and every notification it gives back, goes through
//! [`GatewayCallbacks`], injected when the [`Gateway`](crate::Gateway) is
//! constructed.

use crate::admission::{AdmissionTicket, AdmissionVerdict, Responder};
use crate::connection::ConnectionId;
use crate::messaging::{InboundMessage, ParticipantSlot};
use crate::types::{ParticipantId, PeerIdentity};

pub trait GatewayCallbacks {
    /// Simulation-side ban check, consulted before a connection is accepted.
    fn is_banned(&self, peer: PeerIdentity) -> bool;

    /// Slots offered to a peer as soon as it enters the joining phase.
    fn enumerate_available_slots(&mut self, peer: PeerIdentity) -> Vec<ParticipantSlot>;

    /// Decides a slot selection.
    ///
    /// `payload` is the raw selection data sent by the peer. The responder
    /// can push further handshake messages to the peer before the decision.
    /// Return `ticket.accept(..)` or `ticket.reject(..)` to decide now, or
    /// keep the ticket, return [`AdmissionVerdict::Deferred`], and hand the
    /// decision to [`Gateway::resolve_admission`](crate::Gateway::resolve_admission)
    /// on a later tick.
    fn check_admission(
        &mut self,
        ticket: AdmissionTicket,
        payload: &[u8],
        responder: &mut Responder<'_>,
    ) -> AdmissionVerdict;

    /// Every routed message that is not a slot selection, from both phases.
    fn on_inbound_message(&mut self, message: InboundMessage);

    fn on_connection_opened(&mut self, _connection: ConnectionId) {}

    fn on_connection_closed(&mut self, _connection: ConnectionId) {}

    /// An active participant's connection went away. Never called for
    /// connections that were still joining.
    fn on_participant_disconnected(&mut self, _participant: ParticipantId) {}

    /// Release anything provisionally claimed for `peer`, such as a slot
    /// reservation made during a deferred admission.
    fn on_peer_released(&mut self, _peer: PeerIdentity) {}

    /// The transport lost its relay backend.
    fn on_transport_lost(&mut self, _reason: &str) {}
}
