//! Admission: turning a joining connection into an active participant.
//!
//! A joining peer sends exactly one slot selection. The gateway wraps the
//! connection in an [`AdmissionTicket`] and asks the simulation to decide.
//! The ticket is consumed by value when the decision is made, so a
//! connection is accepted at most once even when the decision is deferred to
//! a later tick.

use crate::callbacks::GatewayCallbacks;
use crate::connection::ConnectionId;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::messaging::{Envelope, MessageKind};
use crate::outbound::OutboundPipeline;
use crate::transport::TransportAdapter;
use crate::types::{ConnectionHandle, ParticipantId, Phase, PollGroup};
use tracing::{debug, info, warn};

/// One-shot right to decide a connection's admission.
///
/// Only the gateway creates tickets. They cannot be cloned.
#[derive(Debug, PartialEq, Eq)]
pub struct AdmissionTicket {
    connection: ConnectionId,
}

impl AdmissionTicket {
    pub(crate) fn new(connection: ConnectionId) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.connection.handle
    }

    /// Admits the connection as `participant`.
    pub fn accept(self, participant: ParticipantId) -> AdmissionVerdict {
        AdmissionVerdict::Accepted {
            ticket: self,
            participant,
        }
    }

    /// Refuses the connection; `reason` is shown to the peer.
    pub fn reject(self, reason: impl Into<String>) -> AdmissionVerdict {
        AdmissionVerdict::Rejected {
            ticket: self,
            reason: reason.into(),
        }
    }
}

/// Outcome of [`GatewayCallbacks::check_admission`].
#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Accepted {
        ticket: AdmissionTicket,
        participant: ParticipantId,
    },
    Rejected {
        ticket: AdmissionTicket,
        reason: String,
    },
    /// The simulation kept the ticket and will decide later.
    Deferred,
}

/// Lets the simulation talk to a joining peer while deciding its admission.
pub struct Responder<'a> {
    handle: ConnectionHandle,
    transport: &'a mut dyn TransportAdapter,
    outbound: &'a mut OutboundPipeline,
    failed: bool,
}

impl<'a> Responder<'a> {
    pub(crate) fn new(
        handle: ConnectionHandle,
        transport: &'a mut dyn TransportAdapter,
        outbound: &'a mut OutboundPipeline,
    ) -> Self {
        Self {
            handle,
            transport,
            outbound,
            failed: false,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Sends any envelope to the peer under admission.
    ///
    /// After the first failure every later send is refused; the gateway
    /// closes the connection once the admission callback returns.
    pub fn send(&mut self, envelope: &Envelope) -> Result<(), GatewayError> {
        if self.failed {
            return Err(GatewayError::ConnectionNotFound(self.handle.to_string()));
        }
        match self.outbound.transmit(self.transport, self.handle, envelope) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Sends a `Handshake` envelope.
    pub fn handshake(&mut self, data: impl Into<Vec<u8>>) -> Result<(), GatewayError> {
        self.send(&Envelope::handshake(data))
    }

    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl<T: TransportAdapter, C: GatewayCallbacks> Gateway<T, C> {
    /// Handles a slot selection from a connection in the joining phase.
    pub(crate) fn handle_slot_selection(
        &mut self,
        connection: ConnectionId,
        payload: Vec<u8>,
    ) -> Result<(), GatewayError> {
        let handle = connection.handle;
        if self.pending_admissions.contains_key(&handle) {
            return Err(GatewayError::ProtocolViolation {
                handle,
                phase: Phase::Joining,
                group: PollGroup::Joining,
                kind: MessageKind::SelectSlot,
            });
        }

        self.pending_admissions.insert(handle, connection.peer);
        debug!("🎫 Connection {} selected a slot ({} bytes)", connection, payload.len());

        let ticket = AdmissionTicket::new(connection);
        let mut responder = Responder::new(handle, &mut self.transport, &mut self.outbound);
        let verdict = self
            .callbacks
            .check_admission(ticket, &payload, &mut responder);
        let handshake_failed = responder.failed();

        if handshake_failed {
            warn!("Handshake send to connection {} failed, closing", connection);
            self.close_connection(handle, "transport failure");
        }

        if let Err(e) = self.apply_verdict(verdict) {
            debug!("Admission verdict for {} not applied: {}", connection, e);
        }
        Ok(())
    }

    /// Completes an admission that the simulation deferred.
    ///
    /// Fails with [`GatewayError::AdmissionNotPending`] when the ticket's
    /// connection has closed in the meantime.
    pub fn resolve_admission(&mut self, verdict: AdmissionVerdict) -> Result<(), GatewayError> {
        self.apply_verdict(verdict)
    }

    fn apply_verdict(&mut self, verdict: AdmissionVerdict) -> Result<(), GatewayError> {
        match verdict {
            AdmissionVerdict::Deferred => Ok(()),
            AdmissionVerdict::Rejected { ticket, reason } => {
                let handle = self.claim_pending(ticket.connection())?;
                info!("🚫 Admission rejected for {}: {}", ticket.connection(), reason);
                self.report.rejected += 1;
                self.close_with_notice(handle, &reason);
                Ok(())
            }
            AdmissionVerdict::Accepted {
                ticket,
                participant,
            } => {
                self.claim_pending(ticket.connection())?;
                self.admit(ticket.connection(), participant);
                Ok(())
            }
        }
    }

    /// Takes the pending entry for a ticket's connection.
    ///
    /// A ticket issued to another peer on a reused handle does not match.
    fn claim_pending(&mut self, connection: ConnectionId) -> Result<ConnectionHandle, GatewayError> {
        let handle = connection.handle;
        match self.pending_admissions.get(&handle) {
            Some(&peer) if peer == connection.peer => {
                self.pending_admissions.remove(&handle);
                Ok(handle)
            }
            _ => Err(GatewayError::AdmissionNotPending(handle)),
        }
    }

    fn admit(&mut self, connection: ConnectionId, participant: ParticipantId) {
        let handle = connection.handle;

        if let Some(existing) = self.registry.get_by_participant(participant) {
            warn!(
                "Participant {} already bound to connection {}, refusing {}",
                participant,
                existing.connection_id(),
                connection
            );
            self.report.rejected += 1;
            self.close_with_notice(handle, "participant slot already in use");
            return;
        }

        if let Err(e) = self.registry.promote(handle, participant) {
            warn!("Could not promote connection {}: {}", connection, e);
            self.close_connection(handle, "internal error");
            return;
        }

        if let Err(e) = self.transport.set_poll_group(handle, PollGroup::Active) {
            warn!("Poll group switch failed for {}: {}", connection, e);
            self.close_connection(handle, "transport failure");
            return;
        }

        self.recently_admitted.insert(handle);
        self.report.admitted += 1;
        info!("🎮 Connection {} admitted as participant {}", connection, participant);
    }
}
