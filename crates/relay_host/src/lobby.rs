//! Minimal lobby simulation.
//!
//! Gives the host something to admit players into: a fixed set of
//! participant slots claimed first come, first served, and a relay that
//! forwards every `game` message from one participant to all the others.

use relay_gateway::{
    AdmissionTicket, AdmissionVerdict, ConnectionId, Envelope, GatewayCallbacks, InboundMessage,
    MessageKind, ParticipantId, ParticipantSlot, Phase, PeerIdentity, Responder,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, trace};

/// Payload of a `select_slot` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSelection {
    pub participant_id: ParticipantId,
}

#[derive(Debug, Clone)]
struct LobbySlot {
    participant: ParticipantId,
    label: String,
    occupant: Option<PeerIdentity>,
}

pub struct LobbySimulation {
    slots: Vec<LobbySlot>,
    outbox: VecDeque<(ParticipantId, Envelope)>,
}

impl LobbySimulation {
    /// Creates a lobby with participant slots `1..=slot_count`.
    pub fn new(slot_count: usize) -> Self {
        let slots = (1..=slot_count as u64)
            .map(|n| LobbySlot {
                participant: ParticipantId(n),
                label: format!("Farmhand {}", n),
                occupant: None,
            })
            .collect();
        Self {
            slots,
            outbox: VecDeque::new(),
        }
    }

    /// Messages the host should send, in the order they were produced.
    pub fn drain_outbox(&mut self) -> Vec<(ParticipantId, Envelope)> {
        self.outbox.drain(..).collect()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.occupant.is_some()).count()
    }

    fn slot_mut(&mut self, participant: ParticipantId) -> Option<&mut LobbySlot> {
        self.slots
            .iter_mut()
            .find(|slot| slot.participant == participant)
    }

    fn occupants_except(&self, sender: ParticipantId) -> Vec<ParticipantId> {
        self.slots
            .iter()
            .filter(|slot| slot.occupant.is_some() && slot.participant != sender)
            .map(|slot| slot.participant)
            .collect()
    }
}

impl GatewayCallbacks for LobbySimulation {
    fn is_banned(&self, _peer: PeerIdentity) -> bool {
        false
    }

    fn enumerate_available_slots(&mut self, _peer: PeerIdentity) -> Vec<ParticipantSlot> {
        self.slots
            .iter()
            .map(|slot| ParticipantSlot {
                participant_id: slot.participant,
                label: slot.label.clone(),
                occupied: slot.occupant.is_some(),
            })
            .collect()
    }

    fn check_admission(
        &mut self,
        ticket: AdmissionTicket,
        payload: &[u8],
        responder: &mut Responder<'_>,
    ) -> AdmissionVerdict {
        let Ok(selection) = serde_json::from_slice::<SlotSelection>(payload) else {
            return ticket.reject("malformed slot selection");
        };
        let peer = ticket.connection().peer;

        let Some(slot) = self.slot_mut(selection.participant_id) else {
            return ticket.reject("no such slot");
        };
        if slot.occupant.is_some_and(|occupant| occupant != peer) {
            return ticket.reject("slot already taken");
        }
        slot.occupant = Some(peer);
        let welcome = format!("welcome, {}", slot.label);

        if responder.handshake(welcome).is_err() {
            self.on_peer_released(peer);
            return ticket.reject("handshake failed");
        }

        info!(
            "🧑‍🌾 Peer {} claimed slot {}",
            peer, selection.participant_id
        );
        ticket.accept(selection.participant_id)
    }

    fn on_inbound_message(&mut self, message: InboundMessage) {
        match (message.phase, message.envelope.kind, message.participant) {
            (Phase::Active, MessageKind::Game(channel), Some(sender)) => {
                let recipients = self.occupants_except(sender);
                trace!(
                    "Relaying channel {} message from {} to {} participant(s)",
                    channel,
                    sender,
                    recipients.len()
                );
                for recipient in recipients {
                    self.outbox.push_back((recipient, message.envelope.clone()));
                }
            }
            (phase, kind, _) => {
                debug!("Ignoring {:?} from {} while {:?}", kind, message.connection, phase);
            }
        }
    }

    fn on_connection_opened(&mut self, connection: ConnectionId) {
        debug!("Connection {} is choosing a slot", connection);
    }

    fn on_participant_disconnected(&mut self, participant: ParticipantId) {
        if let Some(slot) = self.slot_mut(participant) {
            slot.occupant = None;
            info!("👋 Slot {} is free again", participant);
        }
    }

    fn on_peer_released(&mut self, peer: PeerIdentity) {
        for slot in self.slots.iter_mut() {
            if slot.occupant == Some(peer) {
                slot.occupant = None;
            }
        }
    }
}
