//! Message type definitions for gateway/peer communication.
//!
//! Every frame on the wire carries one [`Envelope`]: a [`MessageKind`] and an
//! opaque byte payload. Payload bytes are base64 encoded inside the JSON so
//! the envelope stays valid UTF-8.
//!
//! ```json
//! { "kind": "select_slot", "data": "Mg==" }
//! { "kind": { "game": 3 }, "data": "aGVsbG8=" }
//! ```

use crate::connection::ConnectionId;
use crate::error::CodecError;
use crate::types::{ParticipantId, Phase};
use serde::{Deserialize, Serialize};

/// Classifies an envelope for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Server to peer: the slot list, sent once on entering the joining phase.
    AvailableSlots,
    /// Peer to server: choice of participant slot. Only legal while joining.
    SelectSlot,
    /// Intermediate admission round-trip, either direction.
    Handshake,
    /// Server to peer: forced disconnect or rejection notice. Data is the
    /// UTF-8 reason.
    Disconnect,
    /// Simulation traffic on a numbered channel.
    Game(u8),
}

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn new(kind: MessageKind, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Simulation message on `channel`.
    pub fn game(channel: u8, data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Game(channel), data)
    }

    pub fn handshake(data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Handshake, data)
    }

    pub fn select_slot(data: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::SelectSlot, data)
    }

    /// Forced-disconnect notice carrying a human-readable reason.
    pub fn disconnect(reason: &str) -> Self {
        Self::new(MessageKind::Disconnect, reason.as_bytes().to_vec())
    }

    /// Slot list offered to a joining peer.
    pub fn available_slots(slots: &[ParticipantSlot]) -> Result<Self, CodecError> {
        let data = serde_json::to_vec(slots)?;
        Ok(Self::new(MessageKind::AvailableSlots, data))
    }

    /// Decodes the slot list of an `AvailableSlots` envelope.
    pub fn slots(&self) -> Option<Vec<ParticipantSlot>> {
        match self.kind {
            MessageKind::AvailableSlots => serde_json::from_slice(&self.data).ok(),
            _ => None,
        }
    }

    /// The reason text of a `Disconnect` envelope.
    pub fn reason(&self) -> Option<String> {
        match self.kind {
            MessageKind::Disconnect => Some(String::from_utf8_lossy(&self.data).into_owned()),
            _ => None,
        }
    }
}

/// One participant slot offered to a joining peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSlot {
    pub participant_id: ParticipantId,
    pub label: String,
    #[serde(default)]
    pub occupied: bool,
}

/// A routed inbound message as delivered to the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Public identifier of the sending connection.
    pub connection: ConnectionId,
    /// The sender's participant, once admitted.
    pub participant: Option<ParticipantId>,
    /// Phase the message was routed under.
    pub phase: Phase,
    pub envelope: Envelope,
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
