//! Error types for the relay gateway.
//!
//! Errors are grouped by the layer that raises them. [`GatewayError`] wraps
//! the lower layers so callers can use `?` across component boundaries.

use crate::messaging::MessageKind;
use crate::types::{ConnectionHandle, ParticipantId, Phase, PollGroup};
use thiserror::Error;

/// Failures reported by a [`TransportAdapter`](crate::transport::TransportAdapter).
///
/// Any of these on a specific handle is fatal for that connection; the
/// gateway never retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unknown connection handle: {0}")]
    UnknownHandle(ConnectionHandle),
    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionHandle),
    #[error("Send failed on connection {handle}: {reason}")]
    SendFailed {
        handle: ConnectionHandle,
        reason: String,
    },
    #[error("Relay backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Failures while turning envelopes into frames and back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Compression failed: {0}")]
    Compression(std::io::Error),
    #[error("Decompression failed: {0}")]
    Decompression(std::io::Error),
    #[error("Decompressed frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Deserialization error: {0}")]
    Deserialization(serde_json::Error),
}

/// Connection registry failures.
///
/// `AlreadyActive` and `ParticipantBound` indicate programming errors in the
/// caller rather than anything a peer can trigger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No connection record for handle {0}")]
    UnknownHandle(ConnectionHandle),
    #[error("Connection handle {0} is already registered")]
    DuplicateHandle(ConnectionHandle),
    #[error("Peer {0} already owns a registered connection")]
    DuplicatePeer(crate::types::PeerIdentity),
    #[error("Connection {0} is already active")]
    AlreadyActive(ConnectionHandle),
    #[error("Participant {participant} is already bound to connection {existing}")]
    ParticipantBound {
        participant: ParticipantId,
        existing: ConnectionHandle,
    },
}

/// Top-level gateway error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),
    #[error("Participant not found: {0}")]
    ParticipantNotFound(ParticipantId),
    #[error("Message from defunct connection {0}")]
    DefunctConnection(ConnectionHandle),
    #[error("Protocol violation on connection {handle}: {kind:?} received via {group:?} group while {phase:?}")]
    ProtocolViolation {
        handle: ConnectionHandle,
        phase: Phase,
        group: PollGroup,
        kind: MessageKind,
    },
    #[error("Admission rejected for connection {handle}: {reason}")]
    AdmissionRejected {
        handle: ConnectionHandle,
        reason: String,
    },
    #[error("No admission pending for connection {0}")]
    AdmissionNotPending(ConnectionHandle),
    #[error("Server full: {limit} connections")]
    Capacity { limit: usize },
}

impl GatewayError {
    /// Short reason suitable for sending to the peer being disconnected.
    pub fn peer_reason(&self) -> &'static str {
        match self {
            GatewayError::Transport(_) => "transport failure",
            GatewayError::Codec(_) => "malformed message",
            GatewayError::ProtocolViolation { .. } => "protocol violation",
            GatewayError::AdmissionRejected { .. } => "admission rejected",
            GatewayError::DefunctConnection(_) => "defunct connection",
            GatewayError::Capacity { .. } => "server full",
            _ => "internal error",
        }
    }
}
