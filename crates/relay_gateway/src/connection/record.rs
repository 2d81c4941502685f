//! Per-connection state.

use super::ConnectionId;
use crate::types::{ConnectionHandle, ParticipantId, PeerIdentity, Phase};
use std::time::SystemTime;

/// State the registry keeps for one live connection.
///
/// Records are only mutated through [`ConnectionRegistry`](super::ConnectionRegistry),
/// which is what keeps an active record's participant id bound to exactly
/// this record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub(crate) handle: ConnectionHandle,
    pub(crate) peer: PeerIdentity,
    pub(crate) display_name: String,
    pub(crate) participant: Option<ParticipantId>,
    pub(crate) phase: Phase,
    pub(crate) connected_at: SystemTime,
}

impl ConnectionRecord {
    /// Creates a record in the joining phase.
    pub(crate) fn new(handle: ConnectionHandle, peer: PeerIdentity, display_name: String) -> Self {
        Self {
            handle,
            peer,
            display_name,
            participant: None,
            phase: Phase::Joining,
            connected_at: SystemTime::now(),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn peer(&self) -> PeerIdentity {
        self.peer
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The bound participant; `None` while joining.
    pub fn participant(&self) -> Option<ParticipantId> {
        self.participant
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.peer, self.handle)
    }
}
