//! # Core Type Definitions
//!
//! Identifier newtypes shared by every gateway component. Wrapping the raw
//! integers keeps a connection handle from being confused with a peer identity
//! or a participant id, even though all three are plain unsigned numbers on
//! the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque connection handle issued by the transport.
///
/// The gateway never mints these itself; it only stores them as map keys and
/// hands them back to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionHandle(pub u32);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-scoped identity of the remote peer.
///
/// Stable for one connection attempt and used for ban checks and duplicate
/// connection detection. It says nothing about game accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerIdentity(pub u64);

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Simulation-assigned identifier of an admitted participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Admission phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Connected but not yet bound to a participant slot.
    Joining,
    /// Admitted and bound to exactly one participant.
    Active,
}

/// Transport-level batch a connection receives through.
///
/// There is one poll group per [`Phase`]; the gateway moves a connection from
/// `Joining` to `Active` when it is admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PollGroup {
    Joining,
    Active,
}

impl From<Phase> for PollGroup {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Joining => PollGroup::Joining,
            Phase::Active => PollGroup::Active,
        }
    }
}
