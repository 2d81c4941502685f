//! The connection registry.
//!
//! Records live in a slot arena; the handle, participant and peer maps are
//! index views over the arena. Every mutation goes through this type, so an
//! index can never outlive the record it points at: `remove` clears the slot
//! and all three views in one call.

use super::{ConnectionId, ConnectionRecord};
use crate::error::RegistryError;
use crate::types::{ConnectionHandle, ParticipantId, PeerIdentity, Phase};
use std::collections::HashMap;
use tracing::error;

type Slot = usize;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: Vec<Option<ConnectionRecord>>,
    free: Vec<Slot>,
    by_handle: HashMap<ConnectionHandle, Slot>,
    by_participant: HashMap<ParticipantId, Slot>,
    by_peer: HashMap<PeerIdentity, Slot>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection in the joining phase.
    pub fn insert(
        &mut self,
        handle: ConnectionHandle,
        peer: PeerIdentity,
        display_name: String,
    ) -> Result<&ConnectionRecord, RegistryError> {
        if self.by_handle.contains_key(&handle) {
            return Err(RegistryError::DuplicateHandle(handle));
        }
        if self.by_peer.contains_key(&peer) {
            return Err(RegistryError::DuplicatePeer(peer));
        }

        let record = ConnectionRecord::new(handle, peer, display_name);
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(record);
                slot
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        };
        self.by_handle.insert(handle, slot);
        self.by_peer.insert(peer, slot);

        self.slots[slot]
            .as_ref()
            .ok_or(RegistryError::UnknownHandle(handle))
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<&ConnectionRecord> {
        self.by_handle.get(&handle).and_then(|&slot| self.record(slot))
    }

    pub fn get_by_participant(&self, participant: ParticipantId) -> Option<&ConnectionRecord> {
        self.by_participant
            .get(&participant)
            .and_then(|&slot| self.record(slot))
    }

    pub fn get_by_peer(&self, peer: PeerIdentity) -> Option<&ConnectionRecord> {
        self.by_peer.get(&peer).and_then(|&slot| self.record(slot))
    }

    /// Looks up a record by its public identifier string.
    ///
    /// The string must be well formed and its peer part must match the peer
    /// actually registered for the handle; stale or forged identifiers
    /// resolve to `None`.
    pub fn resolve(&self, connection_id: &str) -> Option<&ConnectionRecord> {
        let id = ConnectionId::parse(connection_id)?;
        self.get(id.handle).filter(|record| record.peer == id.peer)
    }

    /// Binds `participant` to a joining connection and makes it active.
    ///
    /// Promoting an active record, or binding a participant that is already
    /// bound, is a caller bug: it trips a debug assertion and is otherwise
    /// refused without touching the registry.
    pub fn promote(
        &mut self,
        handle: ConnectionHandle,
        participant: ParticipantId,
    ) -> Result<(), RegistryError> {
        let slot = *self
            .by_handle
            .get(&handle)
            .ok_or(RegistryError::UnknownHandle(handle))?;

        if let Some(&existing_slot) = self.by_participant.get(&participant) {
            let existing = self
                .record(existing_slot)
                .map_or(handle, |record| record.handle);
            let err = RegistryError::ParticipantBound {
                participant,
                existing,
            };
            invariant_violation(&err);
            return Err(err);
        }

        let record = self.slots[slot]
            .as_mut()
            .ok_or(RegistryError::UnknownHandle(handle))?;
        if record.phase != Phase::Joining {
            let err = RegistryError::AlreadyActive(handle);
            invariant_violation(&err);
            return Err(err);
        }

        record.phase = Phase::Active;
        record.participant = Some(participant);
        self.by_participant.insert(participant, slot);
        Ok(())
    }

    /// Replaces the cached display name; returns whether the record exists.
    pub fn set_display_name(&mut self, handle: ConnectionHandle, name: String) -> bool {
        let Some(&slot) = self.by_handle.get(&handle) else {
            return false;
        };
        match self.slots[slot].as_mut() {
            Some(record) => {
                record.display_name = name;
                true
            }
            None => false,
        }
    }

    /// Removes a record from the arena and from all three indices.
    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<ConnectionRecord> {
        let slot = self.by_handle.remove(&handle)?;
        let record = self.slots[slot].take()?;
        self.free.push(slot);

        if self.by_peer.get(&record.peer) == Some(&slot) {
            self.by_peer.remove(&record.peer);
        }
        if let Some(participant) = record.participant {
            if self.by_participant.get(&participant) == Some(&slot) {
                self.by_participant.remove(&participant);
            }
        }
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// All records, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.slots.iter().flatten()
    }

    /// Active records only.
    pub fn active(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.iter().filter(|record| record.is_active())
    }

    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.iter().map(|record| record.handle).collect()
    }

    /// Cross-checks the arena against all three indices.
    ///
    /// Any record whose indices disagree with it is dropped from the registry
    /// entirely, and dangling index entries are discarded. The dropped
    /// records are returned so the caller can close their connections.
    pub fn audit(&mut self) -> Vec<ConnectionRecord> {
        let mut broken: Vec<Slot> = Vec::new();

        for (slot, entry) in self.slots.iter().enumerate() {
            let Some(record) = entry else { continue };
            let handle_ok = self.by_handle.get(&record.handle) == Some(&slot);
            let peer_ok = self.by_peer.get(&record.peer) == Some(&slot);
            let participant_ok = match (record.phase, record.participant) {
                (Phase::Active, Some(participant)) => {
                    self.by_participant.get(&participant) == Some(&slot)
                }
                (Phase::Joining, None) => true,
                _ => false,
            };
            if !(handle_ok && peer_ok && participant_ok) {
                broken.push(slot);
            }
        }

        let mut removed = Vec::new();
        for slot in broken {
            if let Some(record) = self.slots[slot].take() {
                self.free.push(slot);
                removed.push(record);
            }
        }

        let slots = &self.slots;
        let live = |slot: &Slot| slots.get(*slot).is_some_and(Option::is_some);
        self.by_handle.retain(|handle, slot| {
            live(slot) && slots[*slot].as_ref().is_some_and(|r| r.handle == *handle)
        });
        self.by_peer.retain(|peer, slot| {
            live(slot) && slots[*slot].as_ref().is_some_and(|r| r.peer == *peer)
        });
        self.by_participant.retain(|participant, slot| {
            live(slot)
                && slots[*slot]
                    .as_ref()
                    .is_some_and(|r| r.participant == Some(*participant))
        });

        removed
    }

    fn record(&self, slot: Slot) -> Option<&ConnectionRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }
}

fn invariant_violation(err: &RegistryError) {
    error!("Connection registry invariant violated: {}", err);
    debug_assert!(false, "connection registry invariant violated: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(handles: &[(u32, u64)]) -> ConnectionRegistry {
        let mut registry = ConnectionRegistry::new();
        for &(handle, peer) in handles {
            registry
                .insert(ConnectionHandle(handle), PeerIdentity(peer), String::new())
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = registry_with(&[(1, 100), (2, 200)]);
        let record = registry.get(ConnectionHandle(1)).unwrap();
        assert_eq!(record.peer(), PeerIdentity(100));
        assert_eq!(record.phase(), Phase::Joining);
        assert_eq!(record.participant(), None);
        assert_eq!(
            registry.get_by_peer(PeerIdentity(200)).unwrap().handle(),
            ConnectionHandle(2)
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_handle_and_peer_rejected() {
        let mut registry = registry_with(&[(1, 100)]);
        assert_eq!(
            registry
                .insert(ConnectionHandle(1), PeerIdentity(101), String::new())
                .unwrap_err(),
            RegistryError::DuplicateHandle(ConnectionHandle(1))
        );
        assert_eq!(
            registry
                .insert(ConnectionHandle(2), PeerIdentity(100), String::new())
                .unwrap_err(),
            RegistryError::DuplicatePeer(PeerIdentity(100))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_promote_binds_participant_both_ways() {
        let mut registry = registry_with(&[(1, 100), (2, 200)]);
        registry
            .promote(ConnectionHandle(2), ParticipantId(7))
            .unwrap();

        let by_participant = registry.get_by_participant(ParticipantId(7)).unwrap();
        assert_eq!(by_participant.handle(), ConnectionHandle(2));
        let by_handle = registry.get(ConnectionHandle(2)).unwrap();
        assert_eq!(by_handle.participant(), Some(ParticipantId(7)));
        assert!(by_handle.is_active());
        assert_eq!(registry.active().count(), 1);
    }

    #[test]
    fn test_promote_unknown_handle() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(
            registry.promote(ConnectionHandle(9), ParticipantId(1)),
            Err(RegistryError::UnknownHandle(ConnectionHandle(9)))
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invariant violated")]
    fn test_double_promotion_asserts_in_debug() {
        let mut registry = registry_with(&[(1, 100)]);
        registry.promote(ConnectionHandle(1), ParticipantId(7)).unwrap();
        let _ = registry.promote(ConnectionHandle(1), ParticipantId(8));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_double_promotion_refused_in_release() {
        let mut registry = registry_with(&[(1, 100)]);
        registry.promote(ConnectionHandle(1), ParticipantId(7)).unwrap();
        assert_eq!(
            registry.promote(ConnectionHandle(1), ParticipantId(8)),
            Err(RegistryError::AlreadyActive(ConnectionHandle(1)))
        );
        assert_eq!(
            registry.get(ConnectionHandle(1)).unwrap().participant(),
            Some(ParticipantId(7))
        );
        assert!(registry.get_by_participant(ParticipantId(8)).is_none());
    }

    #[test]
    fn test_remove_clears_every_index() {
        let mut registry = registry_with(&[(1, 100), (2, 200)]);
        registry.promote(ConnectionHandle(1), ParticipantId(7)).unwrap();

        let removed = registry.remove(ConnectionHandle(1)).unwrap();
        assert_eq!(removed.participant(), Some(ParticipantId(7)));
        assert!(registry.get(ConnectionHandle(1)).is_none());
        assert!(registry.get_by_participant(ParticipantId(7)).is_none());
        assert!(registry.get_by_peer(PeerIdentity(100)).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(ConnectionHandle(1)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut registry = registry_with(&[(1, 100)]);
        registry.remove(ConnectionHandle(1));
        registry
            .insert(ConnectionHandle(2), PeerIdentity(100), String::new())
            .unwrap();
        assert_eq!(registry.slots.len(), 1);
        assert_eq!(
            registry.get_by_peer(PeerIdentity(100)).unwrap().handle(),
            ConnectionHandle(2)
        );
    }

    #[test]
    fn test_resolve_checks_peer() {
        let registry = registry_with(&[(42, 76561198000000001)]);
        assert!(registry.resolve("SN_76561198000000001_42").is_some());
        assert!(registry.resolve("SN_76561198000000002_42").is_none());
        assert!(registry.resolve("SN_76561198000000001_43").is_none());
        assert!(registry.resolve("garbage").is_none());
    }

    #[test]
    fn test_display_name_update() {
        let mut registry = registry_with(&[(1, 100)]);
        assert!(registry.set_display_name(ConnectionHandle(1), "Abigail".to_string()));
        assert_eq!(registry.get(ConnectionHandle(1)).unwrap().display_name(), "Abigail");
        assert!(!registry.set_display_name(ConnectionHandle(2), "Nobody".to_string()));
    }

    #[test]
    fn test_audit_clean_registry_removes_nothing() {
        let mut registry = registry_with(&[(1, 100), (2, 200)]);
        registry.promote(ConnectionHandle(1), ParticipantId(7)).unwrap();
        assert!(registry.audit().is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_audit_heals_diverged_index() {
        let mut registry = registry_with(&[(1, 100), (2, 200)]);
        registry.promote(ConnectionHandle(1), ParticipantId(7)).unwrap();

        // Simulate divergence: the participant index loses its entry.
        registry.by_participant.clear();

        let removed = registry.audit();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].handle(), ConnectionHandle(1));
        assert!(registry.get(ConnectionHandle(1)).is_none());
        assert!(registry.get_by_peer(PeerIdentity(100)).is_none());
        assert!(registry.get(ConnectionHandle(2)).is_some());
        assert!(registry.audit().is_empty());
    }
}
