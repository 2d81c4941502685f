//! The gateway façade.
//!
//! [`Gateway`] owns the transport, the simulation callbacks, and all
//! per-connection state. Its behaviour is spread over several files, one per
//! component: admission, routing, outbound, and lifecycle each add their own
//! `impl Gateway` block. This file holds the state, the tick driver, and the
//! read-only capabilities exposed to the simulation and operator tooling.

use crate::callbacks::GatewayCallbacks;
use crate::config::GatewayConfig;
use crate::connection::{ConnectionId, ConnectionRecord, ConnectionRegistry};
use crate::error::GatewayError;
use crate::outbound::{BandwidthStats, OutboundPipeline};
use crate::transport::TransportAdapter;
use crate::types::{ConnectionHandle, ParticipantId, PeerIdentity, PollGroup};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{error, info, trace};

/// What happened during one [`Gateway::tick`].
///
/// Operations performed between ticks, such as a kick or a deferred
/// admission being resolved, are counted in the next report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Transport status changes applied.
    pub events: usize,
    /// Messages handed to the simulation's inbound handler.
    pub messages_routed: usize,
    pub admitted: usize,
    /// Refused arrivals and rejected admissions.
    pub rejected: usize,
    /// Registered connections that were closed.
    pub closed: usize,
    /// Connections closed for crossing phases or selecting a slot twice.
    pub violations: usize,
    /// Set when the transport lost its relay backend.
    pub backend_lost: Option<String>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == TickReport::default()
    }
}

/// Connection gateway between a relay transport and a game simulation.
///
/// The gateway is single-threaded and does nothing on its own: the host's
/// tick loop calls [`tick`](Self::tick) at a fixed rate, and the simulation
/// calls the send, kick and ban methods in between.
///
/// # Examples
///
/// ```ignore
/// let mut gateway = Gateway::new(GatewayConfig::default(), transport, lobby);
/// loop {
///     let report = gateway.tick();
///     if let Some(reason) = report.backend_lost {
///         break;
///     }
/// }
/// ```
pub struct Gateway<T: TransportAdapter, C: GatewayCallbacks> {
    pub(crate) config: GatewayConfig,
    pub(crate) transport: T,
    pub(crate) callbacks: C,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) outbound: OutboundPipeline,
    /// Accepted at `Connecting`, not yet reported as connected.
    pub(crate) accepted: HashMap<ConnectionHandle, PeerIdentity>,
    /// Joining connections whose slot selection awaits a verdict, with the
    /// peer the ticket was issued to.
    pub(crate) pending_admissions: HashMap<ConnectionHandle, PeerIdentity>,
    /// Admitted since the end of the previous tick.
    pub(crate) recently_admitted: HashSet<ConnectionHandle>,
    /// Closed since the end of the previous tick; leftover frames are dropped.
    pub(crate) closed_this_tick: HashSet<ConnectionHandle>,
    pub(crate) banned: HashSet<PeerIdentity>,
    pub(crate) report: TickReport,
}

impl<T: TransportAdapter, C: GatewayCallbacks> Gateway<T, C> {
    pub fn new(config: GatewayConfig, transport: T, callbacks: C) -> Self {
        let banned = config.banned_peers.iter().copied().collect();
        let outbound = OutboundPipeline::new(config.compression_threshold);

        info!(
            "🌐 Gateway ready (max {} connections, compression above {} bytes)",
            config.max_connections, config.compression_threshold
        );

        Self {
            config,
            transport,
            callbacks,
            registry: ConnectionRegistry::new(),
            outbound,
            accepted: HashMap::new(),
            pending_admissions: HashMap::new(),
            recently_admitted: HashSet::new(),
            closed_this_tick: HashSet::new(),
            banned,
            report: TickReport::default(),
        }
    }

    /// Runs one gateway pass.
    ///
    /// Applies transport status changes, pumps the joining group and then
    /// the active group, and audits the registry. The one-tick grace window
    /// for freshly admitted connections ends here.
    pub fn tick(&mut self) -> TickReport {
        self.process_transport_events();
        self.pump(PollGroup::Joining);
        self.pump(PollGroup::Active);
        self.audit_registry();

        self.recently_admitted.clear();
        self.closed_this_tick.clear();

        let report = std::mem::take(&mut self.report);
        if !report.is_idle() {
            trace!("Tick report: {:?}", report);
        }
        report
    }

    fn audit_registry(&mut self) {
        let broken = self.registry.audit();
        if broken.is_empty() {
            return;
        }

        let healed = broken.len();
        error!(
            "Connection registry invariant violated: {} inconsistent record(s) removed",
            healed
        );
        for record in broken {
            let handle = record.handle();
            self.transport.close(handle, "internal error");
            self.accepted.remove(&handle);
            self.pending_admissions.remove(&handle);
            self.recently_admitted.remove(&handle);
            self.closed_this_tick.insert(handle);
            self.release_record(record, "internal error");
        }
        debug_assert_eq!(healed, 0, "connection registry invariant violated: index divergence");
    }

    /// Round-trip time to a participant in milliseconds, or `-1.0` when the
    /// participant is unknown or the transport has no figure.
    pub fn get_ping(&self, participant: ParticipantId) -> f32 {
        self.registry
            .get_by_participant(participant)
            .and_then(|record| self.transport.quick_stats(record.handle()))
            .map_or(-1.0, |stats| stats.ping_ms as f32)
    }

    /// Identifiers of every active connection, ordered by handle.
    pub fn list_active_connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .registry
            .active()
            .map(ConnectionRecord::connection_id)
            .collect();
        ids.sort_by_key(|id| id.handle);
        ids
    }

    /// Whether `connection_id` names a live, active connection.
    ///
    /// Malformed, stale and forged identifiers are simply not active.
    pub fn is_connection_active(&self, connection_id: &str) -> bool {
        self.registry
            .resolve(connection_id)
            .is_some_and(ConnectionRecord::is_active)
    }

    /// Looks up a connection by its public identifier.
    pub fn resolve_connection(&self, connection_id: &str) -> Result<&ConnectionRecord, GatewayError> {
        self.registry
            .resolve(connection_id)
            .ok_or_else(|| GatewayError::ConnectionNotFound(connection_id.to_string()))
    }

    pub fn connection_for_participant(&self, participant: ParticipantId) -> Option<ConnectionId> {
        self.registry
            .get_by_participant(participant)
            .map(ConnectionRecord::connection_id)
    }

    /// A participant's display name, refreshed from the transport.
    pub fn participant_display_name(&mut self, participant: ParticipantId) -> Option<String> {
        let record = self.registry.get_by_participant(participant)?;
        let handle = record.handle();
        let cached = record.display_name().to_string();

        match self.transport.display_name(handle) {
            Some(fresh) if fresh != cached => {
                self.registry.set_display_name(handle, fresh.clone());
                Some(fresh)
            }
            _ => Some(cached),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn bandwidth(&self) -> &BandwidthStats {
        self.outbound.stats()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    /// Number of slot selections still waiting for a deferred verdict.
    pub fn pending_admissions(&self) -> usize {
        self.pending_admissions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionTicket, AdmissionVerdict, Responder};
    use crate::messaging::{InboundMessage, ParticipantSlot};
    use crate::transport::MemoryTransport;

    #[derive(Default)]
    struct Quiet;

    impl GatewayCallbacks for Quiet {
        fn is_banned(&self, _peer: PeerIdentity) -> bool {
            false
        }

        fn enumerate_available_slots(&mut self, _peer: PeerIdentity) -> Vec<ParticipantSlot> {
            Vec::new()
        }

        fn check_admission(
            &mut self,
            ticket: AdmissionTicket,
            _payload: &[u8],
            _responder: &mut Responder<'_>,
        ) -> AdmissionVerdict {
            ticket.accept(ParticipantId(1))
        }

        fn on_inbound_message(&mut self, _message: InboundMessage) {}
    }

    fn gateway() -> Gateway<MemoryTransport, Quiet> {
        Gateway::new(GatewayConfig::default(), MemoryTransport::new(), Quiet)
    }

    #[test]
    fn test_idle_tick_reports_nothing() {
        let mut gateway = gateway();
        assert!(gateway.tick().is_idle());
    }

    #[test]
    fn test_connect_reaches_joining_in_one_tick() {
        let mut gateway = gateway();
        let handle = gateway.transport_mut().connect(PeerIdentity(9));

        let report = gateway.tick();

        assert_eq!(report.events, 2);
        let record = gateway.registry().get(handle).unwrap();
        assert!(!record.is_active());
        assert_eq!(gateway.transport().poll_group(handle), Some(PollGroup::Joining));
    }

    #[test]
    fn test_config_ban_list_seeds_gateway() {
        let config = GatewayConfig {
            banned_peers: vec![PeerIdentity(4)],
            ..GatewayConfig::default()
        };
        let mut gateway = Gateway::new(config, MemoryTransport::new(), Quiet);
        assert!(gateway.is_banned(PeerIdentity(4)));
        assert!(gateway.unban(PeerIdentity(4)));
        assert!(!gateway.is_banned(PeerIdentity(4)));
    }

    #[test]
    fn test_ticket_for_other_peer_on_same_handle_is_stale() {
        let mut gateway = gateway();
        let handle = gateway.transport_mut().connect(PeerIdentity(9));
        gateway.tick();
        gateway.pending_admissions.insert(handle, PeerIdentity(9));

        let stale = AdmissionTicket::new(ConnectionId::new(PeerIdentity(8), handle));
        let result = gateway.resolve_admission(stale.accept(ParticipantId(1)));
        assert!(matches!(result, Err(GatewayError::AdmissionNotPending(h)) if h == handle));
        assert!(!gateway.registry().get(handle).unwrap().is_active());
        assert_eq!(gateway.pending_admissions(), 1);

        let ticket = AdmissionTicket::new(ConnectionId::new(PeerIdentity(9), handle));
        gateway.resolve_admission(ticket.accept(ParticipantId(1))).unwrap();
        assert!(gateway.registry().get(handle).unwrap().is_active());
        assert_eq!(gateway.pending_admissions(), 0);
    }

    #[test]
    fn test_ping_unknown_participant() {
        let gateway = gateway();
        assert_eq!(gateway.get_ping(ParticipantId(3)), -1.0);
    }
}
