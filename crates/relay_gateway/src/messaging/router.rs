//! Per-tick message pump.
//!
//! Each tick pulls the joining group, then the active group, from the
//! transport. Every frame is decoded, matched to its connection record, and
//! checked against the connection's phase before being dispatched:
//!
//! | poll group | record phase | kind          | outcome                         |
//! |------------|--------------|---------------|---------------------------------|
//! | Joining    | Joining      | `select_slot` | admission                       |
//! | Joining    | Joining      | other         | simulation, joining form        |
//! | Joining    | Active       | other         | simulation, only if admitted this tick |
//! | Active     | Active       | other         | simulation, active form         |
//! | anything else                             || protocol violation, close       |
//!
//! A failure on one connection closes that connection and the pump moves on
//! to the next frame.

use super::{codec, InboundMessage, MessageKind};
use crate::callbacks::GatewayCallbacks;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::transport::{RawMessage, TransportAdapter};
use crate::types::{Phase, PollGroup};
use tracing::{debug, trace, warn};

impl<T: TransportAdapter, C: GatewayCallbacks> Gateway<T, C> {
    /// Drains one poll group and routes every frame in transport order.
    pub(crate) fn pump(&mut self, group: PollGroup) {
        let batch = self
            .transport
            .receive(group, self.config.max_messages_per_pump);

        for raw in batch {
            let handle = raw.handle;
            if self.closed_this_tick.contains(&handle) {
                trace!("Dropping frame from connection {} closed this tick", handle);
                continue;
            }

            if let Err(e) = self.route(group, raw) {
                if matches!(e, GatewayError::ProtocolViolation { .. }) {
                    self.report.violations += 1;
                }
                warn!("⚠️ Closing connection {}: {}", handle, e);
                self.close_connection(handle, e.peer_reason());
            }
        }
    }

    fn route(&mut self, group: PollGroup, raw: RawMessage) -> Result<(), GatewayError> {
        self.outbound.record_inbound(raw.bytes.len());
        let envelope = codec::decode(&raw.bytes)?;

        let record = self
            .registry
            .get(raw.handle)
            .ok_or(GatewayError::DefunctConnection(raw.handle))?;
        let connection = record.connection_id();
        let participant = record.participant();
        let phase = record.phase();
        let kind = envelope.kind;

        let violation = GatewayError::ProtocolViolation {
            handle: raw.handle,
            phase,
            group,
            kind,
        };

        match (group, phase) {
            (PollGroup::Joining, Phase::Joining) if kind == MessageKind::SelectSlot => {
                return self.handle_slot_selection(connection, envelope.data);
            }
            (PollGroup::Joining, Phase::Joining) => {}
            (PollGroup::Joining, Phase::Active)
                if kind != MessageKind::SelectSlot
                    && self.recently_admitted.contains(&raw.handle) =>
            {
                debug!(
                    "Routing {:?} from just-admitted connection {} as active",
                    kind, connection
                );
            }
            (PollGroup::Active, Phase::Active) if kind != MessageKind::SelectSlot => {}
            _ => return Err(violation),
        }

        trace!("📨 Routing {:?} from {} ({:?})", kind, connection, phase);
        self.report.messages_routed += 1;
        self.callbacks.on_inbound_message(InboundMessage {
            connection,
            participant,
            phase,
            envelope,
        });
        Ok(())
    }
}
