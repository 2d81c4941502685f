//! Outbound pipeline: serialize, compress past the threshold, transmit.
//!
//! A failed send is never queued for retry. The relay already retransmits
//! reliable sends, so a failure here means the peer is unreachable and the
//! connection is closed.

use crate::callbacks::GatewayCallbacks;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::messaging::{codec, Envelope};
use crate::transport::TransportAdapter;
use crate::types::{ConnectionHandle, ParticipantId};
use serde::Serialize;
use tracing::{trace, warn};

/// Advisory traffic counters. Never consulted for control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BandwidthStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub compressed_frames: u64,
    pub send_failures: u64,
}

#[derive(Debug)]
pub struct OutboundPipeline {
    compression_threshold: usize,
    stats: BandwidthStats,
}

impl OutboundPipeline {
    pub fn new(compression_threshold: usize) -> Self {
        Self {
            compression_threshold,
            stats: BandwidthStats::default(),
        }
    }

    /// Encodes and sends one envelope; returns the bytes put on the wire.
    ///
    /// Does not close anything on failure, the caller owns that decision.
    pub fn transmit(
        &mut self,
        transport: &mut dyn TransportAdapter,
        handle: ConnectionHandle,
        envelope: &Envelope,
    ) -> Result<usize, GatewayError> {
        let frame = codec::encode(envelope, self.compression_threshold)?;

        if let Err(e) = transport.send(handle, &frame.bytes) {
            self.stats.send_failures += 1;
            return Err(e.into());
        }

        self.stats.bytes_sent += frame.bytes.len() as u64;
        self.stats.messages_sent += 1;
        if frame.compressed {
            self.stats.compressed_frames += 1;
        }
        trace!(
            "Sent {:?} to connection {} ({} bytes, compressed: {})",
            envelope.kind,
            handle,
            frame.bytes.len(),
            frame.compressed
        );
        Ok(frame.bytes.len())
    }

    pub fn record_inbound(&mut self, bytes: usize) {
        self.stats.bytes_received += bytes as u64;
        self.stats.messages_received += 1;
    }

    pub fn stats(&self) -> &BandwidthStats {
        &self.stats
    }
}

impl<T: TransportAdapter, C: GatewayCallbacks> Gateway<T, C> {
    /// Sends an envelope to an active participant.
    pub fn send_to_participant(
        &mut self,
        participant: ParticipantId,
        envelope: &Envelope,
    ) -> Result<(), GatewayError> {
        let handle = self
            .registry
            .get_by_participant(participant)
            .map(|record| record.handle())
            .ok_or(GatewayError::ParticipantNotFound(participant))?;
        self.send_to_connection(handle, envelope)
    }

    /// Sends an envelope to any registered connection, joining or active.
    ///
    /// A transport failure closes the connection before the error is
    /// returned.
    pub fn send_to_connection(
        &mut self,
        handle: ConnectionHandle,
        envelope: &Envelope,
    ) -> Result<(), GatewayError> {
        if self.registry.get(handle).is_none() {
            return Err(GatewayError::ConnectionNotFound(handle.to_string()));
        }

        match self.outbound.transmit(&mut self.transport, handle, envelope) {
            Ok(_) => Ok(()),
            Err(e @ GatewayError::Transport(_)) => {
                warn!("📤 Send to connection {} failed, closing: {}", handle, e);
                self.close_connection(handle, e.peer_reason());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use crate::types::{PeerIdentity, PollGroup};

    fn open_link(transport: &mut MemoryTransport) -> ConnectionHandle {
        let handle = transport.connect(PeerIdentity(1));
        transport.accept(handle).unwrap();
        transport.set_poll_group(handle, PollGroup::Joining).unwrap();
        handle
    }

    #[test]
    fn test_transmit_counts_bytes() {
        let mut transport = MemoryTransport::new();
        let handle = open_link(&mut transport);
        let mut pipeline = OutboundPipeline::new(1024);

        let sent = pipeline
            .transmit(&mut transport, handle, &Envelope::game(0, b"hello".to_vec()))
            .unwrap();

        assert_eq!(transport.sent(handle).len(), 1);
        assert_eq!(pipeline.stats().bytes_sent, sent as u64);
        assert_eq!(pipeline.stats().messages_sent, 1);
        assert_eq!(pipeline.stats().compressed_frames, 0);
    }

    #[test]
    fn test_transmit_compresses_large_payloads() {
        let mut transport = MemoryTransport::new();
        let handle = open_link(&mut transport);
        let mut pipeline = OutboundPipeline::new(128);

        pipeline
            .transmit(&mut transport, handle, &Envelope::game(0, vec![0u8; 4096]))
            .unwrap();

        assert!(codec::is_compressed(&transport.sent(handle)[0]));
        assert_eq!(pipeline.stats().compressed_frames, 1);
    }

    #[test]
    fn test_transmit_failure_is_counted() {
        let mut transport = MemoryTransport::new();
        let handle = open_link(&mut transport);
        transport.fail_sends(handle);
        let mut pipeline = OutboundPipeline::new(1024);

        let result = pipeline.transmit(&mut transport, handle, &Envelope::handshake(vec![]));
        assert!(matches!(result, Err(GatewayError::Transport(_))));
        assert_eq!(pipeline.stats().send_failures, 1);
        assert_eq!(pipeline.stats().messages_sent, 0);
    }
}
