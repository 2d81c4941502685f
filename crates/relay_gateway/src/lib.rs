//! # Relay Gateway
//!
//! Connection gateway for a dedicated game host whose players arrive over a
//! relay transport. The gateway owns the lifecycle of every relay connection,
//! runs the two-phase admission handshake that binds an anonymous arrival to
//! a simulation participant, and routes messages between the simulation and
//! each peer.
//!
//! ## Components
//!
//! - **Transport adapter** ([`TransportAdapter`]): accept, send, receive,
//!   close and poll-group primitives of the relay library.
//! - **Connection registry** ([`ConnectionRegistry`]): one owning store of
//!   [`ConnectionRecord`]s with handle, participant and peer indices.
//! - **Admission**: slot offer, slot selection, deferred or immediate verdicts
//!   through an [`AdmissionTicket`].
//! - **Message router**: classifies inbound frames by connection phase and
//!   enforces phase isolation.
//! - **Outbound pipeline** ([`OutboundPipeline`]): serialize, compress above
//!   the threshold, transmit, and close on failure.
//! - **Lifecycle**: connect, disconnect, kick, ban and shutdown cleanup.
//!
//! ## Connection phases
//!
//! ```text
//! Connecting ──ban/capacity──▶ refused (no record)
//!     │ accept
//!     ▼
//! Joining ──select_slot──▶ check_admission ──accept──▶ Active
//!     │                           └──reject──▶ closed with reason
//!     └──any other message──▶ simulation (joining form)
//! ```
//!
//! ## Threading
//!
//! Everything runs on the caller's tick thread. [`Gateway::tick`] drains
//! transport events and both poll groups; nothing in this crate spawns
//! threads or blocks. Transports with background I/O queue their work and
//! hand it over when polled.

pub mod admission;
pub mod callbacks;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod messaging;
pub mod outbound;
pub mod transport;
pub mod types;

pub use admission::{AdmissionTicket, AdmissionVerdict, Responder};
pub use callbacks::GatewayCallbacks;
pub use config::GatewayConfig;
pub use connection::{ConnectionId, ConnectionRecord, ConnectionRegistry, ParseConnectionIdError};
pub use error::{CodecError, GatewayError, RegistryError, TransportError};
pub use gateway::{Gateway, TickReport};
pub use messaging::{codec, Envelope, InboundMessage, MessageKind, ParticipantSlot};
pub use outbound::{BandwidthStats, OutboundPipeline};
pub use transport::{MemoryTransport, QuickStats, RawMessage, TransportAdapter, TransportEvent};
pub use types::{ConnectionHandle, ParticipantId, PeerIdentity, Phase, PollGroup};
