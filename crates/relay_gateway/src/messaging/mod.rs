//! Message types, framing and routing.
//!
//! Inbound frames are decoded by [`codec`], classified by the owning
//! connection's phase in [`router`], and handed either to admission or to the
//! simulation's generic inbound handler.

pub mod codec;
pub mod router;
pub mod types;

pub use types::{Envelope, InboundMessage, MessageKind, ParticipantSlot};
