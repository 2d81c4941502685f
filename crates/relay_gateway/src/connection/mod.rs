//! Connection tracking.
//!
//! [`ConnectionRegistry`] is the single owner of every [`ConnectionRecord`]
//! and keeps the handle, participant and peer indices in step.
//! [`ConnectionId`] is the public string form upper layers use to refer to a
//! connection.

pub mod id;
pub mod record;
pub mod registry;

pub use id::{ConnectionId, ParseConnectionIdError};
pub use record::ConnectionRecord;
pub use registry::ConnectionRegistry;
