//! Gateway configuration types and defaults.

use crate::types::PeerIdentity;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Gateway`](crate::Gateway).
///
/// Every field has a default, so a partial `[gateway]` table in a TOML file
/// deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Serialized payloads larger than this many bytes are deflate-compressed
    /// before transmission. Smaller payloads go out unmodified.
    pub compression_threshold: usize,

    /// Maximum number of live connections (joining and active combined).
    /// Arrivals beyond this are rejected while still connecting.
    pub max_connections: usize,

    /// Upper bound on messages pulled from each poll group per tick.
    pub max_messages_per_pump: usize,

    /// Peers refused at connection time, in addition to whatever the
    /// simulation reports through `is_banned`.
    pub banned_peers: Vec<PeerIdentity>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            compression_threshold: 1024,
            max_connections: 16,
            max_messages_per_pump: 512,
            banned_peers: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Checks the configuration for values the gateway cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.max_messages_per_pump == 0 {
            return Err("max_messages_per_pump must be at least 1".to_string());
        }
        Ok(())
    }
}
