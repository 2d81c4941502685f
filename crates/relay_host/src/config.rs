//! Configuration management for the relay host.
//!
//! Loads the host configuration from a TOML file, creating one with default
//! values when it does not exist yet, and validates it before startup.

use relay_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Default tick interval for serde deserialization
fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_slots() -> usize {
    4
}

fn default_stats_interval() -> u64 {
    60
}

fn default_inbound_limit() -> usize {
    crate::tcp::DEFAULT_INBOUND_LIMIT
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tick loop and lobby settings
    pub host: HostSettings,
    /// Development transport settings
    pub transport: TransportSettings,
    /// Connection gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Tick loop and lobby configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Gateway tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Number of participant slots the lobby offers
    #[serde(default = "default_slots")]
    pub slots: usize,
    /// Seconds between bandwidth statistics log lines
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

/// TCP development transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Network address to listen on (e.g., "127.0.0.1:24642")
    pub bind_address: String,
    /// Inbound frames buffered for the gateway before socket reads stall
    #[serde(default = "default_inbound_limit")]
    pub inbound_limit: usize,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: HostSettings {
                tick_interval_ms: default_tick_interval(),
                slots: default_slots(),
                stats_interval_secs: default_stats_interval(),
            },
            transport: TransportSettings {
                bind_address: "127.0.0.1:24642".to_string(),
                inbound_limit: default_inbound_limit(),
            },
            gateway: GatewayConfig::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, writing a default file first when
    /// none exists.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self
            .transport
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!(
                "Invalid bind address: {}",
                &self.transport.bind_address
            ));
        }

        if self.host.tick_interval_ms == 0 {
            return Err("Tick interval must be greater than zero".to_string());
        }
        if self.host.slots == 0 {
            return Err("The lobby needs at least one participant slot".to_string());
        }
        if self.transport.inbound_limit == 0 {
            return Err("Inbound limit must be greater than zero".to_string());
        }
        if self.host.stats_interval_secs == 0 {
            return Err("Stats interval must be greater than zero".to_string());
        }

        self.gateway.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
