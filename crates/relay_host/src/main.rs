//! Main application entry point for the relay host
//!
//! Loads the configuration, initialises logging, binds the development
//! transport and drives the connection gateway from a fixed-rate tick loop
//! until a shutdown signal arrives.

mod cli;
mod config;
mod lobby;
mod signals;
mod tcp;

use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use lobby::LobbySimulation;
use relay_gateway::{Gateway, TickReport};
use std::time::Duration;
use tcp::TcpRelayTransport;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type HostGateway = Gateway<TcpRelayTransport, LobbySimulation>;

/// Initialize logging system
fn setup_logging(config: &LoggingSettings) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Loads the configuration file and applies command-line overrides.
async fn load_config(args: &CliArgs) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from_file(&args.config_path).await?;

    if let Some(bind_address) = &args.bind_address {
        config.transport.bind_address = bind_address.clone();
    }
    if let Some(slots) = args.slots {
        config.host.slots = slots;
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    if let Err(e) = config.validate() {
        return Err(format!("Configuration validation failed: {}", e).into());
    }
    Ok(config)
}

/// The running host: configuration plus the gateway it drives.
pub struct Application {
    config: AppConfig,
    gateway: HostGateway,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let transport = TcpRelayTransport::bind(&config.transport.bind_address)
            .await?
            .with_inbound_limit(config.transport.inbound_limit);
        let lobby = LobbySimulation::new(config.host.slots);
        let gateway = Gateway::new(config.gateway.clone(), transport, lobby);

        info!(
            "🚀 Relay Host v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("UNK")
        );
        Ok(Self { config, gateway })
    }

    pub fn gateway(&self) -> &HostGateway {
        &self.gateway
    }

    /// One host tick: run the gateway, then deliver what the lobby queued.
    ///
    /// Loss of the transport backend is fatal for the host.
    pub fn step(&mut self) -> Result<TickReport, Box<dyn std::error::Error>> {
        let report = self.gateway.tick();

        for (participant, envelope) in self.gateway.callbacks_mut().drain_outbox() {
            if let Err(e) = self.gateway.send_to_participant(participant, &envelope) {
                debug!("Relay to participant {} dropped: {}", participant, e);
            }
        }

        if let Some(reason) = &report.backend_lost {
            error!("❌ Transport backend lost: {}", reason);
            return Err(format!("transport backend lost: {}", reason).into());
        }
        Ok(report)
    }

    fn log_stats(&self) {
        let stats = self.gateway.bandwidth();
        info!(
            "📊 {} connection(s), {} active, {}/{} slots claimed | ↑ {} B in {} msgs | ↓ {} B in {} msgs | {} compressed | {} send failures",
            self.gateway.registry().len(),
            self.gateway.list_active_connections().len(),
            self.gateway.callbacks().occupied(),
            self.config.host.slots,
            stats.bytes_sent,
            stats.messages_sent,
            stats.bytes_received,
            stats.messages_received,
            stats.compressed_frames,
            stats.send_failures
        );
    }

    /// Ticks until a shutdown signal or a fatal transport error.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.gateway.transport().local_addr());
        info!("  ⏱️ Tick interval: {}ms", self.config.host.tick_interval_ms);
        info!("  🧑‍🌾 Participant slots: {}", self.config.host.slots);
        info!("  👥 Max connections: {}", self.config.gateway.max_connections);

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.host.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let stats_period = Duration::from_secs(self.config.host.stats_interval_secs);
        let mut stats = tokio::time::interval_at(tokio::time::Instant::now() + stats_period, stats_period);

        let shutdown = signals::wait_for_shutdown();
        tokio::pin!(shutdown);

        info!("✅ Relay Host is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let outcome = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.step() {
                        break Err(e);
                    }
                }
                _ = stats.tick() => self.log_stats(),
                signal = &mut shutdown => break signal,
            }
        };

        let reason = match &outcome {
            Ok(signal) => {
                info!("📡 Received {}", signal);
                signal.disconnect_reason()
            }
            Err(_) => "server shutting down",
        };
        info!("🛑 Shutting down, disconnecting players...");
        let closed = self.gateway.shutdown(reason);
        info!("👋 Disconnected {} connection(s)", closed);

        // Socket writers flush queued disconnect notices in the background.
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.log_stats();
        info!("✅ Relay Host shutdown complete");

        outcome.map(|_| ())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config = match load_config(&args).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    setup_logging(&config.logging)?;

    match Application::new(config).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
