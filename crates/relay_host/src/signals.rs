//! Signal handling for graceful host shutdown.

use std::fmt;
use tokio::signal;

/// The signal that asked the host to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT, or Ctrl+C on Windows.
    Interrupt,
    /// SIGTERM, typically from a service manager.
    Terminate,
}

impl ShutdownSignal {
    /// Reason shown to connected peers in their disconnect notice.
    pub fn disconnect_reason(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "server shutting down",
            ShutdownSignal::Terminate => "server restarting",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Waits for a termination signal and reports which one arrived.
///
/// Fails only if the signal handlers could not be installed.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal, Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let received = tokio::select! {
            _ = sigint.recv() => ShutdownSignal::Interrupt,
            _ = sigterm.recv() => ShutdownSignal::Terminate,
        };
        Ok(received)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok(ShutdownSignal::Interrupt)
    }
}
