//! Logging setup and driver log routing

use catalog::LogLevel;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Setup tracing subscriber for the application
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

/// Receiver of driver log messages
///
/// Invoked from whichever thread the driver logs on, usually the event pump.
/// `device` is the index of the session the message concerns, if any.
pub trait LogHandler: Send + Sync + 'static {
    /// Handle one driver message
    fn on_message(&self, device: Option<u32>, level: LogLevel, message: &str);
}

impl<F> LogHandler for F
where
    F: Fn(Option<u32>, LogLevel, &str) + Send + Sync + 'static,
{
    fn on_message(&self, device: Option<u32>, level: LogLevel, message: &str) {
        self(device, level, message)
    }
}

/// Forwards driver messages into `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogHandler;

impl TracingLogHandler {
    /// `tracing` level a driver level is emitted at
    pub fn tracing_level(level: LogLevel) -> tracing::Level {
        match level {
            LogLevel::Fatal | LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Notice | LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Spew | LogLevel::Flood => tracing::Level::TRACE,
        }
    }
}

impl LogHandler for TracingLogHandler {
    fn on_message(&self, device: Option<u32>, level: LogLevel, message: &str) {
        let message = message.trim_end();
        let device = device.map(i64::from).unwrap_or(-1);
        match Self::tracing_level(level) {
            tracing::Level::ERROR => tracing::error!(target: "driver", device, %level, "{}", message),
            tracing::Level::WARN => tracing::warn!(target: "driver", device, %level, "{}", message),
            tracing::Level::INFO => tracing::info!(target: "driver", device, %level, "{}", message),
            tracing::Level::DEBUG => tracing::debug!(target: "driver", device, %level, "{}", message),
            _ => tracing::trace!(target: "driver", device, %level, "{}", message),
        }
    }
}
