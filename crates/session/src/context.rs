//! Process-wide driver context
//!
//! Owns the driver handle, the event pump, the log sink and a non-owning
//! registry of open sessions used to close them on shutdown.

use crate::device::{DeviceSession, SessionInner};
use crate::driver::{Driver, NativeDevice};
use crate::error::{Result, SessionError};
use crate::lock;
use crate::pump::{DEFAULT_PUMP_TIMEOUT, EventPump};
use crate::sim::{SimConfig, SimDriver};
use catalog::{DeviceFlags, LogLevel};
use common::{LogHandler, TracingLogHandler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Level the driver reports at until `set_log_level` is called
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Warning;

/// Non-owning index of open sessions by native handle
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<NativeDevice, Weak<SessionInner>>>,
}

impl SessionRegistry {
    fn insert(&self, native: NativeDevice, session: Weak<SessionInner>) {
        lock(&self.sessions).insert(native, session);
    }

    pub(crate) fn remove(&self, native: NativeDevice) {
        lock(&self.sessions).remove(&native);
    }

    fn live(&self) -> Vec<Arc<SessionInner>> {
        lock(&self.sessions)
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn len(&self) -> usize {
        lock(&self.sessions)
            .values()
            .filter(|s| s.strong_count() > 0)
            .count()
    }
}

/// Routes driver log lines to the installed sink
struct LogRouter {
    sink: Mutex<Option<Arc<dyn LogHandler>>>,
    level: Mutex<LogLevel>,
}

impl LogRouter {
    fn route(&self, device: Option<u32>, level: LogLevel, message: &str) {
        if !level.passes(*lock(&self.level)) {
            return;
        }
        let sink = lock(&self.sink).clone();
        if let Some(sink) = sink {
            sink.on_message(device, level, message);
        }
    }
}

/// Process-wide sensor driver context
///
/// Dropping the context shuts it down.
pub struct Context {
    driver: Arc<dyn Driver>,
    sessions: Arc<SessionRegistry>,
    pump: Mutex<Option<EventPump>>,
    log: Arc<LogRouter>,
    pump_timeout: Duration,
    shut_down: AtomicBool,
}

impl Context {
    /// Create a context over `driver`
    ///
    /// Driver log messages go to `TracingLogHandler` until another sink is
    /// installed.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        let log = Arc::new(LogRouter {
            sink: Mutex::new(Some(Arc::new(TracingLogHandler))),
            level: Mutex::new(DEFAULT_LOG_LEVEL),
        });

        let router = log.clone();
        driver.set_log_callback(Some(Arc::new(move |device, level, message: &str| {
            router.route(device, level, message)
        })));
        driver.set_log_level(DEFAULT_LOG_LEVEL);

        info!("Created context over {} driver", driver.name());
        Self {
            driver,
            sessions: Arc::new(SessionRegistry::default()),
            pump: Mutex::new(None),
            log,
            pump_timeout: DEFAULT_PUMP_TIMEOUT,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Create a context over a new simulated driver
    ///
    /// Returns the driver too, so callers can script it.
    pub fn simulated(config: SimConfig) -> (Self, Arc<SimDriver>) {
        let driver = Arc::new(SimDriver::new(config));
        (Self::new(driver.clone()), driver)
    }

    /// Create a context over the native libfreenect driver
    #[cfg(feature = "libfreenect")]
    pub fn native() -> Result<Self> {
        let driver = crate::freenect::FreenectDriver::new()
            .map_err(|code| SessionError::driver("init", code))?;
        Ok(Self::new(Arc::new(driver)))
    }

    /// Bound each background `process_events` call by `timeout`
    pub fn with_pump_timeout(mut self, timeout: Duration) -> Self {
        self.pump_timeout = timeout;
        self
    }

    /// The driver this context wraps
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    fn ensure_active(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(SessionError::State("context is shut down".to_string()))
        } else {
            Ok(())
        }
    }

    /// Number of attached devices
    pub fn num_devices(&self) -> Result<u32> {
        self.ensure_active()?;
        self.driver
            .num_devices()
            .map_err(|code| SessionError::driver("num_devices", code))
    }

    /// Choose which sub-devices later opens claim
    pub fn select_subdevices(&self, flags: DeviceFlags) -> Result<()> {
        self.ensure_active()?;
        self.driver.select_subdevices(flags);
        debug!("Selected sub-devices {:#04x}", flags.0);
        Ok(())
    }

    /// Open device `index`
    ///
    /// A failure (not found, busy) is returned as is; no retry is attempted.
    pub fn open_device(&self, index: u32) -> Result<DeviceSession> {
        self.ensure_active()?;
        let native = self.driver.open_device(index).map_err(|code| {
            warn!("Failed to open device {}: status {}", index, code);
            SessionError::driver("open_device", code)
        })?;

        let session = DeviceSession::new(
            index,
            native,
            self.driver.clone(),
            Arc::downgrade(&self.sessions),
        );
        self.sessions.insert(native, session.downgrade());

        info!("Opened device {} ({:?})", index, native);
        Ok(session)
    }

    /// Number of sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Install the driver log sink, or clear it with `None`
    ///
    /// The sink is called from the event pump thread and must not block.
    pub fn set_log_handler(&self, handler: Option<Arc<dyn LogHandler>>) {
        *lock(&self.log.sink) = handler;
    }

    /// Set the most verbose level delivered to the log sink
    pub fn set_log_level(&self, level: LogLevel) {
        *lock(&self.log.level) = level;
        self.driver.set_log_level(level);
    }

    /// Current log level
    pub fn log_level(&self) -> LogLevel {
        *lock(&self.log.level)
    }

    /// Service pending driver events once on the calling thread
    ///
    /// For callers that run their own loop instead of the background pump.
    pub fn process_events(&self, timeout: Duration) -> Result<()> {
        self.ensure_active()?;
        self.driver
            .process_events(timeout)
            .map_err(|code| SessionError::driver("process_events", code))
    }

    /// Start the background event pump; a no-op if it is running
    pub fn process_events_background(&self) -> Result<()> {
        // shutdown sets the flag before it takes the pump lock
        let mut pump = lock(&self.pump);
        self.ensure_active()?;
        if pump.as_ref().is_some_and(EventPump::is_running) {
            return Ok(());
        }

        *pump = Some(EventPump::spawn(self.driver.clone(), self.pump_timeout)?);
        Ok(())
    }

    /// Stop the background event pump; a no-op if it is not running
    pub fn stop_event_thread(&self) {
        let pump = lock(&self.pump).take();
        if let Some(mut pump) = pump {
            pump.stop();
        }
    }

    /// Whether the background event pump is running
    pub fn is_event_thread_running(&self) -> bool {
        lock(&self.pump).as_ref().is_some_and(EventPump::is_running)
    }

    /// Whether `shutdown` has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the pump, close every open session, then release the driver
    ///
    /// A failure closing one session does not stop the others from being
    /// closed; the first error is returned once everything ran. Calling it
    /// again is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down context");

        self.stop_event_thread();

        let mut first_error = None;
        for session in self.sessions.live() {
            if let Err(e) = session.close() {
                warn!("Error closing session during shutdown: {}", e);
                first_error.get_or_insert(e);
            }
        }

        self.driver.set_log_callback(None);
        if let Err(code) = self.driver.shutdown() {
            warn!("Driver shutdown failed: status {}", code);
            first_error.get_or_insert(SessionError::driver("shutdown", code));
        }

        info!("Context shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error shutting down context on drop: {}", e);
        }
    }
}
