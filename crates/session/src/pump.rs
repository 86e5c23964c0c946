//! Event pump thread
//!
//! Dedicated thread that services the driver. Frame and log callbacks run
//! synchronously on this thread, from inside `Driver::process_events`.
//!
//! Stopping is cooperative: the run flag is checked once per iteration, so a
//! stop request takes effect after at most one `process_events` call.

use crate::driver::{Driver, status};
use crate::error::Result;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default upper bound for one `process_events` call
pub const DEFAULT_PUMP_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after a failed `process_events` call
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Handle to the running event pump thread
pub struct EventPump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventPump {
    /// Spawn the pump thread
    ///
    /// `timeout` bounds each driver call and therefore the stop latency.
    pub fn spawn(driver: Arc<dyn Driver>, timeout: Duration) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = std::thread::Builder::new()
            .name("event-pump".to_string())
            .spawn(move || run(driver, flag, timeout))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the loop to exit and wait for it
    ///
    /// When called from the pump thread itself (e.g. from a handler) the flag
    /// is set but the thread is not joined.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            debug!("Event pump stop requested from the pump thread, not joining");
            return;
        }
        if handle.join().is_err() {
            error!("Event pump thread panicked");
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pump loop body
///
/// Processes driver events until the run flag is cleared. Driver errors are
/// logged and retried after a short pause; they never end the loop.
fn run(driver: Arc<dyn Driver>, running: Arc<AtomicBool>, timeout: Duration) {
    info!("Event pump started ({} driver)", driver.name());

    while running.load(Ordering::Acquire) {
        // Keep a panicking callback from taking down the pump
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| driver.process_events(timeout)));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(status::INTERRUPTED)) => {
                debug!("Driver event processing interrupted");
            }
            Ok(Err(code)) => {
                warn!("Error processing driver events: status {}", code);
                std::thread::sleep(ERROR_BACKOFF);
            }
            Err(e) => {
                error!("Panic while processing driver events: {:?}", e);
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    info!("Event pump stopped");
}
