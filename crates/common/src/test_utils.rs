//! Test utilities shared across crates
//!
//! # Example
//!
//! ```
//! use common::test_utils::FrameRecorder;
//!
//! let recorder = FrameRecorder::new();
//! let handler = recorder.handler();
//! # drop(handler);
//! assert_eq!(recorder.count(), 0);
//! ```

use crate::frame::{Frame, FrameHandler};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test operation times out
#[derive(Debug, Clone)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
///
/// Returns whether the condition became true.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// What a recorder saw for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedFrame {
    /// Device index
    pub device_index: u32,
    /// Length of the delivered data
    pub len: usize,
    /// Frame size the mode declares
    pub expected_len: usize,
    /// Driver timestamp
    pub timestamp: u32,
    /// Epoch of the delivery
    pub epoch: u64,
}

/// Frame handler that records every delivery for later assertions
#[derive(Debug, Clone, Default)]
pub struct FrameRecorder {
    frames: Arc<Mutex<Vec<RecordedFrame>>>,
}

impl FrameRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler feeding this recorder
    pub fn handler(&self) -> RecordingHandler {
        RecordingHandler {
            frames: self.frames.clone(),
        }
    }

    /// Number of frames recorded so far
    pub fn count(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Snapshot of the recorded frames
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Wait until at least `count` frames were recorded
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.count() >= count)
    }
}

/// Handler half of a `FrameRecorder`
#[derive(Debug)]
pub struct RecordingHandler {
    frames: Arc<Mutex<Vec<RecordedFrame>>>,
}

impl FrameHandler for RecordingHandler {
    fn on_frame(&mut self, frame: &Frame<'_>) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(RecordedFrame {
                device_index: frame.device_index,
                len: frame.data.len(),
                expected_len: frame.mode.frame_size(),
                timestamp: frame.timestamp,
                epoch: frame.epoch,
            });
        }
    }
}
