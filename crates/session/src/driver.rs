//! Native driver boundary
//!
//! The session layer never talks to USB itself. Everything below it (device
//! enumeration, isochronous transfers, the motor and LED registers) sits
//! behind the `Driver` trait, implemented by the simulated sensor and, with
//! the `libfreenect` feature, by the native library.
//!
//! Drivers report failures as the native status code. The session layer turns
//! a non-zero code into `SessionError::Driver` without retrying.

use crate::buffer::FrameBuffer;
use catalog::{DeviceFlags, FrameMode, LedStatus, LogLevel, RawTiltState, StreamKind};
use std::sync::Arc;
use std::time::Duration;

/// Status codes shared by the driver backends (libusb numbering)
pub mod status {
    /// Input/output error
    pub const IO: i32 = -1;
    /// Invalid parameter
    pub const INVALID_PARAM: i32 = -2;
    /// No such device
    pub const NO_DEVICE: i32 = -4;
    /// Entity not found
    pub const NOT_FOUND: i32 = -5;
    /// Resource busy
    pub const BUSY: i32 = -6;
    /// System call interrupted
    pub const INTERRUPTED: i32 = -10;
    /// Operation not supported
    pub const NOT_SUPPORTED: i32 = -12;
}

/// Result of a driver call, carrying the native status code on failure
pub type DriverResult<T> = std::result::Result<T, i32>;

/// Opaque native device handle, exclusive to one open session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeDevice(pub u64);

/// Frame completion callback, called with the frame timestamp
///
/// The driver has finished writing the frame into the registered buffer when
/// this runs.
pub type FrameCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Driver log callback: (device index if known, level, message)
pub type DriverLogCallback = Arc<dyn Fn(Option<u32>, LogLevel, &str) + Send + Sync>;

/// Primitives the session layer needs from a sensor driver
///
/// Frame and log callbacks are invoked from `process_events`, which only the
/// event pump thread calls. Implementations must not hold internal locks
/// while invoking callbacks.
pub trait Driver: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Number of attached devices
    fn num_devices(&self) -> DriverResult<u32>;

    /// Choose which sub-devices later `open_device` calls claim
    fn select_subdevices(&self, flags: DeviceFlags);

    /// Open device `index`
    fn open_device(&self, index: u32) -> DriverResult<NativeDevice>;

    /// Close an open device; the handle is invalid afterwards
    fn close_device(&self, device: NativeDevice) -> DriverResult<()>;

    /// Set the maximum severity the driver reports
    fn set_log_level(&self, level: LogLevel);

    /// Install or clear the log callback
    fn set_log_callback(&self, callback: Option<DriverLogCallback>);

    /// Apply a catalog mode to a stream; the stream must be stopped
    fn set_mode(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        mode: &FrameMode,
    ) -> DriverResult<()>;

    /// Register (or clear) the buffer frames of a stream are written into
    fn set_buffer(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        buffer: Option<FrameBuffer>,
    ) -> DriverResult<()>;

    /// Register (or clear) the frame completion callback of a stream
    fn set_frame_callback(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        callback: Option<FrameCallback>,
    );

    /// Begin streaming into the registered buffer
    fn start_stream(&self, device: NativeDevice, kind: StreamKind) -> DriverResult<()>;

    /// Stop streaming
    fn stop_stream(&self, device: NativeDevice, kind: StreamKind) -> DriverResult<()>;

    /// Blocking read of the motor and accelerometer registers
    fn update_tilt_state(&self, device: NativeDevice) -> DriverResult<RawTiltState>;

    /// Command the tilt motor to an angle in degrees
    fn set_tilt_degrees(&self, device: NativeDevice, degrees: f64) -> DriverResult<()>;

    /// Set the status LED
    fn set_led(&self, device: NativeDevice, led: LedStatus) -> DriverResult<()>;

    /// Service pending I/O and invoke due callbacks, blocking at most `timeout`
    fn process_events(&self, timeout: Duration) -> DriverResult<()>;

    /// Release the driver handle; no call is valid afterwards
    fn shutdown(&self) -> DriverResult<()>;
}

/// Map a native status code to a `DriverResult`
pub fn check(code: i32) -> DriverResult<()> {
    if code == 0 { Ok(()) } else { Err(code) }
}
