//! Session and frame delivery layer for the motion sensor
//!
//! A [`Context`] wraps one driver handle. It opens [`DeviceSession`]s, runs
//! the background event pump that services the driver, and routes driver log
//! messages. Sessions negotiate capture modes against the catalog and deliver
//! frames to registered handlers from the pump thread.
//!
//! # Example
//!
//! ```
//! use catalog::{StreamKind, VideoFormat};
//! use session::{Context, SimConfig};
//!
//! let (ctx, sim) = Context::simulated(SimConfig::manual(1));
//! let device = ctx.open_device(0).unwrap();
//! device.set_video_format(VideoFormat::Rgb).unwrap();
//!
//! let (handler, frames) = common::frame_channel(4);
//! device.start_video(handler).unwrap();
//! sim.inject_frames(0, StreamKind::Video, 1);
//! assert_eq!(frames.try_recv().unwrap().data.len(), 640 * 480 * 3);
//!
//! device.stop_video().unwrap();
//! ctx.shutdown().unwrap();
//! ```

pub mod buffer;
pub mod context;
pub mod device;
pub mod driver;
pub mod error;
#[cfg(feature = "libfreenect")]
pub mod freenect;
pub mod probe;
pub mod pump;
pub mod sim;

pub use buffer::{BufferPool, FrameBuffer};
pub use context::{Context, DEFAULT_LOG_LEVEL};
pub use device::{DeviceSession, StreamState};
pub use driver::{Driver, DriverLogCallback, DriverResult, FrameCallback, NativeDevice, status};
pub use error::{Result, SessionError};
pub use probe::{ProbedDevice, Subdevice, probe};
pub use pump::{DEFAULT_PUMP_TIMEOUT, EventPump};
pub use sim::{SimConfig, SimDriver};

#[cfg(feature = "libfreenect")]
pub use freenect::FreenectDriver;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking thread poisoned it
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
