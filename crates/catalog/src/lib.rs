//! Mode catalog for the motion sensor
//!
//! This crate holds everything about the sensor that is pure data: the table
//! of supported capture modes, the closed enums the driver exchanges as
//! integers, and the tilt/accelerometer unit conversions.
//!
//! # Example
//!
//! ```
//! use catalog::{Resolution, VideoFormat, find_video_mode};
//!
//! let mode = find_video_mode(Resolution::Medium, VideoFormat::Rgb);
//! assert!(mode.is_valid);
//! assert_eq!(mode.frame_size(), 640 * 480 * 3);
//!
//! // Unsupported combinations are reported, not raised
//! let missing = find_video_mode(Resolution::Low, VideoFormat::Rgb);
//! assert!(!missing.is_valid);
//! ```

pub mod error;
pub mod modes;
pub mod tilt;
pub mod types;

pub use error::{CatalogError, Result};
pub use modes::{
    DEPTH_MODES, FrameMode, VIDEO_MODES, find_depth_mode, find_mode, find_video_mode, frame_size,
    mode_at, mode_by_id, mode_count, mode_id, modes,
};
pub use tilt::{
    COUNTS_PER_G, GRAVITY, MAX_TILT_DEGREES, RawTiltState, TiltState, clamp_tilt_degrees,
    counts_to_mks, encode_tilt_degrees, mks_to_counts, radians_to_degrees,
};
pub use types::{
    DepthFormat, DeviceFlags, LedStatus, LogLevel, PixelFormat, Resolution, StreamKind, TiltStatus,
    VideoFormat,
};
