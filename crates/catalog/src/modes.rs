//! Frame mode catalog
//!
//! Static table of the (resolution, pixel format) combinations the sensor
//! supports, with the frame geometry and byte size of each. Lookups are pure
//! and total: an unsupported combination yields a mode whose `is_valid` flag
//! is false instead of an error, and callers must check it before applying.

use crate::types::{DepthFormat, PixelFormat, Resolution, StreamKind, VideoFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame geometry of one supported capture mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameMode {
    /// Stable id, `(resolution << 8) | format`
    pub id: u32,
    /// Resolution this mode describes
    pub resolution: Resolution,
    /// Pixel format this mode describes
    pub format: PixelFormat,
    /// Total bytes of one frame
    pub bytes: u32,
    /// Frame width in pixels
    pub width: u16,
    /// Frame height in pixels
    pub height: u16,
    /// Bits of information per pixel
    pub data_bits_per_pixel: u8,
    /// Bits of alignment padding per pixel
    pub padding_bits_per_pixel: u8,
    /// Approximate frame rate in Hz
    pub framerate: u8,
    /// False when the lookup did not match a supported mode
    pub is_valid: bool,
}

/// Compute the stable mode id from resolution and format
pub const fn mode_id(resolution: Resolution, format: PixelFormat) -> u32 {
    (((resolution.as_raw() & 0xff) as u32) << 8) | ((format.as_raw() & 0xff) as u32)
}

impl FrameMode {
    const fn supported(
        resolution: Resolution,
        format: PixelFormat,
        width: u16,
        height: u16,
        data_bits: u8,
        padding_bits: u8,
        framerate: u8,
    ) -> Self {
        let bits = data_bits as u32 + padding_bits as u32;
        Self {
            id: mode_id(resolution, format),
            resolution,
            format,
            bytes: width as u32 * height as u32 * bits / 8,
            width,
            height,
            data_bits_per_pixel: data_bits,
            padding_bits_per_pixel: padding_bits,
            framerate,
            is_valid: true,
        }
    }

    /// The "no such mode" marker for a lookup
    pub const fn invalid(resolution: Resolution, format: PixelFormat) -> Self {
        Self {
            id: mode_id(resolution, format),
            resolution,
            format,
            bytes: 0,
            width: 0,
            height: 0,
            data_bits_per_pixel: 0,
            padding_bits_per_pixel: 0,
            framerate: 0,
            is_valid: false,
        }
    }

    /// Stream kind this mode belongs to
    pub const fn kind(&self) -> StreamKind {
        self.format.kind()
    }

    /// Bits per pixel including padding
    pub const fn bits_per_pixel(&self) -> u32 {
        self.data_bits_per_pixel as u32 + self.padding_bits_per_pixel as u32
    }

    /// Bytes the driver writes for one frame of this mode
    ///
    /// Derived from the geometry, so it equals `bytes` for every catalog
    /// entry and is 0 for invalid modes.
    pub const fn frame_size(&self) -> usize {
        (self.width as usize * self.height as usize * self.bits_per_pixel() as usize) / 8
    }
}

impl fmt::Display for FrameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid {
            return write!(f, "invalid {} {} mode", self.resolution, self.format);
        }
        write!(
            f,
            "{} {} {}x{} @{}Hz ({} bytes)",
            self.kind(),
            self.format,
            self.width,
            self.height,
            self.framerate,
            self.bytes
        )
    }
}

const fn video(
    resolution: Resolution,
    format: VideoFormat,
    width: u16,
    height: u16,
    data_bits: u8,
    padding_bits: u8,
    framerate: u8,
) -> FrameMode {
    FrameMode::supported(
        resolution,
        PixelFormat::Video(format),
        width,
        height,
        data_bits,
        padding_bits,
        framerate,
    )
}

const fn depth(format: DepthFormat, data_bits: u8, padding_bits: u8) -> FrameMode {
    FrameMode::supported(
        Resolution::Medium,
        PixelFormat::Depth(format),
        640,
        480,
        data_bits,
        padding_bits,
        30,
    )
}

/// Every supported video mode, in driver order
pub static VIDEO_MODES: [FrameMode; 12] = [
    video(Resolution::High, VideoFormat::Rgb, 1280, 1024, 24, 0, 10),
    video(Resolution::Medium, VideoFormat::Rgb, 640, 480, 24, 0, 30),
    video(Resolution::High, VideoFormat::Bayer, 1280, 1024, 8, 0, 10),
    video(Resolution::Medium, VideoFormat::Bayer, 640, 480, 8, 0, 30),
    video(Resolution::High, VideoFormat::Ir8Bit, 1280, 1024, 8, 0, 10),
    video(Resolution::Medium, VideoFormat::Ir8Bit, 640, 488, 8, 0, 30),
    video(Resolution::High, VideoFormat::Ir10Bit, 1280, 1024, 10, 6, 10),
    video(Resolution::Medium, VideoFormat::Ir10Bit, 640, 488, 10, 6, 30),
    video(Resolution::High, VideoFormat::Ir10BitPacked, 1280, 1024, 10, 0, 10),
    video(Resolution::Medium, VideoFormat::Ir10BitPacked, 640, 488, 10, 0, 30),
    video(Resolution::Medium, VideoFormat::YuvRgb, 640, 480, 24, 0, 15),
    video(Resolution::Medium, VideoFormat::YuvRaw, 640, 480, 16, 0, 15),
];

/// Every supported depth mode, in driver order
pub static DEPTH_MODES: [FrameMode; 6] = [
    depth(DepthFormat::D11Bit, 11, 5),
    depth(DepthFormat::D10Bit, 10, 6),
    depth(DepthFormat::D11BitPacked, 11, 0),
    depth(DepthFormat::D10BitPacked, 10, 0),
    depth(DepthFormat::Registered, 16, 0),
    depth(DepthFormat::Mm, 16, 0),
];

/// All supported modes of a stream kind
pub fn modes(kind: StreamKind) -> &'static [FrameMode] {
    match kind {
        StreamKind::Video => &VIDEO_MODES,
        StreamKind::Depth => &DEPTH_MODES,
    }
}

/// Number of supported modes of a stream kind
pub fn mode_count(kind: StreamKind) -> usize {
    modes(kind).len()
}

/// Supported mode by index, `None` past the end
pub fn mode_at(kind: StreamKind, index: usize) -> Option<FrameMode> {
    modes(kind).get(index).copied()
}

/// Look up the mode for a (kind, resolution, format) triple
///
/// Returns an invalid mode (never an error) when the combination is not
/// supported, including a format that belongs to the other stream kind.
pub fn find_mode(kind: StreamKind, resolution: Resolution, format: PixelFormat) -> FrameMode {
    if format.kind() != kind {
        return FrameMode::invalid(resolution, format);
    }

    modes(kind)
        .iter()
        .find(|m| m.resolution == resolution && m.format == format)
        .copied()
        .unwrap_or(FrameMode::invalid(resolution, format))
}

/// Look up a video mode
pub fn find_video_mode(resolution: Resolution, format: VideoFormat) -> FrameMode {
    find_mode(StreamKind::Video, resolution, PixelFormat::Video(format))
}

/// Look up a depth mode
pub fn find_depth_mode(resolution: Resolution, format: DepthFormat) -> FrameMode {
    find_mode(StreamKind::Depth, resolution, PixelFormat::Depth(format))
}

/// Find a supported mode by its stable id
pub fn mode_by_id(kind: StreamKind, id: u32) -> Option<FrameMode> {
    modes(kind).iter().find(|m| m.id == id).copied()
}

/// Frame size of a mode in bytes
pub fn frame_size(mode: &FrameMode) -> usize {
    mode.frame_size()
}
