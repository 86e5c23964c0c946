//! Sensor enum definitions
//!
//! Closed enums for everything the driver exchanges as plain integers:
//! stream kinds, resolutions, pixel formats, LED states, tilt motor status,
//! log levels and sub-device flags. Every enum carries an explicit
//! bidirectional mapping to the driver's integer values.

use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalize a user supplied name ("IR-10bit", "ir_10bit") for matching
fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

/// Independent capture stream of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Color / IR camera
    Video,
    /// Depth camera
    Depth,
}

impl StreamKind {
    /// Both stream kinds, video first
    pub const ALL: [StreamKind; 2] = [StreamKind::Video, StreamKind::Depth];

    /// Lowercase name used in logs and configuration
    pub const fn name(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Depth => "depth",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "video" | "rgb" => Ok(StreamKind::Video),
            "depth" => Ok(StreamKind::Depth),
            _ => Err(CatalogError::UnknownName {
                kind: "stream kind",
                name: s.to_string(),
            }),
        }
    }
}

/// Capture resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// QVGA - 320x240
    Low,
    /// VGA - 640x480
    Medium,
    /// SXGA - 1280x1024
    High,
}

impl Resolution {
    /// All resolutions in driver order
    pub const ALL: [Resolution; 3] = [Resolution::Low, Resolution::Medium, Resolution::High];

    /// Driver integer value
    pub const fn as_raw(self) -> i32 {
        match self {
            Resolution::Low => 0,
            Resolution::Medium => 1,
            Resolution::High => 2,
        }
    }

    /// Map a driver integer value back to a resolution
    pub fn from_raw(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Resolution::Low),
            1 => Ok(Resolution::Medium),
            2 => Ok(Resolution::High),
            _ => Err(CatalogError::UnknownValue {
                kind: "resolution",
                value,
            }),
        }
    }

    /// Lowercase name used in logs and configuration
    pub const fn name(self) -> &'static str {
        match self {
            Resolution::Low => "low",
            Resolution::Medium => "medium",
            Resolution::High => "high",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resolution {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize(s).as_str() {
            "low" | "qvga" => Ok(Resolution::Low),
            "medium" | "vga" => Ok(Resolution::Medium),
            "high" | "sxga" => Ok(Resolution::High),
            _ => Err(CatalogError::UnknownName {
                kind: "resolution",
                name: s.to_string(),
            }),
        }
    }
}

/// Video stream pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    /// Decompressed RGB, demosaiced by the driver
    Rgb,
    /// Raw Bayer pattern from the camera
    Bayer,
    /// 8-bit IR
    #[serde(rename = "ir_8bit")]
    Ir8Bit,
    /// 10-bit IR in one u16 per pixel
    #[serde(rename = "ir_10bit")]
    Ir10Bit,
    /// 10-bit IR, packed
    #[serde(rename = "ir_10bit_packed")]
    Ir10BitPacked,
    /// YUV converted to RGB
    YuvRgb,
    /// Raw UYVY
    YuvRaw,
}

impl VideoFormat {
    /// All video formats in driver order
    pub const ALL: [VideoFormat; 7] = [
        VideoFormat::Rgb,
        VideoFormat::Bayer,
        VideoFormat::Ir8Bit,
        VideoFormat::Ir10Bit,
        VideoFormat::Ir10BitPacked,
        VideoFormat::YuvRgb,
        VideoFormat::YuvRaw,
    ];

    /// Driver integer value
    pub const fn as_raw(self) -> i32 {
        match self {
            VideoFormat::Rgb => 0,
            VideoFormat::Bayer => 1,
            VideoFormat::Ir8Bit => 2,
            VideoFormat::Ir10Bit => 3,
            VideoFormat::Ir10BitPacked => 4,
            VideoFormat::YuvRgb => 5,
            VideoFormat::YuvRaw => 6,
        }
    }

    /// Map a driver integer value back to a video format
    pub fn from_raw(value: i32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_raw() == value)
            .ok_or(CatalogError::UnknownValue {
                kind: "video format",
                value,
            })
    }

    /// Lowercase name used in logs and configuration
    pub const fn name(self) -> &'static str {
        match self {
            VideoFormat::Rgb => "rgb",
            VideoFormat::Bayer => "bayer",
            VideoFormat::Ir8Bit => "ir_8bit",
            VideoFormat::Ir10Bit => "ir_10bit",
            VideoFormat::Ir10BitPacked => "ir_10bit_packed",
            VideoFormat::YuvRgb => "yuv_rgb",
            VideoFormat::YuvRaw => "yuv_raw",
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VideoFormat {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize(s);
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| CatalogError::UnknownName {
                kind: "video format",
                name: s.to_string(),
            })
    }
}

/// Depth stream pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormat {
    /// 11 bit depth in one u16 per pixel
    #[serde(rename = "11bit")]
    D11Bit,
    /// 10 bit depth in one u16 per pixel
    #[serde(rename = "10bit")]
    D10Bit,
    /// 11 bit packed depth
    #[serde(rename = "11bit_packed")]
    D11BitPacked,
    /// 10 bit packed depth
    #[serde(rename = "10bit_packed")]
    D10BitPacked,
    /// Depth aligned to the video image, in millimeters
    Registered,
    /// Depth in millimeters, not aligned
    Mm,
}

impl DepthFormat {
    /// All depth formats in driver order
    pub const ALL: [DepthFormat; 6] = [
        DepthFormat::D11Bit,
        DepthFormat::D10Bit,
        DepthFormat::D11BitPacked,
        DepthFormat::D10BitPacked,
        DepthFormat::Registered,
        DepthFormat::Mm,
    ];

    /// Driver integer value
    pub const fn as_raw(self) -> i32 {
        match self {
            DepthFormat::D11Bit => 0,
            DepthFormat::D10Bit => 1,
            DepthFormat::D11BitPacked => 2,
            DepthFormat::D10BitPacked => 3,
            DepthFormat::Registered => 4,
            DepthFormat::Mm => 5,
        }
    }

    /// Map a driver integer value back to a depth format
    pub fn from_raw(value: i32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_raw() == value)
            .ok_or(CatalogError::UnknownValue {
                kind: "depth format",
                value,
            })
    }

    /// Lowercase name used in logs and configuration
    pub const fn name(self) -> &'static str {
        match self {
            DepthFormat::D11Bit => "11bit",
            DepthFormat::D10Bit => "10bit",
            DepthFormat::D11BitPacked => "11bit_packed",
            DepthFormat::D10BitPacked => "10bit_packed",
            DepthFormat::Registered => "registered",
            DepthFormat::Mm => "mm",
        }
    }
}

impl fmt::Display for DepthFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DepthFormat {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize(s);
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| CatalogError::UnknownName {
                kind: "depth format",
                name: s.to_string(),
            })
    }
}

/// Pixel format of either stream kind
///
/// The driver keeps video and depth formats in one integer slot; which enum
/// applies follows from the stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Video stream format
    Video(VideoFormat),
    /// Depth stream format
    Depth(DepthFormat),
}

impl PixelFormat {
    /// Stream kind this format belongs to
    pub const fn kind(self) -> StreamKind {
        match self {
            PixelFormat::Video(_) => StreamKind::Video,
            PixelFormat::Depth(_) => StreamKind::Depth,
        }
    }

    /// Driver integer value
    pub const fn as_raw(self) -> i32 {
        match self {
            PixelFormat::Video(f) => f.as_raw(),
            PixelFormat::Depth(f) => f.as_raw(),
        }
    }

    /// Map a driver integer value of the given stream kind to a format
    pub fn from_raw(kind: StreamKind, value: i32) -> Result<Self> {
        match kind {
            StreamKind::Video => VideoFormat::from_raw(value).map(PixelFormat::Video),
            StreamKind::Depth => DepthFormat::from_raw(value).map(PixelFormat::Depth),
        }
    }

    /// Parse a format name in the namespace of the given stream kind
    pub fn parse(kind: StreamKind, name: &str) -> Result<Self> {
        match kind {
            StreamKind::Video => name.parse().map(PixelFormat::Video),
            StreamKind::Depth => name.parse().map(PixelFormat::Depth),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Video(v) => write!(f, "{}", v),
            PixelFormat::Depth(d) => write!(f, "{}", d),
        }
    }
}

impl From<VideoFormat> for PixelFormat {
    fn from(format: VideoFormat) -> Self {
        PixelFormat::Video(format)
    }
}

impl From<DepthFormat> for PixelFormat {
    fn from(format: DepthFormat) -> Self {
        PixelFormat::Depth(format)
    }
}

/// Front panel LED state
///
/// The firmware treats value 5 as another "blink green"; it maps onto
/// `BlinkGreen` when read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedStatus {
    /// LED off
    Off,
    /// Solid green
    Green,
    /// Solid red
    Red,
    /// Solid yellow
    Yellow,
    /// Blinking green
    BlinkGreen,
    /// Alternating red / yellow
    BlinkRedYellow,
}

impl LedStatus {
    /// All LED states
    pub const ALL: [LedStatus; 6] = [
        LedStatus::Off,
        LedStatus::Green,
        LedStatus::Red,
        LedStatus::Yellow,
        LedStatus::BlinkGreen,
        LedStatus::BlinkRedYellow,
    ];

    /// Driver integer value
    pub const fn as_raw(self) -> i32 {
        match self {
            LedStatus::Off => 0,
            LedStatus::Green => 1,
            LedStatus::Red => 2,
            LedStatus::Yellow => 3,
            LedStatus::BlinkGreen => 4,
            LedStatus::BlinkRedYellow => 6,
        }
    }

    /// Map a driver integer value back to an LED state
    pub fn from_raw(value: i32) -> Result<Self> {
        match value {
            0 => Ok(LedStatus::Off),
            1 => Ok(LedStatus::Green),
            2 => Ok(LedStatus::Red),
            3 => Ok(LedStatus::Yellow),
            4 | 5 => Ok(LedStatus::BlinkGreen),
            6 => Ok(LedStatus::BlinkRedYellow),
            _ => Err(CatalogError::UnknownValue {
                kind: "LED status",
                value,
            }),
        }
    }

    /// Lowercase name used in logs and configuration
    pub const fn name(self) -> &'static str {
        match self {
            LedStatus::Off => "off",
            LedStatus::Green => "green",
            LedStatus::Red => "red",
            LedStatus::Yellow => "yellow",
            LedStatus::BlinkGreen => "blink_green",
            LedStatus::BlinkRedYellow => "blink_red_yellow",
        }
    }
}

impl fmt::Display for LedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LedStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize(s);
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.name() == wanted)
            .ok_or_else(|| CatalogError::UnknownName {
                kind: "LED status",
                name: s.to_string(),
            })
    }
}

/// Tilt motor status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiltStatus {
    /// Motor is stopped
    #[default]
    Stopped,
    /// Motor reached its movement limit
    Limit,
    /// Motor is moving to a new position
    Moving,
}

impl TiltStatus {
    /// All tilt states
    pub const ALL: [TiltStatus; 3] = [TiltStatus::Stopped, TiltStatus::Limit, TiltStatus::Moving];

    /// Driver integer value
    pub const fn as_raw(self) -> i32 {
        match self {
            TiltStatus::Stopped => 0x00,
            TiltStatus::Limit => 0x01,
            TiltStatus::Moving => 0x04,
        }
    }

    /// Map a driver integer value back to a tilt status
    pub fn from_raw(value: i32) -> Result<Self> {
        match value {
            0x00 => Ok(TiltStatus::Stopped),
            0x01 => Ok(TiltStatus::Limit),
            0x04 => Ok(TiltStatus::Moving),
            _ => Err(CatalogError::UnknownValue {
                kind: "tilt status",
                value,
            }),
        }
    }
}

impl fmt::Display for TiltStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TiltStatus::Stopped => "stopped",
            TiltStatus::Limit => "limit",
            TiltStatus::Moving => "moving",
        };
        f.write_str(name)
    }
}

/// Driver log severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Crashing / non-recoverable errors
    Fatal,
    /// Major errors
    Error,
    /// Warnings
    Warning,
    /// Important messages
    Notice,
    /// Normal messages
    Info,
    /// Useful development messages
    Debug,
    /// Slightly less useful messages
    Spew,
    /// Everything
    Flood,
}

impl LogLevel {
    /// All levels, most severe first
    pub const ALL: [LogLevel; 8] = [
        LogLevel::Fatal,
        LogLevel::Error,
        LogLevel::Warning,
        LogLevel::Notice,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Spew,
        LogLevel::Flood,
    ];

    /// Driver integer value
    pub const fn as_raw(self) -> i32 {
        match self {
            LogLevel::Fatal => 0,
            LogLevel::Error => 1,
            LogLevel::Warning => 2,
            LogLevel::Notice => 3,
            LogLevel::Info => 4,
            LogLevel::Debug => 5,
            LogLevel::Spew => 6,
            LogLevel::Flood => 7,
        }
    }

    /// Map a driver integer value back to a log level
    pub fn from_raw(value: i32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_raw() == value)
            .ok_or(CatalogError::UnknownValue {
                kind: "log level",
                value,
            })
    }

    /// Lowercase name used in logs and configuration
    pub const fn name(self) -> &'static str {
        match self {
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Notice => "notice",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Spew => "spew",
            LogLevel::Flood => "flood",
        }
    }

    /// Whether a message of `self` passes a filter set to `threshold`
    pub fn passes(self, threshold: LogLevel) -> bool {
        self <= threshold
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogLevel {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize(s);
        let wanted = if wanted == "warn" { "warning".to_string() } else { wanted };
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.name() == wanted)
            .ok_or_else(|| CatalogError::UnknownName {
                kind: "log level",
                name: s.to_string(),
            })
    }
}

/// Set of sensor sub-devices a context should claim when opening a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFlags(pub u8);

impl DeviceFlags {
    /// Tilt motor, LED and accelerometer
    pub const MOTOR: DeviceFlags = DeviceFlags(0x01);
    /// Video and depth cameras
    pub const CAMERA: DeviceFlags = DeviceFlags(0x02);
    /// Microphone array
    pub const AUDIO: DeviceFlags = DeviceFlags(0x04);

    /// Motor and camera, the default selection
    pub const fn default_selection() -> Self {
        DeviceFlags(Self::MOTOR.0 | Self::CAMERA.0)
    }

    /// Whether every bit of `other` is set in `self`
    pub const fn contains(self, other: DeviceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no sub-device is selected
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for DeviceFlags {
    fn default() -> Self {
        Self::default_selection()
    }
}

impl std::ops::BitOr for DeviceFlags {
    type Output = DeviceFlags;

    fn bitor(self, rhs: DeviceFlags) -> DeviceFlags {
        DeviceFlags(self.0 | rhs.0)
    }
}
