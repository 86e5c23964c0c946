//! Tilt motor and accelerometer state
//!
//! The motor reports its encoder angle in half degrees and the accelerometer
//! in raw counts (819 counts per g). These helpers convert the raw register
//! snapshot into physical units.

use crate::types::TiltStatus;
use serde::{Deserialize, Serialize};

/// Accelerometer counts per g
pub const COUNTS_PER_G: f64 = 819.0;

/// Standard gravity in m/s²
pub const GRAVITY: f64 = 9.80665;

/// Mechanical tilt limit in degrees (both directions)
pub const MAX_TILT_DEGREES: f64 = 31.0;

/// Raw motor register snapshot as returned by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawTiltState {
    /// Raw X axis counts
    pub accelerometer_x: i16,
    /// Raw Y axis counts
    pub accelerometer_y: i16,
    /// Raw Z axis counts
    pub accelerometer_z: i16,
    /// Encoder angle in half degrees
    pub tilt_angle: i8,
    /// Motor status
    pub tilt_status: TiltStatus,
}

impl RawTiltState {
    /// Tilt angle in degrees
    pub fn tilt_degrees(&self) -> f64 {
        f64::from(self.tilt_angle) / 2.0
    }

    /// Acceleration vector in m/s²
    pub fn mks_accel(&self) -> [f64; 3] {
        [
            counts_to_mks(self.accelerometer_x),
            counts_to_mks(self.accelerometer_y),
            counts_to_mks(self.accelerometer_z),
        ]
    }

    /// Convert to the physical-unit snapshot cached by sessions
    pub fn to_state(&self) -> TiltState {
        TiltState {
            angle_degrees: self.tilt_degrees(),
            status: self.tilt_status,
            accel: self.mks_accel(),
        }
    }
}

/// Tilt snapshot in physical units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TiltState {
    /// Tilt angle in degrees
    pub angle_degrees: f64,
    /// Motor status
    pub status: TiltStatus,
    /// Acceleration (x, y, z) in m/s²
    pub accel: [f64; 3],
}

/// Convert raw accelerometer counts to m/s²
pub fn counts_to_mks(counts: i16) -> f64 {
    f64::from(counts) / COUNTS_PER_G * GRAVITY
}

/// Convert m/s² to the nearest raw accelerometer count
pub fn mks_to_counts(mks: f64) -> i16 {
    (mks / GRAVITY * COUNTS_PER_G)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

/// Clamp a requested angle into the motor's mechanical range
///
/// NaN requests are treated as level (0°).
pub fn clamp_tilt_degrees(degrees: f64) -> f64 {
    if degrees.is_nan() {
        return 0.0;
    }
    degrees.clamp(-MAX_TILT_DEGREES, MAX_TILT_DEGREES)
}

/// Encode a requested angle as the motor control value (2 × degrees)
pub fn encode_tilt_degrees(degrees: f64) -> u16 {
    let half_degrees = (clamp_tilt_degrees(degrees) * 2.0) as i16;
    half_degrees as u16
}

/// Convert radians to degrees for the radian-based tilt setter
pub fn radians_to_degrees(radians: f64) -> f64 {
    radians / std::f64::consts::PI * 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tilt_degrees_from_half_degrees() {
        let raw = RawTiltState {
            tilt_angle: 41,
            ..Default::default()
        };
        assert_eq!(raw.tilt_degrees(), 20.5);

        let raw = RawTiltState {
            tilt_angle: -62,
            tilt_status: TiltStatus::Limit,
            ..Default::default()
        };
        assert_eq!(raw.to_state().angle_degrees, -31.0);
        assert_eq!(raw.to_state().status, TiltStatus::Limit);
    }

    #[test]
    fn test_accel_conversion() {
        let raw = RawTiltState {
            accelerometer_x: 0,
            accelerometer_y: 819,
            accelerometer_z: -819,
            ..Default::default()
        };
        let accel = raw.mks_accel();
        assert_eq!(accel[0], 0.0);
        assert!((accel[1] - GRAVITY).abs() < 1e-9);
        assert!((accel[2] + GRAVITY).abs() < 1e-9);
        assert_eq!(mks_to_counts(GRAVITY), 819);
    }

    #[test]
    fn test_clamp_and_encode() {
        assert_eq!(clamp_tilt_degrees(45.0), 31.0);
        assert_eq!(clamp_tilt_degrees(-90.0), -31.0);
        assert_eq!(clamp_tilt_degrees(f64::NAN), 0.0);
        assert_eq!(encode_tilt_degrees(20.0), 40);
        assert_eq!(encode_tilt_degrees(-10.0), (-20i16) as u16);
        assert_eq!(encode_tilt_degrees(100.0), 62);
    }

    #[test]
    fn test_radians() {
        assert!((radians_to_degrees(std::f64::consts::FRAC_PI_2) - 90.0).abs() < 1e-9);
    }
}
