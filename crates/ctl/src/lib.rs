//! kinect-ctl support library
//!
//! Configuration shared by the `kinect-ctl` binary and its tests.

pub mod config;

pub use config::CtlConfig;
