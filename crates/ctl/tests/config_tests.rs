//! Integration tests for configuration loading
//!
//! Covers full and minimal files, defaults for omitted sections, invalid
//! values and save/load through the filesystem.

use catalog::{LogLevel, StreamKind};
use ctl::CtlConfig;
use std::time::Duration;
use tempfile::tempdir;

const MINIMAL_CONFIG: &str = r#"
[general]
log_level = "info"
"#;

const FULL_CONFIG: &str = r#"
[general]
log_level = "debug"
driver_log_level = "spew"
simulate = true
device_index = 1

[video]
resolution = "high"
format = "bayer"

[depth]
resolution = "medium"
format = "registered"

[tilt]
tolerance_degrees = 1.5
settle_timeout = "10s"
poll_interval = "50ms"

[sim]
device_count = 2
frame_interval = "16ms"
tilt_rate = 40.0
"#;

#[test]
fn test_parse_minimal_config() {
    let config = CtlConfig::parse(MINIMAL_CONFIG).unwrap();
    let defaults = CtlConfig::default();

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.driver_log_level().unwrap(), LogLevel::Warning);
    assert!(!config.general.simulate);
    assert_eq!(config.video, defaults.video);
    assert_eq!(config.depth, defaults.depth);
    assert_eq!(config.tilt.settle_timeout, Duration::from_secs(5));
    assert_eq!(config.sim.frame_interval, Duration::from_millis(33));
}

#[test]
fn test_parse_full_config() {
    let config = CtlConfig::parse(FULL_CONFIG).unwrap();

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.driver_log_level().unwrap(), LogLevel::Spew);
    assert!(config.general.simulate);
    assert_eq!(config.general.device_index, 1);

    let video = config.stream_mode(StreamKind::Video).unwrap();
    assert_eq!((video.width, video.height), (1280, 1024));
    assert_eq!(video.frame_size(), 1280 * 1024);
    let depth = config.stream_mode(StreamKind::Depth).unwrap();
    assert_eq!(depth.frame_size(), 640 * 480 * 2);

    assert_eq!(config.tilt.tolerance_degrees, 1.5);
    assert_eq!(config.tilt.settle_timeout, Duration::from_secs(10));
    assert_eq!(config.tilt.poll_interval, Duration::from_millis(50));

    let sim = config.sim.to_sim_config();
    assert_eq!(sim.device_count, 2);
    assert_eq!(sim.frame_interval, Some(Duration::from_millis(16)));
    assert_eq!(sim.tilt_rate, 40.0);
}

#[test]
fn test_invalid_configs() {
    let cases = [
        // Missing [general]
        "[video]\nresolution = \"medium\"\nformat = \"rgb\"\n",
        // Unknown tracing level
        "[general]\nlog_level = \"loud\"\n",
        // Unknown driver level
        "[general]\nlog_level = \"info\"\ndriver_log_level = \"loud\"\n",
        // Depth has no high resolution mode
        "[general]\nlog_level = \"info\"\n[depth]\nresolution = \"high\"\nformat = \"11bit\"\n",
        // Depth format on the video stream
        "[general]\nlog_level = \"info\"\n[video]\nresolution = \"medium\"\nformat = \"mm\"\n",
        // Malformed duration
        "[general]\nlog_level = \"info\"\n[tilt]\nsettle_timeout = \"soon\"\n",
        // Non-positive tolerance
        "[general]\nlog_level = \"info\"\n[tilt]\ntolerance_degrees = 0.0\n",
    ];

    for case in cases {
        assert!(CtlConfig::parse(case).is_err(), "accepted:\n{}", case);
    }
}

#[test]
fn test_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = CtlConfig::default();
    config.general.simulate = true;
    config.video.format = "ir_8bit".to_string();
    config.sim.frame_interval = Duration::from_millis(5);
    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = CtlConfig::load(Some(path)).unwrap();
    assert!(loaded.general.simulate);
    assert_eq!(loaded.video.format, "ir_8bit");
    assert_eq!(loaded.sim.frame_interval, Duration::from_millis(5));
    assert_eq!(
        loaded.stream_mode(StreamKind::Video).unwrap().height,
        488
    );
}

#[test]
fn test_load_rejects_invalid_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[general]\nlog_level = \"verbose\"\n").unwrap();

    let err = CtlConfig::load(Some(path)).unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid log level"));

    let missing = dir.path().join("missing.toml");
    assert!(CtlConfig::load(Some(missing)).is_err());
}
