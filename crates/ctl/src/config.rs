//! kinect-ctl configuration management

use anyhow::{Context, Result, anyhow};
use catalog::{FrameMode, LogLevel, PixelFormat, Resolution, StreamKind, find_mode};
use serde::{Deserialize, Serialize};
use session::SimConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtlConfig {
    pub general: GeneralSettings,
    /// Video stream mode used by `capture --stream video`
    #[serde(default = "StreamSettings::default_video")]
    pub video: StreamSettings,
    /// Depth stream mode used by `capture --stream depth`
    #[serde(default = "StreamSettings::default_depth")]
    pub depth: StreamSettings,
    #[serde(default)]
    pub tilt: TiltSettings,
    /// Simulated driver parameters (with `simulate = true` or `--simulate`)
    #[serde(default)]
    pub sim: SimSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// tracing filter level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Most verbose driver message forwarded into the log
    #[serde(default = "GeneralSettings::default_driver_log_level")]
    pub driver_log_level: String,
    /// Use the simulated driver instead of hardware
    #[serde(default)]
    pub simulate: bool,
    /// Device index commands act on
    #[serde(default)]
    pub device_index: u32,
}

impl GeneralSettings {
    fn default_driver_log_level() -> String {
        "warning".to_string()
    }
}

/// Capture mode of one stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamSettings {
    /// low, medium or high
    pub resolution: String,
    /// Format name in the stream's namespace, e.g. "rgb" or "11bit"
    pub format: String,
}

impl StreamSettings {
    fn default_video() -> Self {
        Self {
            resolution: "medium".to_string(),
            format: "rgb".to_string(),
        }
    }

    fn default_depth() -> Self {
        Self {
            resolution: "medium".to_string(),
            format: "11bit".to_string(),
        }
    }

    /// Resolve against the mode catalog
    pub fn mode(&self, kind: StreamKind) -> Result<FrameMode> {
        let resolution: Resolution = self
            .resolution
            .parse()
            .with_context(|| format!("Invalid {} resolution", kind))?;
        let format = PixelFormat::parse(kind, &self.format)
            .with_context(|| format!("Invalid {} format", kind))?;

        let mode = find_mode(kind, resolution, format);
        if !mode.is_valid {
            return Err(anyhow!(
                "Unsupported {} mode: {} {}",
                kind,
                resolution,
                format
            ));
        }
        Ok(mode)
    }
}

/// Tilt command behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiltSettings {
    /// Accepted distance from the target once the motor stops
    #[serde(default = "TiltSettings::default_tolerance")]
    pub tolerance_degrees: f64,
    /// How long `tilt` polls the motor before giving up (e.g. "5s")
    #[serde(default = "TiltSettings::default_settle_timeout", with = "duration_serde")]
    pub settle_timeout: Duration,
    /// Interval between motor state refreshes (e.g. "100ms")
    #[serde(default = "TiltSettings::default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for TiltSettings {
    fn default() -> Self {
        Self {
            tolerance_degrees: Self::default_tolerance(),
            settle_timeout: Self::default_settle_timeout(),
            poll_interval: Self::default_poll_interval(),
        }
    }
}

impl TiltSettings {
    fn default_tolerance() -> f64 {
        2.0
    }

    fn default_settle_timeout() -> Duration {
        Duration::from_secs(5)
    }

    fn default_poll_interval() -> Duration {
        Duration::from_millis(100)
    }
}

/// Simulated driver parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSettings {
    #[serde(default = "SimSettings::default_device_count")]
    pub device_count: u32,
    /// Interval between generated frames (e.g. "33ms")
    #[serde(default = "SimSettings::default_frame_interval", with = "duration_serde")]
    pub frame_interval: Duration,
    /// Motor speed in degrees per second
    #[serde(default = "SimSettings::default_tilt_rate")]
    pub tilt_rate: f64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            device_count: Self::default_device_count(),
            frame_interval: Self::default_frame_interval(),
            tilt_rate: Self::default_tilt_rate(),
        }
    }
}

impl SimSettings {
    fn default_device_count() -> u32 {
        1
    }

    fn default_frame_interval() -> Duration {
        Duration::from_millis(33)
    }

    fn default_tilt_rate() -> f64 {
        20.0
    }

    /// Simulated driver configuration for these settings
    pub fn to_sim_config(&self) -> SimConfig {
        SimConfig {
            device_count: self.device_count,
            frame_interval: Some(self.frame_interval),
            tilt_rate: self.tilt_rate,
            ..SimConfig::default()
        }
    }
}

/// Serde for durations written as "1m30s", "5s" or "33ms"
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a duration string like "1m", "30s", "1m30s" or "250ms"
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim().to_lowercase();
        let mut total_ms: u64 = 0;
        let mut current_num = String::new();
        let mut chars = s.chars().peekable();

        while let Some(c) = chars.next() {
            if c.is_ascii_digit() {
                current_num.push(c);
                continue;
            }
            if current_num.is_empty() {
                return Err(format!("Invalid duration format: {}", s));
            }
            let num: u64 = current_num
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", current_num))?;
            current_num.clear();

            match c {
                'h' => total_ms += num * 3_600_000,
                'm' if chars.peek() == Some(&'s') => {
                    chars.next();
                    total_ms += num;
                }
                'm' => total_ms += num * 60_000,
                's' => total_ms += num * 1000,
                _ => return Err(format!("Invalid duration unit: {}", c)),
            }
        }

        // Trailing number without unit is seconds
        if !current_num.is_empty() {
            let num: u64 = current_num
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", current_num))?;
            total_ms += num * 1000;
        }

        if total_ms == 0 {
            return Err("Duration must be greater than 0".to_string());
        }

        Ok(Duration::from_millis(total_ms))
    }

    pub fn format_duration(d: Duration) -> String {
        let ms = d.as_millis() as u64;
        if ms % 1000 != 0 {
            return format!("{}ms", ms);
        }
        let secs = ms / 1000;
        let mins = secs / 60;
        let secs = secs % 60;

        let mut result = String::new();
        if mins > 0 {
            result.push_str(&format!("{}m", mins));
        }
        if secs > 0 || result.is_empty() {
            result.push_str(&format!("{}s", secs));
        }
        result
    }
}

pub use duration_serde::parse_duration;

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            general: GeneralSettings {
                log_level: "info".to_string(),
                driver_log_level: GeneralSettings::default_driver_log_level(),
                simulate: false,
                device_index: 0,
            },
            video: StreamSettings::default_video(),
            depth: StreamSettings::default_depth(),
            tilt: TiltSettings::default(),
            sim: SimSettings::default(),
        }
    }
}

impl CtlConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are tried in order.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/kinect-ctl/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: CtlConfig = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("kinect-ctl").join("config.toml")
        } else {
            PathBuf::from(".config/kinect-ctl/config.toml")
        }
    }

    /// Driver log level as a catalog value
    pub fn driver_log_level(&self) -> Result<LogLevel> {
        self.general
            .driver_log_level
            .parse()
            .context("Invalid driver log level")
    }

    /// Mode configured for a stream
    pub fn stream_mode(&self, kind: StreamKind) -> Result<FrameMode> {
        match kind {
            StreamKind::Video => self.video.mode(kind),
            StreamKind::Depth => self.depth.mode(kind),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        self.driver_log_level()?;
        for kind in StreamKind::ALL {
            self.stream_mode(kind)?;
        }

        if self.tilt.tolerance_degrees.is_nan() || self.tilt.tolerance_degrees <= 0.0 {
            return Err(anyhow!(
                "Invalid tilt tolerance {}, must be positive",
                self.tilt.tolerance_degrees
            ));
        }
        if self.sim.tilt_rate.is_nan() || self.sim.tilt_rate <= 0.0 {
            return Err(anyhow!(
                "Invalid simulated tilt rate {}, must be positive",
                self.sim.tilt_rate
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CtlConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert!(!config.general.simulate);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.stream_mode(StreamKind::Video).unwrap().frame_size(),
            640 * 480 * 3
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("33ms").unwrap(), Duration::from_millis(33));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("ms").is_err());
    }

    #[test]
    fn test_format_duration() {
        use duration_serde::format_duration;
        assert_eq!(format_duration(Duration::from_millis(33)), "33ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
    }

    #[test]
    fn test_config_serialization() {
        let config = CtlConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = CtlConfig::parse(&toml_str).unwrap();

        assert_eq!(config.general.log_level, parsed.general.log_level);
        assert_eq!(config.video, parsed.video);
        assert_eq!(config.sim.frame_interval, parsed.sim.frame_interval);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = CtlConfig::default();
        config.general.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "debug".to_string();
        config.general.driver_log_level = "chatty".to_string();
        assert!(config.validate().is_err());

        config.general.driver_log_level = "spew".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.driver_log_level().unwrap(), LogLevel::Spew);
    }

    #[test]
    fn test_validate_mode_combination() {
        let mut config = CtlConfig::default();
        config.depth.resolution = "high".to_string();
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("Unsupported depth mode"));

        config.depth.resolution = "medium".to_string();
        config.depth.format = "rgb".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sim_settings() {
        let sim = SimSettings {
            device_count: 2,
            frame_interval: Duration::from_millis(10),
            tilt_rate: 50.0,
        };
        let config = sim.to_sim_config();
        assert_eq!(config.device_count, 2);
        assert_eq!(config.frame_interval, Some(Duration::from_millis(10)));
        assert!(config.tilt_noise);
    }
}
