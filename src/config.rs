//! Configuration for the sense platform daemon.

use crate::channel::{ChannelKind, SubSensor};
use crate::rate::RateTier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sampling rate tier as a raw preference value (-2..=1)
    pub sample_rate: i32,

    /// Transmission rate tier as a raw preference value (-2..=1)
    pub sync_rate: i32,

    /// Replace tier intervals with the fixed override plans
    pub override_mode: bool,

    /// Re-register the motion sensor after the display turns off
    pub screen_off_fix: bool,

    /// Whether the daemon may log in to the backend and transmit
    pub use_backend: bool,

    /// Which optional sub-sensors to run
    pub sensors: SensorConfig,

    /// Maximum number of readings held before transmission
    pub buffer_capacity: usize,

    /// How often the daemon polls for state and config changes
    #[serde(with = "duration_serde")]
    pub reconcile_interval: Duration,

    /// Path for spooled reading batches
    pub export_path: PathBuf,

    /// Path for status, statistics and runtime files
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sense-platform");

        Self {
            sample_rate: RateTier::Normal.into(),
            sync_rate: RateTier::Normal.into(),
            override_mode: false,
            screen_off_fix: false,
            use_backend: true,
            sensors: SensorConfig::default(),
            buffer_capacity: 10_000,
            reconcile_interval: Duration::from_secs(1),
            export_path: data_dir.join("spool"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sense-platform")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Persisted channel status file.
    pub fn status_store_path(&self) -> PathBuf {
        self.data_path.join("status_prefs.json")
    }

    /// Last service snapshot written by a running daemon.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_path.join("status.json")
    }

    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// The subset of settings the coordinator samples with.
    pub fn sensing_prefs(&self) -> SensingPrefs {
        SensingPrefs {
            sample_rate: self.sample_rate,
            override_mode: self.override_mode,
            screen_off_fix: self.screen_off_fix,
        }
    }
}

/// Settings that determine how channels are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensingPrefs {
    pub sample_rate: i32,
    pub override_mode: bool,
    pub screen_off_fix: bool,
}

impl Default for SensingPrefs {
    fn default() -> Self {
        Self {
            sample_rate: RateTier::Normal.into(),
            override_mode: false,
            screen_off_fix: false,
        }
    }
}

/// Switches for the optional sub-sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub microphone: bool,
    pub light: bool,
    pub bioharness: bool,
    pub hxm: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            microphone: true,
            light: true,
            bioharness: false,
            hxm: false,
        }
    }
}

impl SensorConfig {
    /// Parse sensor configuration from a comma-separated string.
    pub fn from_csv(s: &str) -> Self {
        let sensors: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let has = |names: &[&str]| sensors.iter().any(|s| s == "all" || names.contains(&s.as_str()));

        Self {
            microphone: has(&["microphone", "mic", "noise"]),
            light: has(&["light"]),
            bioharness: has(&["bioharness"]),
            hxm: has(&["hxm"]),
        }
    }

    /// Whether a sub-sensor is switched on; sensors without a switch always are.
    pub fn allows(&self, sensor: SubSensor) -> bool {
        match sensor {
            SubSensor::Noise => self.microphone,
            SubSensor::Light => self.light,
            SubSensor::BioHarness => self.bioharness,
            SubSensor::Hxm => self.hxm,
            _ => true,
        }
    }

    /// Sub-sensors to start for a channel.
    pub fn sensors_for(&self, kind: ChannelKind) -> Vec<SubSensor> {
        kind.sub_sensors()
            .iter()
            .copied()
            .filter(|s| self.allows(*s))
            .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_config_parsing() {
        let config = SensorConfig::from_csv("mic,light");
        assert!(config.microphone);
        assert!(config.light);
        assert!(!config.bioharness);

        let config = SensorConfig::from_csv("hxm");
        assert!(config.hxm);
        assert!(!config.microphone);

        let config = SensorConfig::from_csv("all");
        assert!(config.microphone && config.light && config.bioharness && config.hxm);
    }

    #[test]
    fn test_sensors_for_channel() {
        let config = SensorConfig::default();
        assert_eq!(
            config.sensors_for(ChannelKind::Ambience),
            vec![SubSensor::Noise, SubSensor::Light]
        );
        assert!(config.sensors_for(ChannelKind::ExternalBiosensor).is_empty());
        assert_eq!(config.sensors_for(ChannelKind::PhoneState).len(), 5);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sample_rate, 0);
        assert_eq!(config.sync_rate, 0);
        assert!(!config.screen_off_fix);
        assert!(!config.override_mode);
        assert_eq!(config.reconcile_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"sample_rate": -2}"#).unwrap();
        assert_eq!(config.sample_rate, -2);
        assert_eq!(config.buffer_capacity, 10_000);
        assert!(config.sensors.microphone);
    }
}
