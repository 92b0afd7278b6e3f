//! Channel and reading types shared by every component of the daemon.
//!
//! A channel is one logical sensor category; each channel is backed by zero
//! or more sub-sensors whose readings flow into an [`IngestionSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status bit set while the daemon is running.
pub const STATUS_RUNNING: u32 = 0x01;
/// Status bit set while the daemon is logged in to the backend.
pub const STATUS_CONNECTED: u32 = 0x02;

/// One logical sensor category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    PhoneState,
    Location,
    Motion,
    Ambience,
    DeviceProximity,
    ExternalBiosensor,
    PopQuiz,
}

impl ChannelKind {
    /// Every channel, in the order the daemon replays them on start.
    pub const ALL: [ChannelKind; 7] = [
        ChannelKind::PhoneState,
        ChannelKind::Location,
        ChannelKind::Ambience,
        ChannelKind::Motion,
        ChannelKind::DeviceProximity,
        ChannelKind::ExternalBiosensor,
        ChannelKind::PopQuiz,
    ];

    /// Key under which the enabled flag is persisted.
    pub fn status_key(self) -> &'static str {
        match self {
            ChannelKind::PhoneState => "phonestate",
            ChannelKind::Location => "location",
            ChannelKind::Motion => "motion",
            ChannelKind::Ambience => "ambience",
            ChannelKind::DeviceProximity => "devprox",
            ChannelKind::ExternalBiosensor => "external",
            ChannelKind::PopQuiz => "popquiz",
        }
    }

    /// Bit reported in the status bitmask while the channel is enabled.
    pub fn status_bit(self) -> u32 {
        match self {
            ChannelKind::PhoneState => 0x04,
            ChannelKind::Location => 0x08,
            ChannelKind::Ambience => 0x10,
            ChannelKind::PopQuiz => 0x20,
            ChannelKind::DeviceProximity => 0x40,
            ChannelKind::ExternalBiosensor => 0x80,
            ChannelKind::Motion => 0x100,
        }
    }

    /// Name given to the channel's dedicated execution thread.
    pub fn thread_name(self) -> &'static str {
        match self {
            ChannelKind::PhoneState => "Phone state thread",
            ChannelKind::Location => "Location thread",
            ChannelKind::Motion => "Motion thread",
            ChannelKind::Ambience => "Ambience thread",
            ChannelKind::DeviceProximity => "Device proximity thread",
            ChannelKind::ExternalBiosensor => "Ext. sensors thread",
            ChannelKind::PopQuiz => "Questionnaire thread",
        }
    }

    /// All sub-sensors that can back this channel.
    pub fn sub_sensors(self) -> &'static [SubSensor] {
        match self {
            ChannelKind::PhoneState => &[
                SubSensor::CallState,
                SubSensor::Proximity,
                SubSensor::Battery,
                SubSensor::Pressure,
                SubSensor::PhoneActivity,
            ],
            ChannelKind::Location => &[SubSensor::Location],
            ChannelKind::Motion => &[SubSensor::Motion],
            ChannelKind::Ambience => &[SubSensor::Noise, SubSensor::Light],
            ChannelKind::DeviceProximity => &[SubSensor::EnvironmentScan],
            ChannelKind::ExternalBiosensor => &[SubSensor::BioHarness, SubSensor::Hxm],
            ChannelKind::PopQuiz => &[],
        }
    }

    /// Position of this kind in [`ChannelKind::ALL`].
    pub fn index(self) -> usize {
        match self {
            ChannelKind::PhoneState => 0,
            ChannelKind::Location => 1,
            ChannelKind::Ambience => 2,
            ChannelKind::Motion => 3,
            ChannelKind::DeviceProximity => 4,
            ChannelKind::ExternalBiosensor => 5,
            ChannelKind::PopQuiz => 6,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelKind::PhoneState => "phone state",
            ChannelKind::Location => "location",
            ChannelKind::Motion => "motion",
            ChannelKind::Ambience => "ambience",
            ChannelKind::DeviceProximity => "device proximity",
            ChannelKind::ExternalBiosensor => "external sensors",
            ChannelKind::PopQuiz => "questionnaire",
        };
        f.write_str(label)
    }
}

/// Error returned when a channel name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel '{0}'")]
pub struct UnknownChannel(pub String);

impl FromStr for ChannelKind {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "phonestate" | "phone_state" | "phone" => Ok(ChannelKind::PhoneState),
            "location" | "position" => Ok(ChannelKind::Location),
            "motion" => Ok(ChannelKind::Motion),
            "ambience" => Ok(ChannelKind::Ambience),
            "devprox" | "device_proximity" | "devices" => Ok(ChannelKind::DeviceProximity),
            "external" | "external_biosensor" | "external_sensors" => {
                Ok(ChannelKind::ExternalBiosensor)
            }
            "popquiz" | "pop_quiz" | "questionnaire" => Ok(ChannelKind::PopQuiz),
            _ => Err(UnknownChannel(s.to_string())),
        }
    }
}

/// Concrete sensing worker behind a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubSensor {
    CallState,
    Proximity,
    Battery,
    Pressure,
    PhoneActivity,
    Location,
    Motion,
    Noise,
    Light,
    EnvironmentScan,
    BioHarness,
    Hxm,
}

impl SubSensor {
    /// The channel this sub-sensor belongs to.
    pub fn channel(self) -> ChannelKind {
        match self {
            SubSensor::CallState
            | SubSensor::Proximity
            | SubSensor::Battery
            | SubSensor::Pressure
            | SubSensor::PhoneActivity => ChannelKind::PhoneState,
            SubSensor::Location => ChannelKind::Location,
            SubSensor::Motion => ChannelKind::Motion,
            SubSensor::Noise | SubSensor::Light => ChannelKind::Ambience,
            SubSensor::EnvironmentScan => ChannelKind::DeviceProximity,
            SubSensor::BioHarness | SubSensor::Hxm => ChannelKind::ExternalBiosensor,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SubSensor::CallState => "call state",
            SubSensor::Proximity => "proximity",
            SubSensor::Battery => "battery",
            SubSensor::Pressure => "pressure",
            SubSensor::PhoneActivity => "phone activity",
            SubSensor::Location => "position",
            SubSensor::Motion => "motion",
            SubSensor::Noise => "noise",
            SubSensor::Light => "light",
            SubSensor::EnvironmentScan => "environment scan",
            SubSensor::BioHarness => "bioharness",
            SubSensor::Hxm => "hxm",
        }
    }
}

impl fmt::Display for SubSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Free-form sensor values.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A single raw reading emitted by a sensing worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub channel: ChannelKind,
    pub sensor: SubSensor,
    pub timestamp: DateTime<Utc>,
    pub fields: Fields,
}

impl Reading {
    pub fn new(sensor: SubSensor, fields: Fields) -> Self {
        Self {
            channel: sensor.channel(),
            sensor,
            timestamp: Utc::now(),
            fields,
        }
    }
}

/// Receives readings from sensing workers.
///
/// Delivery is fire-and-forget: implementations must not block the caller
/// for long since they run on a channel's execution thread.
pub trait IngestionSink: Send + Sync {
    fn ingest(&self, reading: Reading);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_status_bits_are_distinct() {
        let mut seen = STATUS_RUNNING | STATUS_CONNECTED;
        for kind in ChannelKind::ALL {
            assert_eq!(seen & kind.status_bit(), 0, "{kind} collides");
            seen |= kind.status_bit();
        }
    }

    #[test]
    fn test_index_matches_all_order() {
        for (i, kind) in ChannelKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_channel_parsing() {
        assert_eq!("motion".parse::<ChannelKind>(), Ok(ChannelKind::Motion));
        assert_eq!("Phone-State".parse::<ChannelKind>(), Ok(ChannelKind::PhoneState));
        assert_eq!("devprox".parse::<ChannelKind>(), Ok(ChannelKind::DeviceProximity));
        assert_eq!(
            "external".parse::<ChannelKind>(),
            Ok(ChannelKind::ExternalBiosensor)
        );
        assert!("gyro".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_sub_sensors_belong_to_their_channel() {
        let mut all = HashSet::new();
        for kind in ChannelKind::ALL {
            for sensor in kind.sub_sensors() {
                assert_eq!(sensor.channel(), kind);
                assert!(all.insert(*sensor));
            }
        }
        assert_eq!(ChannelKind::PhoneState.sub_sensors().len(), 5);
        assert!(ChannelKind::PopQuiz.sub_sensors().is_empty());
    }

    #[test]
    fn test_reading_takes_channel_from_sensor() {
        let reading = Reading::new(SubSensor::Light, Fields::new());
        assert_eq!(reading.channel, ChannelKind::Ambience);
    }
}
