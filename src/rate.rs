//! Mapping from coarse rate tiers to concrete sampling and sync schedules.

use crate::channel::ChannelKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const SECOND: u64 = 1_000;
const MINUTE: u64 = 60 * SECOND;

/// Fixed plans used while the override ("special") mode is on.
const OVERRIDE_LOCATION_INTERVAL_MS: u64 = MINUTE;
const OVERRIDE_LOCATION_DISTANCE_M: f32 = 100.0;
const OVERRIDE_MOTION_INTERVAL_MS: u64 = SECOND;
const OVERRIDE_AMBIENCE_INTERVAL_MS: u64 = MINUTE;

/// Safety repeat for the real-time and eco sync tiers.
const SYNC_HALF_HOUR: Duration = Duration::from_secs(30 * 60);

/// Illegal configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("unexpected rate tier value: {0}")]
    InvalidRateTier(i32),
    #[error("unknown rate tier name: '{0}'")]
    UnknownTierName(String),
}

/// User-selected sampling aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RateTier {
    RealTime = -2,
    Often = -1,
    Normal = 0,
    Rarely = 1,
}

impl TryFrom<i32> for RateTier {
    type Error = ConfigurationError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -2 => Ok(RateTier::RealTime),
            -1 => Ok(RateTier::Often),
            0 => Ok(RateTier::Normal),
            1 => Ok(RateTier::Rarely),
            other => Err(ConfigurationError::InvalidRateTier(other)),
        }
    }
}

impl From<RateTier> for i32 {
    fn from(tier: RateTier) -> Self {
        tier as i32
    }
}

impl FromStr for RateTier {
    type Err = ConfigurationError;

    /// Accepts tier names (`realtime`, `often`, `normal`, `rarely`) or their
    /// integer values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(value) = trimmed.parse::<i32>() {
            return RateTier::try_from(value);
        }
        match trimmed.to_lowercase().replace(['-', '_'], "").as_str() {
            "realtime" => Ok(RateTier::RealTime),
            "often" => Ok(RateTier::Often),
            "normal" => Ok(RateTier::Normal),
            "rarely" | "eco" => Ok(RateTier::Rarely),
            _ => Err(ConfigurationError::UnknownTierName(trimmed.to_string())),
        }
    }
}

impl fmt::Display for RateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateTier::RealTime => "real-time",
            RateTier::Often => "often",
            RateTier::Normal => "normal",
            RateTier::Rarely => "rarely",
        };
        f.write_str(name)
    }
}

/// Concrete polling parameters derived from a tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingPlan {
    /// Polling interval; [`SamplingPlan::CONTINUOUS`] means sample as fast as possible.
    pub interval_millis: u64,
    /// Minimum displacement between location fixes.
    pub min_distance_meters: Option<f32>,
}

impl SamplingPlan {
    pub const CONTINUOUS: u64 = 0;

    pub fn every(interval_millis: u64) -> Self {
        Self {
            interval_millis,
            min_distance_meters: None,
        }
    }

    pub fn with_min_distance(mut self, meters: f32) -> Self {
        self.min_distance_meters = Some(meters);
        self
    }

    pub fn is_continuous(&self) -> bool {
        self.interval_millis == Self::CONTINUOUS
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }
}

/// Resolve the sampling plan for a channel.
///
/// The override mode is applied after the tier table and only for channels
/// that define an override constant.
pub fn resolve(tier: RateTier, kind: ChannelKind, override_mode: bool) -> SamplingPlan {
    let plan = tier_plan(tier, kind);
    if override_mode {
        if let Some(fixed) = override_plan(kind) {
            tracing::info!("{kind} sensor is in override mode");
            return fixed;
        }
    }
    plan
}

/// Resolve from a raw preference value, rejecting anything outside the four tiers.
pub fn resolve_raw(
    raw: i32,
    kind: ChannelKind,
    override_mode: bool,
) -> Result<SamplingPlan, ConfigurationError> {
    let tier = RateTier::try_from(raw)?;
    Ok(resolve(tier, kind, override_mode))
}

fn tier_plan(tier: RateTier, kind: ChannelKind) -> SamplingPlan {
    use RateTier::*;

    let millis = match (kind, tier) {
        (ChannelKind::Location, RealTime) => SECOND,
        (ChannelKind::Location, Often) => 30 * SECOND,
        (ChannelKind::Location, Normal) => 5 * MINUTE,

        (ChannelKind::Motion, RealTime) => SECOND,
        (ChannelKind::Motion, Often) => 5 * SECOND,
        (ChannelKind::Motion, Normal) => MINUTE,

        (ChannelKind::Ambience, RealTime) => SamplingPlan::CONTINUOUS,
        (ChannelKind::Ambience, Often) => 10 * SECOND,
        (ChannelKind::Ambience, Normal) => MINUTE,

        (ChannelKind::DeviceProximity, RealTime) => SECOND,
        (ChannelKind::DeviceProximity, Often) => MINUTE,
        (ChannelKind::DeviceProximity, Normal) => 5 * MINUTE,

        (ChannelKind::ExternalBiosensor, RealTime) => SECOND,
        (ChannelKind::ExternalBiosensor, Often) => 5 * SECOND,
        (ChannelKind::ExternalBiosensor, Normal) => MINUTE,

        (ChannelKind::PhoneState | ChannelKind::PopQuiz, RealTime) => SECOND,
        (ChannelKind::PhoneState | ChannelKind::PopQuiz, Often) => 10 * SECOND,
        (ChannelKind::PhoneState | ChannelKind::PopQuiz, Normal) => MINUTE,

        (_, Rarely) => 15 * MINUTE,
    };

    let plan = SamplingPlan::every(millis);
    if kind == ChannelKind::Location {
        plan.with_min_distance(0.0)
    } else {
        plan
    }
}

fn override_plan(kind: ChannelKind) -> Option<SamplingPlan> {
    match kind {
        ChannelKind::Location => Some(
            SamplingPlan::every(OVERRIDE_LOCATION_INTERVAL_MS)
                .with_min_distance(OVERRIDE_LOCATION_DISTANCE_M),
        ),
        ChannelKind::Motion => Some(SamplingPlan::every(OVERRIDE_MOTION_INTERVAL_MS)),
        ChannelKind::Ambience => Some(SamplingPlan::every(OVERRIDE_AMBIENCE_INTERVAL_MS)),
        _ => None,
    }
}

/// Transmission schedule derived from the sync-rate tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    /// Period of the repeating flush; the first flush happens immediately.
    pub period: Duration,
    /// Flush whenever new data is buffered, not only on the timer.
    pub drain_on_ingest: bool,
}

pub fn resolve_sync(tier: RateTier) -> SyncPlan {
    match tier {
        RateTier::RealTime => SyncPlan {
            period: SYNC_HALF_HOUR,
            drain_on_ingest: true,
        },
        RateTier::Often => SyncPlan {
            period: Duration::from_secs(60),
            drain_on_ingest: false,
        },
        RateTier::Normal => SyncPlan {
            period: Duration::from_secs(5 * 60),
            drain_on_ingest: false,
        },
        RateTier::Rarely => SyncPlan {
            period: SYNC_HALF_HOUR,
            drain_on_ingest: false,
        },
    }
}

pub fn resolve_sync_raw(raw: i32) -> Result<SyncPlan, ConfigurationError> {
    Ok(resolve_sync(RateTier::try_from(raw)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIERS: [RateTier; 4] = [
        RateTier::RealTime,
        RateTier::Often,
        RateTier::Normal,
        RateTier::Rarely,
    ];

    #[test]
    fn test_motion_table() {
        let intervals: Vec<u64> = TIERS
            .iter()
            .map(|t| resolve(*t, ChannelKind::Motion, false).interval_millis)
            .collect();
        assert_eq!(intervals, vec![1_000, 5_000, 60_000, 900_000]);
    }

    #[test]
    fn test_location_carries_min_distance() {
        for tier in TIERS {
            let plan = resolve(tier, ChannelKind::Location, false);
            assert_eq!(plan.min_distance_meters, Some(0.0));
        }
        assert_eq!(
            resolve(RateTier::Normal, ChannelKind::Location, false).interval_millis,
            300_000
        );
        assert_eq!(
            resolve(RateTier::Normal, ChannelKind::Motion, false).min_distance_meters,
            None
        );
    }

    #[test]
    fn test_ambience_realtime_is_continuous() {
        assert!(resolve(RateTier::RealTime, ChannelKind::Ambience, false).is_continuous());
        assert!(!resolve(RateTier::Often, ChannelKind::Ambience, false).is_continuous());
    }

    #[test]
    fn test_resolution_is_total_and_deterministic() {
        for kind in ChannelKind::ALL {
            for tier in TIERS {
                let a = resolve_raw(tier as i32, kind, false).unwrap();
                let b = resolve_raw(tier as i32, kind, false).unwrap();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_out_of_range_tier_fails() {
        for kind in ChannelKind::ALL {
            assert_eq!(
                resolve_raw(5, kind, false),
                Err(ConfigurationError::InvalidRateTier(5))
            );
        }
        assert!(resolve_raw(-3, ChannelKind::Motion, true).is_err());
    }

    #[test]
    fn test_override_replaces_tier_value() {
        let plan = resolve(RateTier::Often, ChannelKind::Motion, true);
        assert_eq!(plan, SamplingPlan::every(OVERRIDE_MOTION_INTERVAL_MS));

        let location = resolve(RateTier::RealTime, ChannelKind::Location, true);
        assert_eq!(location.interval_millis, 60_000);
        assert_eq!(location.min_distance_meters, Some(100.0));

        // Channels without an override constant keep the tier value.
        let phone = resolve(RateTier::Often, ChannelKind::PhoneState, true);
        assert_eq!(phone.interval_millis, 10_000);
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("realtime".parse::<RateTier>(), Ok(RateTier::RealTime));
        assert_eq!("Real-Time".parse::<RateTier>(), Ok(RateTier::RealTime));
        assert_eq!("-1".parse::<RateTier>(), Ok(RateTier::Often));
        assert_eq!("eco".parse::<RateTier>(), Ok(RateTier::Rarely));
        assert_eq!(
            "7".parse::<RateTier>(),
            Err(ConfigurationError::InvalidRateTier(7))
        );
        assert!("sometimes".parse::<RateTier>().is_err());
    }

    #[test]
    fn test_tier_serde_uses_integers() {
        let json = serde_json::to_string(&RateTier::Often).unwrap();
        assert_eq!(json, "-1");
        let parsed: RateTier = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, RateTier::Rarely);
        assert!(serde_json::from_str::<RateTier>("4").is_err());
    }

    #[test]
    fn test_sync_table() {
        let realtime = resolve_sync(RateTier::RealTime);
        assert!(realtime.drain_on_ingest);
        assert_eq!(realtime.period, Duration::from_secs(1800));
        assert_eq!(resolve_sync(RateTier::Often).period, Duration::from_secs(60));
        assert_eq!(resolve_sync(RateTier::Normal).period, Duration::from_secs(300));
        assert!(!resolve_sync(RateTier::Rarely).drain_on_ingest);
        assert!(resolve_sync_raw(2).is_err());
    }
}
