//! Collection transparency log.
//!
//! Tracks how much the daemon has collected and transmitted per channel,
//! without retaining any reading content.

use crate::channel::ChannelKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collection statistics for the current and previous sessions.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Readings accepted into the buffer, indexed by [`ChannelKind::index`]
    readings: [AtomicU64; ChannelKind::ALL.len()],
    /// Readings rejected because the buffer was full
    dropped_readings: AtomicU64,
    /// Number of batches handed to the backend or spool
    batches_transmitted: AtomicU64,
    /// Number of readings inside those batches
    readings_transmitted: AtomicU64,
    /// Channel toggles that changed state
    toggles_applied: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            readings: Default::default(),
            dropped_readings: AtomicU64::new(0),
            batches_transmitted: AtomicU64::new(0),
            readings_transmitted: AtomicU64::new(0),
            toggles_applied: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log that resumes from and saves to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_reading(&self, kind: ChannelKind) {
        self.readings[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_readings.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one transmitted batch of `readings` readings.
    pub fn record_batch(&self, readings: u64) {
        self.batches_transmitted.fetch_add(1, Ordering::Relaxed);
        self.readings_transmitted
            .fetch_add(readings, Ordering::Relaxed);
    }

    pub fn record_toggle(&self) {
        self.toggles_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            readings: ChannelKind::ALL
                .iter()
                .map(|kind| (*kind, self.readings[kind.index()].load(Ordering::Relaxed)))
                .collect(),
            dropped_readings: self.dropped_readings.load(Ordering::Relaxed),
            batches_transmitted: self.batches_transmitted.load(Ordering::Relaxed),
            readings_transmitted: self.readings_transmitted.load(Ordering::Relaxed),
            toggles_applied: self.toggles_applied.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let mut out = String::from("Collection Statistics:\n");
        for (kind, count) in &stats.readings {
            out.push_str(&format!("- {kind} readings: {count}\n"));
        }
        out.push_str(&format!(
            "- Readings dropped (buffer full): {}\n\
             - Batches transmitted: {}\n\
             - Readings transmitted: {}\n\
             - Channel toggles: {}\n\
             - Session duration: {} seconds",
            stats.dropped_readings,
            stats.batches_transmitted,
            stats.readings_transmitted,
            stats.toggles_applied,
            stats.session_duration_secs
        ));
        out
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                readings: stats.readings,
                dropped_readings: stats.dropped_readings,
                batches_transmitted: stats.batches_transmitted,
                readings_transmitted: stats.readings_transmitted,
                toggles_applied: stats.toggles_applied,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                for (kind, count) in persisted.readings {
                    self.readings[kind.index()].store(count, Ordering::Relaxed);
                }
                self.dropped_readings
                    .store(persisted.dropped_readings, Ordering::Relaxed);
                self.batches_transmitted
                    .store(persisted.batches_transmitted, Ordering::Relaxed);
                self.readings_transmitted
                    .store(persisted.readings_transmitted, Ordering::Relaxed);
                self.toggles_applied
                    .store(persisted.toggles_applied, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in &self.readings {
            counter.store(0, Ordering::Relaxed);
        }
        self.dropped_readings.store(0, Ordering::Relaxed);
        self.batches_transmitted.store(0, Ordering::Relaxed);
        self.readings_transmitted.store(0, Ordering::Relaxed);
        self.toggles_applied.store(0, Ordering::Relaxed);
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub readings: BTreeMap<ChannelKind, u64>,
    pub dropped_readings: u64,
    pub batches_transmitted: u64,
    pub readings_transmitted: u64,
    pub toggles_applied: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl TransparencyStats {
    pub fn total_readings(&self) -> u64 {
        self.readings.values().sum()
    }
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    #[serde(default)]
    readings: BTreeMap<ChannelKind, u64>,
    #[serde(default)]
    dropped_readings: u64,
    #[serde(default)]
    batches_transmitted: u64,
    #[serde(default)]
    readings_transmitted: u64,
    #[serde(default)]
    toggles_applied: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transparency_log_counting() {
        let log = TransparencyLog::new();

        log.record_reading(ChannelKind::Motion);
        log.record_reading(ChannelKind::Motion);
        log.record_reading(ChannelKind::Ambience);
        log.record_dropped();
        log.record_batch(3);

        let stats = log.stats();
        assert_eq!(stats.readings[&ChannelKind::Motion], 2);
        assert_eq!(stats.readings[&ChannelKind::Ambience], 1);
        assert_eq!(stats.readings[&ChannelKind::Location], 0);
        assert_eq!(stats.total_readings(), 3);
        assert_eq!(stats.dropped_readings, 1);
        assert_eq!(stats.batches_transmitted, 1);
        assert_eq!(stats.readings_transmitted, 3);
    }

    #[test]
    fn test_transparency_log_reset() {
        let log = TransparencyLog::new();

        log.record_reading(ChannelKind::PhoneState);
        log.record_toggle();
        log.reset();

        let stats = log.stats();
        assert_eq!(stats.total_readings(), 0);
        assert_eq!(stats.toggles_applied, 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "sense-transparency-{}.json",
            uuid::Uuid::new_v4()
        ));

        let log = TransparencyLog::with_persistence(path.clone());
        log.record_reading(ChannelKind::Location);
        log.record_toggle();
        log.save().unwrap();

        let restored = TransparencyLog::with_persistence(path.clone());
        let stats = restored.stats();
        assert_eq!(stats.readings[&ChannelKind::Location], 1);
        assert_eq!(stats.toggles_applied, 1);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_summary_format() {
        let log = TransparencyLog::new();
        let summary = log.summary();

        assert!(summary.contains("motion readings"));
        assert!(summary.contains("Readings dropped"));
        assert!(summary.contains("Batches transmitted"));
    }
}
