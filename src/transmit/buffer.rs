//! Bounded in-memory buffer between sensing workers and transmission.

use super::Nudger;
use crate::channel::{IngestionSink, Reading};
use crate::transparency::SharedTransparencyLog;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 10_000;

/// Ingestion sink that holds readings until the next flush.
///
/// When full, new readings are dropped rather than blocking the channel
/// thread that produced them.
pub struct ReadingBuffer {
    sender: Sender<Reading>,
    receiver: Receiver<Reading>,
    dropped: AtomicU64,
    nudger: Option<Nudger>,
    transparency: Option<SharedTransparencyLog>,
}

impl ReadingBuffer {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            dropped: AtomicU64::new(0),
            nudger: None,
            transparency: None,
        }
    }

    pub fn with_nudger(mut self, nudger: Nudger) -> Self {
        self.nudger = Some(nudger);
        self
    }

    pub fn with_transparency(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    /// Take up to `max` readings, oldest first.
    pub fn drain(&self, max: usize) -> Vec<Reading> {
        self.receiver.try_iter().take(max).collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Readings dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl IngestionSink for ReadingBuffer {
    fn ingest(&self, reading: Reading) {
        let channel = reading.channel;
        match self.sender.try_send(reading) {
            Ok(()) => {
                if let Some(log) = &self.transparency {
                    log.record_reading(channel);
                }
                if let Some(nudger) = &self.nudger {
                    nudger.nudge();
                }
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 1_000 == 1 {
                    debug!("Reading buffer full, {dropped} readings dropped so far");
                }
                if let Some(log) = &self.transparency {
                    log.record_dropped();
                }
            }
            // The buffer owns its receiver, so this cannot happen.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelKind, Fields, SubSensor};
    use crate::transmit::nudge_channel;
    use crate::transparency::create_shared_log;

    fn reading(sensor: SubSensor) -> Reading {
        Reading::new(sensor, Fields::new())
    }

    #[test]
    fn test_drops_when_full() {
        let log = create_shared_log();
        let buffer = ReadingBuffer::new(2).with_transparency(log.clone());

        buffer.ingest(reading(SubSensor::Motion));
        buffer.ingest(reading(SubSensor::Motion));
        buffer.ingest(reading(SubSensor::Light));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);

        let stats = log.stats();
        assert_eq!(stats.readings[&ChannelKind::Motion], 2);
        assert_eq!(stats.readings[&ChannelKind::Ambience], 0);
        assert_eq!(stats.dropped_readings, 1);
    }

    #[test]
    fn test_drain_respects_limit_and_order() {
        let buffer = ReadingBuffer::new(10);
        buffer.ingest(reading(SubSensor::Battery));
        buffer.ingest(reading(SubSensor::Noise));
        buffer.ingest(reading(SubSensor::Hxm));

        let first = buffer.drain(2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].sensor, SubSensor::Battery);
        assert_eq!(first[1].sensor, SubSensor::Noise);
        assert_eq!(buffer.drain(10).len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ingest_nudges() {
        let (nudger, nudges) = nudge_channel();
        let buffer = ReadingBuffer::new(10).with_nudger(nudger);

        buffer.ingest(reading(SubSensor::Location));
        buffer.ingest(reading(SubSensor::Location));
        // Nudges coalesce into one pending wake-up.
        assert!(nudges.try_recv().is_ok());
        assert!(nudges.try_recv().is_err());
    }
}
