//! Flusher that spools reading batches to disk as JSON files.

use super::{BufferFlusher, ReadingBuffer, TransmitError};
use crate::channel::Reading;
use crate::transparency::SharedTransparencyLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Readings per batch file.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Batches held in memory while the spool directory is unwritable.
pub const MAX_PENDING_BATCHES: usize = 100;

/// One unit of transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingBatch {
    pub batch_id: Uuid,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub readings: Vec<Reading>,
}

impl ReadingBatch {
    pub fn new(device_id: impl Into<String>, readings: Vec<Reading>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            device_id: device_id.into(),
            created_at: Utc::now(),
            readings,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Device identifier derived from the hostname plus a random suffix.
pub fn device_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("sense-{}-{}", hostname, &Uuid::new_v4().to_string()[..8])
}

/// Drains the buffer into `batch_<timestamp>_<id>.json` files.
///
/// Batches that fail to write are kept and retried first on the next flush.
pub struct SpoolFlusher {
    buffer: Arc<ReadingBuffer>,
    dir: PathBuf,
    device_id: String,
    batch_size: usize,
    pending: Mutex<Vec<ReadingBatch>>,
    transparency: Option<SharedTransparencyLog>,
}

impl SpoolFlusher {
    pub fn new(buffer: Arc<ReadingBuffer>, dir: impl Into<PathBuf>) -> Self {
        Self {
            buffer,
            dir: dir.into(),
            device_id: device_id(),
            batch_size: DEFAULT_BATCH_SIZE,
            pending: Mutex::new(Vec::new()),
            transparency: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_transparency(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Batches waiting to be written.
    pub fn pending_batches(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn write_batch(&self, batch: &ReadingBatch) -> Result<PathBuf, TransmitError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "batch_{}_{}.json",
            batch.created_at.format("%Y%m%d_%H%M%S%3f"),
            &batch.batch_id.to_string()[..8]
        ));
        let json = serde_json::to_string_pretty(batch)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

impl BufferFlusher for SpoolFlusher {
    fn flush(&self) -> Result<usize, TransmitError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| TransmitError::Upload("pending batch lock poisoned".to_string()))?;

        loop {
            let readings = self.buffer.drain(self.batch_size);
            if readings.is_empty() {
                break;
            }
            pending.push(ReadingBatch::new(self.device_id.clone(), readings));
        }
        if pending.len() > MAX_PENDING_BATCHES {
            let excess = pending.len() - MAX_PENDING_BATCHES;
            tracing::warn!("Discarding {excess} oldest batches awaiting spooling");
            for batch in pending.drain(..excess) {
                if let Some(log) = &self.transparency {
                    for _ in 0..batch.len() {
                        log.record_dropped();
                    }
                }
            }
        }

        let mut total = 0;
        while let Some(batch) = pending.first() {
            match self.write_batch(batch) {
                Ok(path) => {
                    tracing::debug!("Spooled {} readings to {:?}", batch.len(), path);
                    if let Some(log) = &self.transparency {
                        log.record_batch(batch.len() as u64);
                    }
                    total += batch.len();
                    pending.remove(0);
                }
                Err(e) => {
                    tracing::warn!("{} batches kept for retry", pending.len());
                    return Err(e);
                }
            }
        }
        Ok(total)
    }
}

/// Read every spooled batch in `dir`, oldest file name first.
pub fn read_spool(dir: &Path) -> Result<Vec<ReadingBatch>, TransmitError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().map(|e| e == "json").unwrap_or(false)
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("batch_"))
        })
        .collect();
    files.sort();

    let mut batches = Vec::with_capacity(files.len());
    for file in files {
        let content = std::fs::read_to_string(&file)?;
        batches.push(serde_json::from_str(&content)?);
    }
    Ok(batches)
}
